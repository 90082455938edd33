//! Shared fixtures for the integration tests: a scripted transport and a small catalog.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use unicef_sdmx::{
    Client, ClientConfig, DataflowSchema, Dimension, Error, HttpRequest, HttpResponse,
    InMemoryStore, IndicatorMetadata, Result, Transport, TransportErrorKind,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone)]
enum Reply {
    Status(u16, String),
    Unreachable,
}

/// Answers by the first route whose needle occurs in the full URL; anything else is a 404.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Vec<(String, Reply)>,
    calls: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, needle: &str, status: u16, body: &str) -> Self {
        self.routes
            .push((needle.to_string(), Reply::Status(status, body.to_string())));
        self
    }

    /// Data requests for `dataflow`.
    pub fn on_data(self, dataflow: &str, status: u16, body: &str) -> Self {
        self.on(&format!("/data/UNICEF,{dataflow},"), status, body)
    }

    pub fn unreachable(mut self, needle: &str) -> Self {
        self.routes.push((needle.to_string(), Reply::Unreachable));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Data URLs requested, in order.
    pub fn data_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|u| u.contains("/data/"))
            .collect()
    }
}

impl Transport for MockTransport {
    fn get(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let url = request.full_url();
        self.calls.lock().unwrap().push(url.clone());
        for (needle, reply) in &self.routes {
            if url.contains(needle.as_str()) {
                return match reply {
                    Reply::Status(status, body) => Ok(HttpResponse::new(*status, body.clone())),
                    Reply::Unreachable => Err(Error::Transport {
                        url,
                        kind: TransportErrorKind::Connect,
                        message: "connection refused".into(),
                    }),
                };
            }
        }
        Ok(HttpResponse::new(404, "NoResultsFound"))
    }
}

pub fn config() -> ClientConfig {
    ClientConfig {
        retry_backoff_ms: vec![],
        ..ClientConfig::default()
    }
}

pub fn client(transport: Arc<MockTransport>, store: InMemoryStore) -> Client {
    Client::builder(config())
        .transport(transport)
        .store(Arc::new(store))
        .remote_schemas(false)
        .build()
        .unwrap()
}

pub fn cme_schema() -> DataflowSchema {
    DataflowSchema::new(
        "CME",
        vec![
            Dimension::new("REF_AREA", 1),
            Dimension::new("INDICATOR", 2),
            Dimension::new("SEX", 3).with_total(),
            Dimension::new("WEALTH_QUINTILE", 4).with_total(),
        ],
    )
    .with_attributes(&["UNIT_MEASURE", "OBS_STATUS"])
}

pub fn nutrition_schema() -> DataflowSchema {
    DataflowSchema::new(
        "NUTRITION",
        vec![
            Dimension::new("REF_AREA", 1),
            Dimension::new("INDICATOR", 2),
            Dimension::new("SEX", 3).with_total(),
            Dimension::new("AGE", 4).with_total(),
            Dimension::new("RESIDENCE", 5).with_total(),
            Dimension::new("WEALTH_QUINTILE", 6).with_total(),
        ],
    )
}

pub fn global_schema() -> DataflowSchema {
    DataflowSchema::new(
        "GLOBAL_DATAFLOW",
        vec![
            Dimension::new("REF_AREA", 1),
            Dimension::new("INDICATOR", 2),
            Dimension::new("SEX", 3).with_total(),
        ],
    )
}

pub fn store() -> InMemoryStore {
    InMemoryStore::new()
        .with_schema(cme_schema())
        .and_then(|s| s.with_schema(nutrition_schema()))
        .and_then(|s| s.with_schema(global_schema()))
        .and_then(|s| {
            s.with_indicator(
                IndicatorMetadata::new("CME_MRY0T4", &["CME", "GLOBAL_DATAFLOW"])
                    .with_totals(&["SEX", "WEALTH_QUINTILE"]),
            )
        })
        .unwrap()
}

pub const CSV_HEADER: &str = "DATAFLOW,REF_AREA,INDICATOR,SEX,TIME_PERIOD,OBS_VALUE,UNIT_MEASURE,OBS_STATUS\n";

pub const ALB_CME_CSV: &str = "DATAFLOW,REF_AREA,INDICATOR,SEX,TIME_PERIOD,OBS_VALUE,UNIT_MEASURE,OBS_STATUS
UNICEF:CME(1.0),ALB,CME_MRY0T4,_T,2019,9.7,D_PER_1000_B,A
UNICEF:CME(1.0),ALB,CME_MRY0T4,_T,2020,9.4,D_PER_1000_B,A
";
