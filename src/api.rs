/// Synchronous client for the **UNICEF SDMX REST API**.
///
/// This module turns one indicator request into exactly one answered query:
/// it resolves the indicator to an ordered list of candidate dataflows, builds
/// a schema-aware series key for each, and walks the list until a dataflow
/// returns rows. The rows are normalized into tidy `models::ObservationRow`s.
///
/// ### Notes
/// - A 404 means "this dataflow does not carry the indicator"; the next candidate is tried.
/// - A header-only CSV means "no observations for these filters"; the next candidate is tried.
/// - Any other failure on a candidate is logged and the next candidate is tried.
/// - Running out of candidates yields an empty table, not an error. Only a transport that
///   cannot reach the API at all, on every candidate, surfaces as `Err`.
///
/// Typical usage:
/// ```no_run
/// # use unicef_sdmx::{Client, FetchRequest};
/// let client = Client::default();
/// let rows = client.fetch(
///     &FetchRequest::new("CME_MRY0T4")
///         .countries(["ALB", "USA"])
///         .years(2015, 2020),
/// )?;
/// # Ok::<(), unicef_sdmx::Error>(())
/// ```
use crate::config::ClientConfig;
use crate::error::{Error, Result, TransportErrorKind};
use crate::key::{QueryKeyBuilder, default_key, key_for_schema};
use crate::metadata::{InMemoryStore, MetadataStore};
use crate::models::{
    DataflowId, DataflowInfo, DataflowSchema, DateSpec, IndicatorCode, IndicatorMetadata,
    ObservationRow, QueryKey,
};
use crate::normalize::{Normalizer, RawTable, normalize_rows};
use crate::postprocess::PostProcess;
use crate::resolver::DataflowResolver;
use crate::schema::{RemoteSchemaSource, SchemaCache, SchemaSource};
use crate::structure;
use crate::transport::{HttpRequest, HttpTransport, Transport, encode_segment};
use anyhow::Context;
use log::{debug, info, warn};
use std::sync::Arc;

/// Parameters of one `fetch` call.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub indicator: IndicatorCode,
    /// ISO3 codes; empty means all countries.
    pub countries: Vec<String>,
    pub date: Option<DateSpec>,
    /// Explicit SEX code; `None` or `"_T"` means totals (or everything with `nofilter`).
    pub sex: Option<String>,
    /// Leave every disaggregation slot open instead of pinning totals.
    pub nofilter: bool,
    /// Query only this dataflow, bypassing resolution.
    pub dataflow: Option<DataflowId>,
    pub postprocess: PostProcess,
}

impl FetchRequest {
    pub fn new(indicator: impl Into<String>) -> Self {
        Self {
            indicator: indicator.into(),
            countries: Vec::new(),
            date: None,
            sex: None,
            nofilter: false,
            dataflow: None,
            postprocess: PostProcess::default(),
        }
    }

    pub fn countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.countries = countries.into_iter().map(Into::into).collect();
        self
    }

    /// Inclusive year window.
    pub fn years(mut self, start: i32, end: i32) -> Self {
        self.date = DateSpec::from_bounds(Some(start), Some(end));
        self
    }

    pub fn date(mut self, date: DateSpec) -> Self {
        self.date = Some(date);
        self
    }

    pub fn sex(mut self, sex: impl Into<String>) -> Self {
        self.sex = Some(sex.into());
        self
    }

    pub fn nofilter(mut self, nofilter: bool) -> Self {
        self.nofilter = nofilter;
        self
    }

    pub fn dataflow(mut self, dataflow: impl Into<String>) -> Self {
        self.dataflow = Some(dataflow.into());
        self
    }

    pub fn dropna(mut self) -> Self {
        self.postprocess.dropna = true;
        self
    }

    pub fn mrv(mut self, n: usize) -> Self {
        self.postprocess.mrv = Some(n);
        self
    }

    pub fn latest(mut self) -> Self {
        self.postprocess.latest = true;
        self
    }
}

/// What happened when one candidate dataflow was queried.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptResult {
    /// 2xx with this many raw rows.
    Rows(usize),
    /// 404: the dataflow does not serve the indicator.
    NotApplicable,
    /// 2xx without rows.
    NoData,
    /// Non-404 error status, timeout, or an unreadable body.
    Failed(String),
    /// The API could not be reached.
    Unreachable(String),
}

impl AttemptResult {
    /// The API answered meaningfully (rows, 404, or an empty table).
    pub fn answered(&self) -> bool {
        matches!(
            self,
            AttemptResult::Rows(_) | AttemptResult::NotApplicable | AttemptResult::NoData
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub dataflow: DataflowId,
    pub url: String,
    pub result: AttemptResult,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success {
        dataflow: DataflowId,
        rows: Vec<ObservationRow>,
    },
    /// Every candidate answered, none with rows.
    NoData,
    /// No candidate answered; the reasons are joined.
    HardFailure(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchReport {
    pub outcome: FetchOutcome,
    pub attempts: Vec<Attempt>,
}

impl FetchReport {
    /// Dataflow that produced the rows, if any.
    pub fn dataflow(&self) -> Option<&str> {
        match &self.outcome {
            FetchOutcome::Success { dataflow, .. } => Some(dataflow),
            _ => None,
        }
    }

    pub fn rows(&self) -> &[ObservationRow] {
        match &self.outcome {
            FetchOutcome::Success { rows, .. } => rows,
            _ => &[],
        }
    }

    pub fn into_rows(self) -> Vec<ObservationRow> {
        match self.outcome {
            FetchOutcome::Success { rows, .. } => rows,
            _ => Vec::new(),
        }
    }
}

pub struct Client {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn MetadataStore>,
    cache: Arc<SchemaCache>,
    resolver: DataflowResolver,
    keys: QueryKeyBuilder,
    normalizer: Normalizer,
}

impl Default for Client {
    fn default() -> Self {
        Client::new(ClientConfig::default()).expect("default client build")
    }
}

/// Assembles a [`Client`] from its collaborators.
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn MetadataStore>>,
    remote_schemas: bool,
}

impl ClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Whether schemas missing from the store are fetched from the API (default: yes).
    pub fn remote_schemas(mut self, enabled: bool) -> Self {
        self.remote_schemas = enabled;
        self
    }

    pub fn build(self) -> Result<Client> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new(&self.config)?),
        };
        let store: Arc<dyn MetadataStore> = match self.store {
            Some(s) => s,
            None => Arc::new(InMemoryStore::new()),
        };
        let remote: Option<Arc<dyn SchemaSource>> = if self.remote_schemas {
            Some(Arc::new(RemoteSchemaSource::new(
                Arc::clone(&transport),
                self.config.base_url.clone(),
                self.config.agency.clone(),
                self.config.timeout(),
            )))
        } else {
            None
        };
        let cache = Arc::new(SchemaCache::new(Arc::clone(&store), remote));
        let resolver = DataflowResolver::new(&self.config.fallback)?;
        Ok(Client {
            keys: QueryKeyBuilder::new(Arc::clone(&cache), Arc::clone(&store)),
            normalizer: Normalizer::new(Arc::clone(&cache)),
            config: self.config,
            transport,
            store,
            cache,
            resolver,
        })
    }
}

impl Client {
    /// Client with the bundled HTTP transport and an empty metadata store.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            transport: None,
            store: None,
            remote_schemas: true,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn indicator_metadata(&self, code: &str) -> Option<IndicatorMetadata> {
        self.store.indicator(code)
    }

    /// Ordered candidate dataflows for `indicator_code`.
    pub fn resolve(&self, indicator_code: &str) -> Vec<DataflowId> {
        let meta = self.store.indicator(indicator_code);
        self.resolver.resolve(indicator_code, meta.as_ref())
    }

    pub fn schema(&self, dataflow_id: &str) -> Result<Arc<DataflowSchema>> {
        self.cache.get_schema(dataflow_id)
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.cache
    }

    pub fn build_key(
        &self,
        indicator_code: &str,
        dataflow_id: &str,
        sex_filter: Option<&str>,
        nofilter: bool,
    ) -> Result<QueryKey> {
        self.keys
            .build_key(indicator_code, dataflow_id, sex_filter, nofilter)
    }

    /// Normalize a raw table as if `dataflow_id` had returned it.
    pub fn normalize(
        &self,
        raw: &RawTable,
        dataflow_id: &str,
        indicator_code: &str,
    ) -> Vec<ObservationRow> {
        self.normalizer.normalize(raw, dataflow_id, indicator_code)
    }

    /// List the agency's dataflows.
    pub fn list_dataflows(&self) -> Result<Vec<DataflowInfo>> {
        let url = format!(
            "{}/dataflow/{}/all/latest",
            self.config.base_url.trim_end_matches('/'),
            encode_segment(&self.config.agency)
        );
        let req = HttpRequest::new(url, self.config.timeout()).param("references", "none");
        let resp = self.transport.get(&req)?;
        if !resp.is_success() {
            return Err(Error::Http {
                url: req.full_url(),
                status: resp.status,
            });
        }
        let list = structure::parse_dataflow_list(&resp.body)
            .with_context(|| format!("GET {}", req.full_url()))?;
        Ok(list)
    }

    /// Fetch observations for one indicator as a tidy table.
    ///
    /// An empty vector means no candidate dataflow had data for the filters.
    pub fn fetch(&self, request: &FetchRequest) -> Result<Vec<ObservationRow>> {
        let report = self.fetch_report(request)?;
        if let FetchOutcome::HardFailure(reason) = &report.outcome {
            warn!("{}: no dataflow answered ({reason})", request.indicator);
        }
        Ok(report.into_rows())
    }

    /// Fetch several indicators with the same filters, one fallback walk each, concatenated.
    pub fn fetch_all(
        &self,
        indicators: &[String],
        template: &FetchRequest,
    ) -> Result<Vec<ObservationRow>> {
        let mut all_rows = Vec::new();
        for indicator in indicators {
            let req = FetchRequest {
                indicator: indicator.clone(),
                ..template.clone()
            };
            all_rows.extend(self.fetch(&req)?);
        }
        Ok(all_rows)
    }

    /// Walk the candidate dataflows for `request` and report every attempt.
    pub fn fetch_report(&self, request: &FetchRequest) -> Result<FetchReport> {
        let indicator = request.indicator.trim();
        if indicator.is_empty() {
            return Err(Error::Other(anyhow::anyhow!("an indicator code is required")));
        }

        let candidates = match &request.dataflow {
            Some(d) => vec![d.clone()],
            None => self.resolve(indicator),
        };
        debug!("{indicator}: candidate dataflows {candidates:?}");

        let meta = self.store.indicator(indicator);
        let mut attempts: Vec<Attempt> = Vec::with_capacity(candidates.len());

        for dataflow in candidates {
            let schema = self.cache.get_schema(&dataflow).ok();
            let key = match &schema {
                Some(s) => key_for_schema(
                    s,
                    indicator,
                    meta.as_ref(),
                    &request.countries,
                    request.sex.as_deref(),
                    request.nofilter,
                ),
                None => {
                    debug!("{dataflow}: schema unknown, querying with unfiltered key");
                    default_key(indicator, &request.countries)
                }
            };
            let http_req = self.data_request(&dataflow, schema.as_deref(), &key, request.date);
            let url = http_req.full_url();
            debug!("{indicator} via {dataflow}: GET {url}");

            let result = match self.transport.get(&http_req) {
                Err(e) if e.is_unreachable() => AttemptResult::Unreachable(e.to_string()),
                Err(e) => AttemptResult::Failed(e.to_string()),
                Ok(resp) if resp.is_not_found() => AttemptResult::NotApplicable,
                Ok(resp) if !resp.is_success() => {
                    AttemptResult::Failed(format!("HTTP {}", resp.status))
                }
                Ok(resp) => match RawTable::from_csv(&resp.body) {
                    Err(e) => AttemptResult::Failed(e.to_string()),
                    Ok(raw) if raw.is_empty() => AttemptResult::NoData,
                    Ok(raw) => {
                        let rows = normalize_rows(&raw, schema.as_deref(), indicator);
                        info!(
                            "{indicator}: {} rows from {dataflow} (attempt {})",
                            rows.len(),
                            attempts.len() + 1
                        );
                        attempts.push(Attempt {
                            dataflow: dataflow.clone(),
                            url,
                            result: AttemptResult::Rows(raw.len()),
                        });
                        let rows = request.postprocess.apply(rows);
                        return Ok(FetchReport {
                            outcome: FetchOutcome::Success { dataflow, rows },
                            attempts,
                        });
                    }
                },
            };

            match &result {
                AttemptResult::NotApplicable => {
                    debug!("{indicator}: {}", Error::DataflowNotApplicable(dataflow.clone()))
                }
                AttemptResult::NoData => debug!("{indicator}: {dataflow} returned no rows"),
                AttemptResult::Failed(reason) | AttemptResult::Unreachable(reason) => {
                    warn!("{indicator}: {dataflow} failed: {reason}")
                }
                AttemptResult::Rows(_) => {}
            }
            attempts.push(Attempt {
                dataflow,
                url,
                result,
            });
        }

        exhausted(attempts)
    }

    fn data_request(
        &self,
        dataflow: &str,
        schema: Option<&DataflowSchema>,
        key: &QueryKey,
        date: Option<DateSpec>,
    ) -> HttpRequest {
        let agency = schema
            .and_then(|s| s.agency.as_deref())
            .unwrap_or(&self.config.agency);
        let version = schema
            .and_then(|s| s.version.as_deref())
            .unwrap_or(&self.config.default_version);
        let url = format!(
            "{}/data/{},{},{}/{}",
            self.config.base_url.trim_end_matches('/'),
            encode_segment(agency),
            encode_segment(dataflow),
            encode_segment(version),
            encode_segment(key.as_str())
        );
        let mut req = HttpRequest::new(url, self.config.timeout())
            .param("format", "csv")
            .param("labels", "id");
        if let Some(d) = date {
            req.params.extend(d.to_query_params());
        }
        req
    }
}

/// Outcome after every candidate was tried without rows.
fn exhausted(attempts: Vec<Attempt>) -> Result<FetchReport> {
    let all_unreachable = attempts
        .iter()
        .all(|a| matches!(a.result, AttemptResult::Unreachable(_)));
    if all_unreachable {
        if let Some(last) = attempts.last() {
            let message = match &last.result {
                AttemptResult::Unreachable(m) => m.clone(),
                _ => String::new(),
            };
            return Err(Error::Transport {
                url: last.url.clone(),
                kind: TransportErrorKind::Connect,
                message,
            });
        }
    }

    let outcome = if attempts.iter().any(|a| a.result.answered()) {
        FetchOutcome::NoData
    } else {
        let reasons = attempts
            .iter()
            .map(|a| match &a.result {
                AttemptResult::Failed(r) | AttemptResult::Unreachable(r) => {
                    format!("{}: {}", a.dataflow, r)
                }
                other => format!("{}: {:?}", a.dataflow, other),
            })
            .collect::<Vec<_>>()
            .join("; ");
        FetchOutcome::HardFailure(reasons)
    };
    Ok(FetchReport { outcome, attempts })
}
