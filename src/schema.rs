//! Session-scoped memo of dataflow schemas.

use crate::error::{Error, Result};
use crate::metadata::MetadataStore;
use crate::models::DataflowSchema;
use crate::structure;
use crate::transport::{HttpRequest, Transport, encode_segment};
use ahash::AHashMap;
use log::{debug, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Somewhere a schema can be loaded from when the metadata store lacks it.
pub trait SchemaSource: Send + Sync {
    /// `Ok(None)` when the source does not know the dataflow.
    fn fetch_schema(&self, dataflow_id: &str) -> Result<Option<DataflowSchema>>;
}

/// Loads a dataflow's data structure definition from the SDMX REST API.
pub struct RemoteSchemaSource {
    transport: Arc<dyn Transport>,
    base_url: String,
    agency: String,
    timeout: Duration,
}

impl RemoteSchemaSource {
    pub fn new(
        transport: Arc<dyn Transport>,
        base_url: impl Into<String>,
        agency: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            agency: agency.into(),
            timeout,
        }
    }

    fn request(&self, dataflow_id: &str) -> HttpRequest {
        let url = format!(
            "{}/dataflow/{}/{}/latest",
            self.base_url.trim_end_matches('/'),
            encode_segment(&self.agency),
            encode_segment(dataflow_id)
        );
        HttpRequest::new(url, self.timeout).param("references", "all")
    }
}

impl SchemaSource for RemoteSchemaSource {
    fn fetch_schema(&self, dataflow_id: &str) -> Result<Option<DataflowSchema>> {
        let req = self.request(dataflow_id);
        let resp = self.transport.get(&req)?;
        if resp.is_not_found() {
            return Ok(None);
        }
        if !resp.is_success() {
            return Err(Error::Http {
                url: req.full_url(),
                status: resp.status,
            });
        }
        let mut schema = structure::parse_dataflow_schema(&resp.body, dataflow_id)?;
        if schema.agency.is_none() {
            schema.agency = Some(self.agency.clone());
        }
        Ok(Some(schema))
    }
}

/// Outcome of asking the remote source for a schema.
enum Remote {
    Found(DataflowSchema),
    /// The API answered that the dataflow does not exist.
    Absent,
    /// No remote source, or the request failed.
    Unavailable,
}

/// Never evicts; a session touches few distinct dataflows.
///
/// A `None` entry records a dataflow the API reported as unknown.
pub struct SchemaCache {
    store: Arc<dyn MetadataStore>,
    remote: Option<Arc<dyn SchemaSource>>,
    entries: Mutex<AHashMap<String, Option<Arc<DataflowSchema>>>>,
}

impl SchemaCache {
    pub fn new(store: Arc<dyn MetadataStore>, remote: Option<Arc<dyn SchemaSource>>) -> Self {
        Self {
            store,
            remote,
            entries: Mutex::new(AHashMap::new()),
        }
    }

    /// Cached schema, else the metadata store's, else the remote source's.
    ///
    /// Fails with [`Error::SchemaNotFound`] when no source yields a valid schema;
    /// callers then proceed without dimension-aware filtering. Only a remote 404
    /// is remembered; other failures are retried on the next call.
    pub fn get_schema(&self, dataflow_id: &str) -> Result<Arc<DataflowSchema>> {
        let not_found = || Error::SchemaNotFound(dataflow_id.to_string());
        if let Some(entry) = self.lock().get(dataflow_id) {
            return entry.clone().ok_or_else(not_found);
        }

        let loaded = match self.store.dataflow_schema(dataflow_id) {
            Some(s) => s,
            None => match self.load_remote(dataflow_id) {
                Remote::Found(s) => s,
                Remote::Absent => {
                    self.lock().entry(dataflow_id.to_string()).or_insert(None);
                    return Err(not_found());
                }
                Remote::Unavailable => return Err(not_found()),
            },
        };
        let schema = match loaded.validate() {
            Ok(s) => s,
            Err(e) => {
                warn!("discarding schema for {dataflow_id}: {e}");
                return Err(not_found());
            }
        };

        // The lock is not held across I/O, so two threads may both load; first insert wins.
        let mut entries = self.lock();
        let entry = entries
            .entry(dataflow_id.to_string())
            .or_insert(None)
            .get_or_insert_with(|| Arc::new(schema));
        Ok(Arc::clone(entry))
    }

    fn load_remote(&self, dataflow_id: &str) -> Remote {
        let Some(remote) = self.remote.as_ref() else {
            return Remote::Unavailable;
        };
        debug!("schema for {dataflow_id} not in metadata store, fetching structure");
        match remote.fetch_schema(dataflow_id) {
            Ok(Some(s)) => Remote::Found(s),
            Ok(None) => {
                debug!("structure for {dataflow_id} not found");
                Remote::Absent
            }
            Err(e) => {
                warn!("structure request for {dataflow_id} failed: {e}");
                Remote::Unavailable
            }
        }
    }

    /// Whether a schema for `dataflow_id` is cached.
    pub fn contains(&self, dataflow_id: &str) -> bool {
        matches!(self.lock().get(dataflow_id), Some(Some(_)))
    }

    /// Number of cached schemas.
    pub fn len(&self) -> usize {
        self.lock().values().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AHashMap<String, Option<Arc<DataflowSchema>>>> {
        // a panic while holding the lock cannot leave the map half-updated
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::InMemoryStore;
    use crate::models::Dimension;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        schema: Option<DataflowSchema>,
        fail: bool,
    }

    impl CountingSource {
        fn new(schema: Option<DataflowSchema>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                schema,
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                schema: None,
                fail: true,
            })
        }
    }

    impl SchemaSource for CountingSource {
        fn fetch_schema(&self, _id: &str) -> Result<Option<DataflowSchema>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Http {
                    url: "https://api/dataflow".into(),
                    status: 503,
                });
            }
            Ok(self.schema.clone())
        }
    }

    fn cache_with(source: &Arc<CountingSource>) -> SchemaCache {
        SchemaCache::new(
            Arc::new(InMemoryStore::new()),
            Some(source.clone() as Arc<dyn SchemaSource>),
        )
    }

    fn nutrition() -> DataflowSchema {
        DataflowSchema::new(
            "NUTRITION",
            vec![
                Dimension::new("REF_AREA", 1),
                Dimension::new("INDICATOR", 2),
                Dimension::new("SEX", 3).with_total(),
            ],
        )
    }

    #[test]
    fn store_hit_is_cached() {
        let store = InMemoryStore::new().with_schema(nutrition()).unwrap();
        let source = CountingSource::new(None);
        let cache = SchemaCache::new(
            Arc::new(store),
            Some(source.clone() as Arc<dyn SchemaSource>),
        );
        let a = cache.get_schema("NUTRITION").unwrap();
        let b = cache.get_schema("NUTRITION").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert!(cache.contains("NUTRITION"));
    }

    #[test]
    fn remote_is_consulted_once() {
        let source = CountingSource::new(Some(nutrition()));
        let cache = cache_with(&source);
        cache.get_schema("NUTRITION").unwrap();
        cache.get_schema("NUTRITION").unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remote_not_found_is_remembered() {
        let source = CountingSource::new(None);
        let cache = cache_with(&source);
        assert!(matches!(
            cache.get_schema("NOPE"),
            Err(Error::SchemaNotFound(id)) if id == "NOPE"
        ));
        assert!(matches!(cache.get_schema("NOPE"), Err(Error::SchemaNotFound(_))));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());
        assert!(!cache.contains("NOPE"));
        cache.clear();
        let _ = cache.get_schema("NOPE");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn remote_failures_are_retried() {
        let source = CountingSource::failing();
        let cache = cache_with(&source);
        assert!(matches!(cache.get_schema("CME"), Err(Error::SchemaNotFound(_))));
        assert!(matches!(cache.get_schema("CME"), Err(Error::SchemaNotFound(_))));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn structure_url_segments_are_encoded() {
        struct Recording(Mutex<Vec<String>>);
        impl Transport for Recording {
            fn get(&self, request: &HttpRequest) -> Result<crate::transport::HttpResponse> {
                self.0.lock().unwrap().push(request.full_url());
                Ok(crate::transport::HttpResponse::new(404, ""))
            }
        }
        let t = Arc::new(Recording(Mutex::new(Vec::new())));
        let source = RemoteSchemaSource::new(
            t.clone(),
            "https://api/rest/",
            "UNICEF",
            Duration::from_secs(1),
        );
        assert!(source.fetch_schema("MY FLOW").unwrap().is_none());
        assert_eq!(
            t.0.lock().unwrap()[0],
            "https://api/rest/dataflow/UNICEF/MY%20FLOW/latest?references=all"
        );
    }
}
