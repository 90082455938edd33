//! Read-only catalog of indicators and dataflow schemas.
//!
//! The crate never writes to a store; refreshing it is the owner's business.
//! [`InMemoryStore`] covers tests and callers that keep their catalog as JSON.

use crate::error::Result;
use crate::models::{DataflowSchema, IndicatorMetadata};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub trait MetadataStore: Send + Sync {
    fn indicator(&self, code: &str) -> Option<IndicatorMetadata>;
    fn dataflow_schema(&self, id: &str) -> Option<DataflowSchema>;
}

/// On-disk shape of a JSON catalog.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub indicators: Vec<IndicatorMetadata>,
    #[serde(default)]
    pub dataflows: Vec<DataflowSchema>,
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    indicators: AHashMap<String, IndicatorMetadata>,
    schemas: AHashMap<String, DataflowSchema>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and insert an indicator, replacing any previous entry.
    pub fn insert_indicator(&mut self, meta: IndicatorMetadata) -> Result<()> {
        let meta = meta.validate()?;
        self.indicators.insert(meta.code.clone(), meta);
        Ok(())
    }

    /// Validate and insert a schema, replacing any previous entry.
    pub fn insert_schema(&mut self, schema: DataflowSchema) -> Result<()> {
        let schema = schema.validate()?;
        self.schemas.insert(schema.id.clone(), schema);
        Ok(())
    }

    pub fn with_indicator(mut self, meta: IndicatorMetadata) -> Result<Self> {
        self.insert_indicator(meta)?;
        Ok(self)
    }

    pub fn with_schema(mut self, schema: DataflowSchema) -> Result<Self> {
        self.insert_schema(schema)?;
        Ok(self)
    }

    pub fn from_catalog(catalog: Catalog) -> Result<Self> {
        let mut store = Self::new();
        for m in catalog.indicators {
            store.insert_indicator(m)?;
        }
        for s in catalog.dataflows {
            store.insert_schema(s)?;
        }
        Ok(store)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let catalog: Catalog = serde_json::from_str(s)?;
        Self::from_catalog(catalog)
    }

    pub fn from_json_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Self::from_json_str(&s)
    }

    pub fn indicator_count(&self) -> usize {
        self.indicators.len()
    }

    pub fn schema_count(&self) -> usize {
        self.schemas.len()
    }
}

impl MetadataStore for InMemoryStore {
    fn indicator(&self, code: &str) -> Option<IndicatorMetadata> {
        self.indicators.get(code).cloned()
    }

    fn dataflow_schema(&self, id: &str) -> Option<DataflowSchema> {
        self.schemas.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::{Role, Tier};

    const CATALOG: &str = r#"
    {
      "indicators": [
        {
          "code": "CME_MRY0T4",
          "name": "Under-five mortality rate",
          "dataflows": ["GLOBAL_DATAFLOW", "CME"],
          "disaggregations": ["SEX", "WEALTH_QUINTILE"],
          "disaggregations_with_totals": ["SEX", "WEALTH_QUINTILE"]
        }
      ],
      "dataflows": [
        {
          "id": "CME",
          "version": "1.0",
          "dimensions": [
            {"name": "REF_AREA", "position": 1},
            {"name": "INDICATOR", "position": 2},
            {"name": "SEX", "position": 3, "has_total": true},
            {"name": "WEALTH_QUINTILE", "position": 4, "has_total": true}
          ],
          "attributes": [{"name": "UNIT_MEASURE"}, {"name": "OBS_STATUS"}]
        }
      ]
    }"#;

    #[test]
    fn loads_json_catalog() {
        let store = InMemoryStore::from_json_str(CATALOG).unwrap();
        let m = store.indicator("CME_MRY0T4").unwrap();
        assert_eq!(m.dataflows, vec!["CME", "GLOBAL_DATAFLOW"]);
        assert_eq!(m.tier, Tier::HasMetadataAndData);

        let s = store.dataflow_schema("CME").unwrap();
        assert_eq!(s.time_dimension, "TIME_PERIOD");
        assert_eq!(s.role_of("REF_AREA"), Role::Country);
        assert!(store.dataflow_schema("NUTRITION").is_none());
    }

    #[test]
    fn loads_catalog_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, CATALOG).unwrap();
        let store = InMemoryStore::from_json_path(&path).unwrap();
        assert_eq!(store.indicator_count(), 1);
        assert_eq!(store.schema_count(), 1);
    }

    #[test]
    fn invalid_entries_are_rejected() {
        let bad = r#"{"indicators":[{"code":"X_Y","dataflows":["CME"],"tier":"metadata_only"}]}"#;
        assert!(matches!(
            InMemoryStore::from_json_str(bad),
            Err(Error::InvalidMetadata(_))
        ));
    }
}
