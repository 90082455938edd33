//! Client configuration and the fallback tables used by the resolver.

use crate::error::Result;
use crate::models::{DataflowId, GLOBAL_DATAFLOW};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// SDMX REST root, without trailing slash.
    pub base_url: String,
    pub agency: String,
    /// Dataflow version used when a schema does not declare one.
    pub default_version: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_redirects: usize,
    /// Sleep before each retry of a 5xx or network error; its length bounds the retry count.
    pub retry_backoff_ms: Vec<u64>,
    pub user_agent: String,
    pub fallback: FallbackConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            base_url: "https://sdmx.data.unicef.org/ws/public/sdmxapi/rest".into(),
            agency: "UNICEF".into(),
            default_version: "1.0".into(),
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_redirects: 5,
            retry_backoff_ms: vec![100, 300, 700],
            user_agent: concat!("unicef_sdmx/", env!("CARGO_PKG_VERSION")).into(),
            fallback: FallbackConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Self::from_json_str(&s)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Redirects indicator codes matching `pattern` (a regex) to `dataflow`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PatternOverride {
    pub pattern: String,
    pub dataflow: DataflowId,
}

impl PatternOverride {
    pub fn new(pattern: &str, dataflow: &str) -> Self {
        Self {
            pattern: pattern.into(),
            dataflow: dataflow.into(),
        }
    }
}

/// Static routing tables consulted after an indicator's declared dataflows.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct FallbackConfig {
    /// Checked in order; the first match wins.
    pub overrides: Vec<PatternOverride>,
    /// Indicator prefix (text before the first `_`) to dataflow.
    pub prefix_map: BTreeMap<String, DataflowId>,
    /// Catch-all dataflow, always tried last.
    pub universal: DataflowId,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        let prefix_map = [
            ("CME", "CME"),
            ("COD", "CAUSE_OF_DEATH"),
            ("DM", "DM"),
            ("ECD", "ECD"),
            ("ECON", "ECONOMIC"),
            ("ED", "EDUCATION"),
            ("FD", "FUNCTIONAL_DIFF"),
            ("GN", "GENDER"),
            ("HVA", "HIV_AIDS"),
            ("IM", "IMMUNISATION"),
            ("MG", "MG"),
            ("MNCH", "MNCH"),
            ("NT", "NUTRITION"),
            ("PT", "PT"),
            ("PV", "CHLD_PVTY"),
            ("SPP", "SOC_PROTECTION"),
            ("WS", "WASH_HOUSEHOLDS"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        FallbackConfig {
            overrides: vec![
                PatternOverride::new(r"^PT_.*FGM", "PT_FGM"),
                PatternOverride::new(r"^PT_.*(_CM_|_MRD)", "PT_CM"),
                PatternOverride::new(r"^ED_.*(UIS|SDG)", "EDUCATION_UIS_SDG"),
            ],
            prefix_map,
            universal: GLOBAL_DATAFLOW.into(),
        }
    }
}

impl FallbackConfig {
    /// A table with no overrides and no prefixes: only the universal dataflow remains.
    pub fn empty() -> Self {
        FallbackConfig {
            overrides: Vec::new(),
            prefix_map: BTreeMap::new(),
            universal: GLOBAL_DATAFLOW.into(),
        }
    }

    pub fn with_prefix(mut self, prefix: &str, dataflow: &str) -> Self {
        self.prefix_map.insert(prefix.into(), dataflow.into());
        self
    }

    pub fn with_override(mut self, pattern: &str, dataflow: &str) -> Self {
        self.overrides.push(PatternOverride::new(pattern, dataflow));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = ClientConfig::from_json_str(
            r#"{"base_url":"http://localhost:8080/rest","retry_backoff_ms":[]}"#,
        )
        .unwrap();
        assert_eq!(cfg.base_url, "http://localhost:8080/rest");
        assert!(cfg.retry_backoff_ms.is_empty());
        assert_eq!(cfg.agency, "UNICEF");
        assert_eq!(cfg.fallback.universal, GLOBAL_DATAFLOW);
        assert_eq!(cfg.fallback.prefix_map.get("NT").map(String::as_str), Some("NUTRITION"));
    }

    #[test]
    fn fallback_table_can_be_replaced() {
        let cfg = ClientConfig::from_json_str(
            r#"{"fallback":{"prefix_map":{"ZZ":"ZED"},"universal":"ALL"}}"#,
        )
        .unwrap();
        // fields not given keep the built-in table
        assert_eq!(cfg.fallback.overrides.len(), 3);
        assert_eq!(cfg.fallback.prefix_map.len(), 1);
        assert_eq!(cfg.fallback.universal, "ALL");
    }
}
