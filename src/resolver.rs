//! Indicator → ordered dataflow candidates.
//!
//! Sources are concatenated in priority order without duplicates:
//! declared dataflows from metadata, the first matching pattern override,
//! the prefix table, and finally the catch-alls. A configured universal
//! dataflow and `GLOBAL_DATAFLOW` never appear before a specific candidate,
//! and `GLOBAL_DATAFLOW` is last whenever it is present.

use crate::config::FallbackConfig;
use crate::error::Result;
use crate::models::{DataflowId, GLOBAL_DATAFLOW, IndicatorMetadata};
use regex::Regex;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct DataflowResolver {
    overrides: Vec<(Regex, DataflowId)>,
    prefix_map: BTreeMap<String, DataflowId>,
    universal: DataflowId,
}

impl DataflowResolver {
    /// Compile the override patterns of `config`.
    pub fn new(config: &FallbackConfig) -> Result<Self> {
        let overrides = config
            .overrides
            .iter()
            .map(|o| Ok((Regex::new(&o.pattern)?, o.dataflow.clone())))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            overrides,
            prefix_map: config.prefix_map.clone(),
            universal: config.universal.clone(),
        })
    }

    pub fn universal(&self) -> &str {
        &self.universal
    }

    /// Text before the first underscore, e.g. `CME` for `CME_MRY0T4`.
    pub fn prefix(indicator_code: &str) -> &str {
        indicator_code
            .split_once('_')
            .map(|(p, _)| p)
            .unwrap_or(indicator_code)
    }

    pub fn pattern_override(&self, indicator_code: &str) -> Option<&str> {
        self.overrides
            .iter()
            .find(|(re, _)| re.is_match(indicator_code))
            .map(|(_, d)| d.as_str())
    }

    pub fn prefix_dataflow(&self, indicator_code: &str) -> Option<&str> {
        self.prefix_map
            .get(Self::prefix(indicator_code))
            .map(String::as_str)
    }

    /// Ordered, duplicate-free, non-empty candidate list for `indicator_code`.
    pub fn resolve(
        &self,
        indicator_code: &str,
        metadata: Option<&IndicatorMetadata>,
    ) -> Vec<DataflowId> {
        let mut out: Vec<DataflowId> = Vec::new();
        let mut wants_global = self.universal == GLOBAL_DATAFLOW;
        let mut push = |d: &str| {
            if d == GLOBAL_DATAFLOW {
                wants_global = true;
            } else if d != self.universal && !out.iter().any(|x| x == d) {
                out.push(d.to_string());
            }
        };

        if let Some(meta) = metadata {
            for d in &meta.dataflows {
                push(d);
            }
        }
        if let Some(d) = self.pattern_override(indicator_code) {
            push(d);
        }
        if let Some(d) = self.prefix_dataflow(indicator_code) {
            push(d);
        }
        // catch-alls close the list, GLOBAL_DATAFLOW last of all
        if self.universal != GLOBAL_DATAFLOW {
            out.push(self.universal.clone());
        }
        if wants_global {
            out.push(GLOBAL_DATAFLOW.to_string());
        }
        out
    }
}
