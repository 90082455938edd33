//! Positional SDMX series keys.
//!
//! A key has exactly one slot per series dimension, in schema position order,
//! joined by dots. A slot that is empty means "all values". Getting the order
//! wrong does not fail: the API just answers with nothing, so every slot is
//! derived from the schema, never from a fixed layout.

use crate::error::Result;
use crate::metadata::MetadataStore;
use crate::models::{DataflowSchema, IndicatorMetadata, QueryKey, Role, TOTAL_CODE};
use crate::schema::SchemaCache;
use std::sync::Arc;

const SEX_DIMENSION: &str = "SEX";

pub struct QueryKeyBuilder {
    cache: Arc<SchemaCache>,
    store: Arc<dyn MetadataStore>,
}

impl QueryKeyBuilder {
    pub fn new(cache: Arc<SchemaCache>, store: Arc<dyn MetadataStore>) -> Self {
        Self { cache, store }
    }

    /// Key for `indicator_code` in `dataflow_id` with the country slot left open.
    ///
    /// Fails with `SchemaNotFound` when the dataflow's layout is unknown.
    pub fn build_key(
        &self,
        indicator_code: &str,
        dataflow_id: &str,
        sex_filter: Option<&str>,
        nofilter: bool,
    ) -> Result<QueryKey> {
        self.build_key_for_countries(indicator_code, dataflow_id, &[], sex_filter, nofilter)
    }

    /// Like [`build_key`](Self::build_key), with the country slot set to `countries`.
    pub fn build_key_for_countries(
        &self,
        indicator_code: &str,
        dataflow_id: &str,
        countries: &[String],
        sex_filter: Option<&str>,
        nofilter: bool,
    ) -> Result<QueryKey> {
        let schema = self.cache.get_schema(dataflow_id)?;
        let meta = self.store.indicator(indicator_code);
        Ok(key_for_schema(
            &schema,
            indicator_code,
            meta.as_ref(),
            countries,
            sex_filter,
            nofilter,
        ))
    }
}

/// Whether `dimension` can be pinned to `_T` for this indicator.
///
/// Indicator metadata is authoritative when it declares disaggregations;
/// otherwise the schema hint is used.
fn supports_total(
    schema: &DataflowSchema,
    dimension: &str,
    meta: Option<&IndicatorMetadata>,
) -> bool {
    match meta {
        Some(m) if !m.disaggregations.is_empty() => m
            .disaggregations_with_totals
            .iter()
            .any(|d| d.eq_ignore_ascii_case(dimension)),
        _ => schema.dimension(dimension).is_some_and(|d| d.has_total),
    }
}

pub fn key_for_schema(
    schema: &DataflowSchema,
    indicator_code: &str,
    meta: Option<&IndicatorMetadata>,
    countries: &[String],
    sex_filter: Option<&str>,
    nofilter: bool,
) -> QueryKey {
    let sex_override = sex_filter
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != TOTAL_CODE);

    let slots: Vec<String> = schema
        .dimensions
        .iter()
        .map(|d| match (d.role, sex_override) {
            (Role::Indicator, _) => indicator_code.to_string(),
            (Role::Country, _) => join_countries(countries),
            (_, Some(sex)) if d.name.eq_ignore_ascii_case(SEX_DIMENSION) => sex.to_string(),
            _ if nofilter => String::new(),
            _ if supports_total(schema, &d.name, meta) => TOTAL_CODE.to_string(),
            _ => String::new(),
        })
        .collect();
    QueryKey::from_segments(&slots)
}

/// Key used when no schema is available: country, indicator, then everything open.
pub fn default_key(indicator_code: &str, countries: &[String]) -> QueryKey {
    QueryKey::from_segments(&[join_countries(countries), indicator_code.to_string(), String::new()])
}

fn join_countries(countries: &[String]) -> String {
    countries
        .iter()
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("+")
}
