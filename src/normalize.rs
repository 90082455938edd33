//! SDMX CSV → canonical [`ObservationRow`]s.
//!
//! Columns are mapped by semantic role, not by dataflow: whatever the country
//! dimension is called becomes `iso3`, the time dimension becomes `period`,
//! the primary measure becomes `value`. Everything else keeps its SDMX id,
//! lower-cased. No row is ever dropped for being a disaggregation.

use crate::error::{Error, Result};
use crate::models::{DataflowSchema, ObservationRow, Role};
use crate::schema::SchemaCache;
use chrono::{Datelike, NaiveDate};
use log::warn;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Markers the API and upstream sources use for "no value".
const MISSING_MARKERS: &[&str] = &[
    "", "NA", "N/A", "NAN", "..", "-", "<NA>", "NULL", "NONE", "NP", "NOT AVAILABLE",
];

/// SDMX attributes commonly found in UNICEF responses, used when no schema is known.
const KNOWN_ATTRIBUTES: &[&str] = &[
    "UNIT_MEASURE",
    "UNIT_MULTIPLIER",
    "OBS_STATUS",
    "OBS_CONF",
    "OBS_FOOTNOTE",
    "SERIES_FOOTNOTE",
    "LOWER_BOUND",
    "UPPER_BOUND",
    "WGTD_SAMPL_SIZE",
    "DATA_SOURCE",
    "SOURCE_LINK",
    "CUSTODIAN",
    "TIME_PERIOD_METHOD",
    "REF_PERIOD",
    "COVERAGE_TIME",
];

/// Bookkeeping columns that carry no observation data.
const SKIPPED_COLUMNS: &[&str] = &["DATAFLOW", "STRUCTURE", "STRUCTURE_ID", "ACTION"];

/// Parsed CSV body: upper-case SDMX column ids plus raw cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Parse an SDMX CSV body. Empty and header-only bodies give zero rows.
    pub fn from_csv(body: &str) -> Result<Self> {
        let body = body.trim_start_matches('\u{feff}').trim();
        if body.is_empty() {
            return Ok(RawTable::default());
        }
        if body.starts_with('<') || body.starts_with('{') {
            return Err(Error::Parse("response body is not CSV".into()));
        }

        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(body.as_bytes());
        let headers: Vec<String> = rdr.headers()?.iter().map(clean_header).collect();
        if headers.iter().all(|h| h.is_empty()) {
            return Err(Error::Parse("CSV header row is empty".into()));
        }

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            if record.iter().all(|c| c.trim().is_empty()) {
                continue;
            }
            rows.push(record.iter().map(|c| c.trim().to_string()).collect());
        }
        Ok(RawTable { headers, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// `REF_AREA:Geographic area` → `REF_AREA`
fn clean_header(h: &str) -> String {
    h.split(':').next().unwrap_or("").trim().to_ascii_uppercase()
}

#[derive(Debug, Clone, PartialEq)]
enum Target {
    Indicator,
    Iso3,
    Period,
    Value,
    Dimension(String),
    Attribute(String),
    Skip,
}

fn attribute_name(column: &str) -> String {
    match column {
        "UNIT_MEASURE" => "unit".to_string(),
        other => other.to_ascii_lowercase(),
    }
}

fn target_for(column: &str, schema: Option<&DataflowSchema>) -> Target {
    if SKIPPED_COLUMNS.contains(&column) || column.is_empty() {
        return Target::Skip;
    }
    let role = match schema {
        Some(s) => s.role_of(column),
        None => match column {
            "REF_AREA" | "COUNTRY" => Role::Country,
            "INDICATOR" => Role::Indicator,
            "TIME_PERIOD" => Role::Time,
            "OBS_VALUE" => Role::Measure,
            _ => Role::Other,
        },
    };
    match role {
        Role::Country => Target::Iso3,
        Role::Indicator => Target::Indicator,
        Role::Time => Target::Period,
        Role::Measure => Target::Value,
        Role::Other => {
            let is_dimension = match schema {
                Some(s) => s.dimension(column).is_some(),
                None => !KNOWN_ATTRIBUTES.contains(&column),
            };
            if is_dimension {
                Target::Dimension(column.to_ascii_lowercase())
            } else {
                Target::Attribute(attribute_name(column))
            }
        }
    }
}

/// `2019` → 2019.0, `2019-07` → 2019.5, `2019-07-01` → 2019.5.
pub fn parse_period(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Ok(y) = s.parse::<i32>() {
        return Some(y as f64);
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d"))
        .ok()?;
    Some(date.year() as f64 + date.month0() as f64 / 12.0)
}

/// Numeric value, or `None` for blanks and "not available" markers. Never zero-filled.
pub fn parse_value(s: &str) -> Option<f64> {
    let s = s.trim();
    if MISSING_MARKERS.contains(&s.to_ascii_uppercase().as_str()) {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Map `raw` onto canonical rows. `indicator_code` fills rows whose indicator cell is empty.
pub fn normalize_rows(
    raw: &RawTable,
    schema: Option<&DataflowSchema>,
    indicator_code: &str,
) -> Vec<ObservationRow> {
    let plan: Vec<Target> = raw.headers.iter().map(|h| target_for(h, schema)).collect();
    let mut out = Vec::with_capacity(raw.rows.len());

    for (line, cells) in raw.rows.iter().enumerate() {
        let mut row = ObservationRow {
            indicator: String::new(),
            iso3: String::new(),
            period: f64::NAN,
            value: None,
            dimensions: BTreeMap::new(),
            attributes: BTreeMap::new(),
        };
        let mut period_cell = "";
        for (target, cell) in plan.iter().zip(cells.iter()) {
            match target {
                Target::Indicator => row.indicator = cell.clone(),
                Target::Iso3 => row.iso3 = cell.clone(),
                Target::Period => period_cell = cell.as_str(),
                Target::Value => row.value = parse_value(cell),
                Target::Dimension(name) if !cell.is_empty() => {
                    row.dimensions.insert(name.clone(), cell.clone());
                }
                Target::Attribute(name) if !cell.is_empty() => {
                    row.attributes.insert(name.clone(), cell.clone());
                }
                _ => {}
            }
        }
        match parse_period(period_cell) {
            Some(p) => row.period = p,
            None => {
                warn!("skipping row {}: unparseable period {:?}", line + 1, period_cell);
                continue;
            }
        }
        if row.indicator.is_empty() {
            row.indicator = indicator_code.to_string();
        }
        out.push(row);
    }
    out
}

/// Schema-aware normalizer backed by the session's schema cache.
pub struct Normalizer {
    cache: Arc<SchemaCache>,
}

impl Normalizer {
    pub fn new(cache: Arc<SchemaCache>) -> Self {
        Self { cache }
    }

    /// Normalize rows returned by `dataflow_id`. Without a schema the
    /// standard SDMX column ids are assumed.
    pub fn normalize(
        &self,
        raw: &RawTable,
        dataflow_id: &str,
        indicator_code: &str,
    ) -> Vec<ObservationRow> {
        let schema = self.cache.get_schema(dataflow_id).ok();
        normalize_rows(raw, schema.as_deref(), indicator_code)
    }
}
