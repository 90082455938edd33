use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Indicator identifier, e.g. `"CME_MRY0T4"`.
pub type IndicatorCode = String;
/// Dataflow identifier, e.g. `"CME"` or `"GLOBAL_DATAFLOW"`.
pub type DataflowId = String;

/// The generic catch-all dataflow with the fewest disaggregation dimensions.
pub const GLOBAL_DATAFLOW: &str = "GLOBAL_DATAFLOW";

/// The SDMX code meaning "total" for a disaggregation dimension.
pub const TOTAL_CODE: &str = "_T";

/// How to specify dates in API queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateSpec {
    /// Single year like 2020
    Year(i32),
    /// Inclusive range like 2000..=2020
    Range { start: i32, end: i32 },
    /// Everything from this year on
    From(i32),
    /// Everything up to and including this year
    Until(i32),
}

impl DateSpec {
    /// Build from optional bounds; `None` when both are absent.
    pub fn from_bounds(start: Option<i32>, end: Option<i32>) -> Option<Self> {
        match (start, end) {
            (Some(s), Some(e)) if s == e => Some(DateSpec::Year(s)),
            (Some(start), Some(end)) => Some(DateSpec::Range { start, end }),
            (Some(s), None) => Some(DateSpec::From(s)),
            (None, Some(e)) => Some(DateSpec::Until(e)),
            (None, None) => None,
        }
    }

    /// SDMX REST `startPeriod` / `endPeriod` parameters.
    pub fn to_query_params(&self) -> Vec<(String, String)> {
        let (start, end) = match *self {
            DateSpec::Year(y) => (Some(y), Some(y)),
            DateSpec::Range { start, end } => (Some(start), Some(end)),
            DateSpec::From(s) => (Some(s), None),
            DateSpec::Until(e) => (None, Some(e)),
        };
        let mut out = Vec::new();
        if let Some(s) = start {
            out.push(("startPeriod".to_string(), s.to_string()));
        }
        if let Some(e) = end {
            out.push(("endPeriod".to_string(), e.to_string()));
        }
        out
    }
}

/// Whether an indicator has metadata, data, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    HasMetadataAndData,
    MetadataOnly,
    DataOnly,
}

/// Catalog entry for one indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorMetadata {
    pub code: IndicatorCode,
    #[serde(default)]
    pub name: String,
    /// Declared dataflows in priority order; `GLOBAL_DATAFLOW` is last when present.
    #[serde(default)]
    pub dataflows: Vec<DataflowId>,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub disaggregations: BTreeSet<String>,
    /// Dimensions of `disaggregations` that carry a `_T` total code.
    #[serde(default)]
    pub disaggregations_with_totals: BTreeSet<String>,
}

impl IndicatorMetadata {
    pub fn new(code: impl Into<String>, dataflows: &[&str]) -> Self {
        Self {
            code: code.into(),
            name: String::new(),
            dataflows: dataflows.iter().map(|d| d.to_string()).collect(),
            tier: Tier::HasMetadataAndData,
            disaggregations: BTreeSet::new(),
            disaggregations_with_totals: BTreeSet::new(),
        }
    }

    /// Mark `dims` as disaggregations of this indicator that support `_T`.
    pub fn with_totals(mut self, dims: &[&str]) -> Self {
        for d in dims {
            self.disaggregations.insert(d.to_string());
            self.disaggregations_with_totals.insert(d.to_string());
        }
        self
    }

    /// Mark `dims` as disaggregations without a `_T` total.
    pub fn with_disaggregations(mut self, dims: &[&str]) -> Self {
        self.disaggregations
            .extend(dims.iter().map(|d| d.to_string()));
        self
    }

    /// Check invariants and canonicalize the dataflow list
    /// (duplicates removed, `GLOBAL_DATAFLOW` moved last).
    pub fn validate(mut self) -> Result<Self> {
        if self.code.trim().is_empty() {
            return Err(Error::InvalidMetadata("empty indicator code".into()));
        }
        if !self.dataflows.is_empty() && self.tier == Tier::MetadataOnly {
            return Err(Error::InvalidMetadata(format!(
                "{} declares dataflows but is tiered metadata-only",
                self.code
            )));
        }
        if let Some(extra) = self
            .disaggregations_with_totals
            .difference(&self.disaggregations)
            .next()
        {
            return Err(Error::InvalidMetadata(format!(
                "{}: total-capable dimension {} is not a disaggregation",
                self.code, extra
            )));
        }

        let mut seen = BTreeSet::new();
        let mut flows: Vec<DataflowId> = Vec::with_capacity(self.dataflows.len());
        let mut has_global = false;
        for d in self.dataflows.drain(..) {
            let d = d.trim().to_string();
            if d.is_empty() || !seen.insert(d.clone()) {
                continue;
            }
            if d == GLOBAL_DATAFLOW {
                has_global = true;
            } else {
                flows.push(d);
            }
        }
        if has_global {
            flows.push(GLOBAL_DATAFLOW.to_string());
        }
        self.dataflows = flows;
        Ok(self)
    }
}

/// What a dataflow column means, resolved once when a schema is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Country,
    Indicator,
    Time,
    Measure,
    #[default]
    Other,
}

/// Names a country dimension goes by across UNICEF dataflows.
const COUNTRY_DIMENSIONS: &[&str] = &["REF_AREA", "COUNTRY"];
const COUNTRY_CODELISTS: &[&str] = &["CL_COUNTRY", "CL_AREA", "CL_REF_AREA"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    /// 1-based position in the series key.
    pub position: usize,
    #[serde(default)]
    pub codelist_ref: Option<String>,
    /// Schema-level hint that the codelist contains `_T`.
    #[serde(default)]
    pub has_total: bool,
    #[serde(default)]
    pub role: Role,
}

impl Dimension {
    pub fn new(name: impl Into<String>, position: usize) -> Self {
        Self {
            name: name.into(),
            position,
            codelist_ref: None,
            has_total: false,
            role: Role::Other,
        }
    }

    pub fn with_total(mut self) -> Self {
        self.has_total = true;
        self
    }

    pub fn with_codelist(mut self, codelist: impl Into<String>) -> Self {
        self.codelist_ref = Some(codelist.into());
        self
    }

    fn infer_role(&self) -> Role {
        let name = self.name.to_ascii_uppercase();
        if COUNTRY_DIMENSIONS.contains(&name.as_str()) {
            return Role::Country;
        }
        if let Some(cl) = &self.codelist_ref {
            if COUNTRY_CODELISTS.contains(&cl.to_ascii_uppercase().as_str()) {
                return Role::Country;
            }
        }
        if name == "INDICATOR" {
            return Role::Indicator;
        }
        Role::Other
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(default)]
    pub codelist_ref: Option<String>,
}

fn default_time_dimension() -> String {
    "TIME_PERIOD".into()
}

fn default_primary_measure() -> String {
    "OBS_VALUE".into()
}

/// Dimensional layout of one dataflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataflowSchema {
    pub id: DataflowId,
    #[serde(default)]
    pub agency: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Series-key dimensions in position order (the time dimension is not among them).
    pub dimensions: Vec<Dimension>,
    #[serde(default = "default_time_dimension")]
    pub time_dimension: String,
    #[serde(default = "default_primary_measure")]
    pub primary_measure: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl DataflowSchema {
    /// Schema with the standard SDMX time dimension and measure.
    pub fn new(id: impl Into<String>, dimensions: Vec<Dimension>) -> Self {
        Self {
            id: id.into(),
            agency: None,
            version: None,
            name: None,
            dimensions,
            time_dimension: default_time_dimension(),
            primary_measure: default_primary_measure(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attributes(mut self, names: &[&str]) -> Self {
        self.attributes.extend(names.iter().map(|n| Attribute {
            name: n.to_string(),
            codelist_ref: None,
        }));
        self
    }

    /// Sort dimensions by position, check positions are exactly `1..=N`,
    /// and resolve each dimension's role.
    pub fn validate(mut self) -> Result<Self> {
        if self.dimensions.is_empty() {
            return Err(Error::InvalidSchema(format!("{} has no dimensions", self.id)));
        }
        self.dimensions.sort_by_key(|d| d.position);
        for (i, d) in self.dimensions.iter().enumerate() {
            if d.position != i + 1 {
                return Err(Error::InvalidSchema(format!(
                    "{}: dimension positions are not contiguous from 1 (found {} at index {})",
                    self.id, d.position, i
                )));
            }
            if d.name.eq_ignore_ascii_case(&self.time_dimension) {
                return Err(Error::InvalidSchema(format!(
                    "{}: time dimension {} must not be part of the series key",
                    self.id, d.name
                )));
            }
        }
        for d in &mut self.dimensions {
            if d.role == Role::Other {
                d.role = d.infer_role();
            }
        }
        Ok(self)
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    pub fn dimension_names(&self) -> Vec<&str> {
        self.dimensions.iter().map(|d| d.name.as_str()).collect()
    }

    /// Role of a response column under this schema.
    pub fn role_of(&self, column: &str) -> Role {
        if column.eq_ignore_ascii_case(&self.time_dimension) {
            return Role::Time;
        }
        if column.eq_ignore_ascii_case(&self.primary_measure) {
            return Role::Measure;
        }
        self.dimension(column).map(|d| d.role).unwrap_or(Role::Other)
    }

    pub fn is_attribute(&self, column: &str) -> bool {
        self.attributes
            .iter()
            .any(|a| a.name.eq_ignore_ascii_case(column))
    }
}

/// Positional SDMX series key, e.g. `USA.CME_MRY0T4.._T`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn from_segments<S: AsRef<str>>(segments: &[S]) -> Self {
        QueryKey(
            segments
                .iter()
                .map(|s| s.as_ref())
                .collect::<Vec<_>>()
                .join("."),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> Vec<&str> {
        self.0.split('.').collect()
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entry in the API's dataflow list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataflowInfo {
    pub id: DataflowId,
    pub agency: String,
    pub version: String,
    pub name: String,
}

/// Tidy structure used by this crate (one row = one observation).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservationRow {
    pub indicator: IndicatorCode,
    pub iso3: String,
    /// Decimal year; `2019-07` becomes `2019.5`.
    pub period: f64,
    pub value: Option<f64>,
    /// Disaggregation columns keyed by canonical name (`sex`, `age`, `wealth_quintile`, ...).
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
    /// Quality and source attributes (`unit`, `obs_status`, `data_source`, ...).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ObservationRow {
    /// Look up any canonical column by name.
    pub fn get(&self, column: &str) -> Option<String> {
        match column {
            "indicator" => Some(self.indicator.clone()),
            "iso3" => Some(self.iso3.clone()),
            "period" => Some(format_period(self.period)),
            "value" => self.value.map(|v| v.to_string()),
            other => self
                .dimensions
                .get(other)
                .or_else(|| self.attributes.get(other))
                .cloned(),
        }
    }

    pub fn sex(&self) -> Option<&str> {
        self.dimensions.get("sex").map(String::as_str)
    }

    /// Calendar year of the observation.
    pub fn year(&self) -> i32 {
        self.period.floor() as i32
    }
}

fn format_period(p: f64) -> String {
    if p.fract() == 0.0 {
        format!("{}", p as i64)
    } else {
        format!("{}", p)
    }
}

/// Column names of a table of rows: the four required columns first,
/// then disaggregations, then attributes, each in first-seen order.
pub fn columns(rows: &[ObservationRow]) -> Vec<String> {
    let mut out: Vec<String> = ["indicator", "iso3", "period", "value"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let mut dims: Vec<String> = Vec::new();
    let mut attrs: Vec<String> = Vec::new();
    for r in rows {
        for k in r.dimensions.keys() {
            if !dims.contains(k) {
                dims.push(k.clone());
            }
        }
        for k in r.attributes.keys() {
            if !attrs.contains(k) {
                attrs.push(k.clone());
            }
        }
    }
    out.extend(dims);
    out.extend(attrs);
    out
}

/// Grouping key identifying one series: indicator, country and disaggregation values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub indicator: IndicatorCode,
    pub iso3: String,
    pub disaggregation: Vec<(String, String)>,
}

impl From<&ObservationRow> for GroupKey {
    fn from(r: &ObservationRow) -> Self {
        Self {
            indicator: r.indicator.clone(),
            iso3: r.iso3.clone(),
            disaggregation: r
                .dimensions
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}
