use crate::models::{GroupKey, ObservationRow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Optional reductions applied to a fetched table, in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostProcess {
    /// Remove rows whose value is missing.
    pub dropna: bool,
    /// Keep the `n` most recent periods of each series.
    pub mrv: Option<usize>,
    /// Keep only the most recent non-missing observation of each series.
    pub latest: bool,
}

impl PostProcess {
    pub fn is_noop(&self) -> bool {
        !self.dropna && self.mrv.is_none() && !self.latest
    }

    pub fn apply(&self, mut rows: Vec<ObservationRow>) -> Vec<ObservationRow> {
        if self.dropna {
            rows = drop_missing(rows);
        }
        if let Some(n) = self.mrv {
            rows = most_recent(rows, n);
        }
        if self.latest {
            rows = latest(rows);
        }
        rows
    }
}

pub fn drop_missing(rows: Vec<ObservationRow>) -> Vec<ObservationRow> {
    rows.into_iter().filter(|r| r.value.is_some()).collect()
}

/// Keep rows within the `n` latest distinct periods of their series. Order is preserved.
pub fn most_recent(rows: Vec<ObservationRow>, n: usize) -> Vec<ObservationRow> {
    let mut periods: BTreeMap<GroupKey, Vec<f64>> = BTreeMap::new();
    for r in &rows {
        periods.entry(GroupKey::from(r)).or_default().push(r.period);
    }
    let cutoff: BTreeMap<GroupKey, f64> = periods
        .into_iter()
        .filter_map(|(key, mut ps)| {
            ps.sort_by(|a, b| b.total_cmp(a));
            ps.dedup();
            ps.into_iter().take(n).last().map(|p| (key, p))
        })
        .collect();
    rows.into_iter()
        .filter(|r| {
            cutoff
                .get(&GroupKey::from(r))
                .is_some_and(|&min| r.period >= min)
        })
        .collect()
}

/// One row per series: the latest period with a value (first such row on ties).
pub fn latest(rows: Vec<ObservationRow>) -> Vec<ObservationRow> {
    let mut best: BTreeMap<GroupKey, (f64, usize)> = BTreeMap::new();
    for (i, r) in rows.iter().enumerate() {
        if r.value.is_none() {
            continue;
        }
        let e = best.entry(GroupKey::from(r)).or_insert((r.period, i));
        if r.period > e.0 {
            *e = (r.period, i);
        }
    }
    let mut keep: Vec<usize> = best.into_values().map(|(_, i)| i).collect();
    keep.sort_unstable();
    let mut keep = keep.into_iter().peekable();
    rows.into_iter()
        .enumerate()
        .filter_map(|(i, r)| {
            if keep.peek() == Some(&i) {
                keep.next();
                Some(r)
            } else {
                None
            }
        })
        .collect()
}
