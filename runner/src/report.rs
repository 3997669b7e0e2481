use crate::{metrics::Latencies, Case};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Report {
    pub cases: Vec<CaseReport>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CaseReport {
    pub storage_class: Option<String>,
    pub file_count: u32,
    pub dir_count: u32,
    pub dir_depth: u32,
    pub durations_ms: Vec<u64>,
    pub histogram: Option<ReportHistogram>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReportHistogram {
    count: u64,
    min: u64,
    max: u64,
    mean: f64,
    std_dev: f64,
    percentiles: Vec<Percentile>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Percentile {
    percentile: f64,
    value: u64,
}

const PERCENTILES: [f64; 3] = [50.0, 90.0, 99.0];

// === impl Report ===

impl Report {
    pub fn failed(&self) -> usize {
        self.cases.iter().filter(|c| c.error.is_some()).count()
    }
}

// === impl CaseReport ===

impl CaseReport {
    /// Reports whatever was measured, along with the error that ended the case, if any.
    pub fn new(case: &Case, latencies: &Latencies, error: Option<String>) -> Self {
        let histogram = if latencies.samples().is_empty() {
            None
        } else {
            Some(ReportHistogram::from(latencies))
        };
        Self {
            storage_class: case.storage_class.clone(),
            file_count: case.tree.files,
            dir_count: case.tree.dirs,
            dir_depth: case.tree.depth,
            durations_ms: latencies
                .samples()
                .iter()
                .map(|d| d.as_millis() as u64)
                .collect(),
            histogram,
            error,
        }
    }
}

// === impl ReportHistogram ===

impl From<&Latencies> for ReportHistogram {
    fn from(latencies: &Latencies) -> Self {
        let h = latencies.histogram();
        let percentiles = PERCENTILES
            .iter()
            .map(|&percentile| Percentile {
                percentile,
                value: h.value_at_percentile(percentile),
            })
            .collect();
        Self {
            count: h.len(),
            min: h.min(),
            max: h.max(),
            mean: h.mean(),
            std_dev: h.stdev(),
            percentiles,
        }
    }
}
