//! Composite dashboard aggregate stored under `data.dashboardSummary`.
//!
//! All counters live in one value so subscribers never observe a total that
//! disagrees with its breakdown.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::status::StatusBucket;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    #[serde(default)]
    pub total_applications: u64,
    /// Bucket name to count. Unknown names from the server are kept as-is.
    #[serde(default)]
    pub status_breakdown: BTreeMap<String, u64>,
    /// Approved share of all applications, in percent with one decimal.
    #[serde(default)]
    pub approval_rate: f64,
    #[serde(default)]
    pub total_loan_amount: f64,
    #[serde(default)]
    pub is_demo: bool,
    /// Server fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DashboardSummary {
    pub fn count(&self, bucket: StatusBucket) -> u64 {
        self.status_breakdown
            .get(bucket.as_str())
            .copied()
            .unwrap_or(0)
    }

    pub fn increment(&mut self, bucket: StatusBucket) {
        *self
            .status_breakdown
            .entry(bucket.as_str().to_string())
            .or_insert(0) += 1;
    }

    /// Decrement with a floor of zero. Returns `false` when the bucket was
    /// already empty.
    pub fn decrement(&mut self, bucket: StatusBucket) -> bool {
        match self.status_breakdown.get_mut(bucket.as_str()) {
            Some(slot) if *slot > 0 => {
                *slot -= 1;
                true
            }
            _ => false,
        }
    }

    /// Recompute metrics derived from the counters.
    pub fn recompute_derived(&mut self) {
        self.approval_rate = if self.total_applications == 0 {
            0.0
        } else {
            let ratio = self.count(StatusBucket::Approved) as f64 / self.total_applications as f64;
            (ratio * 1000.0).round() / 10.0
        };
    }
}
