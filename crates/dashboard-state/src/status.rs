//! Application status buckets.
//!
//! The bucket set is closed: these are the only counters the dashboards know
//! how to render. Server status strings are matched case- and
//! separator-insensitively, so `UNDER_REVIEW`, `under-review` and
//! `underReview` land in the same bucket. Anything else maps to `None`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusBucket {
    Pending,
    UnderReview,
    Approved,
    Rejected,
    Funded,
}

/// Locally tracked status per application id.
pub type StatusIndex = BTreeMap<String, StatusBucket>;

impl StatusBucket {
    pub const ALL: [StatusBucket; 5] = [
        StatusBucket::Pending,
        StatusBucket::UnderReview,
        StatusBucket::Approved,
        StatusBucket::Rejected,
        StatusBucket::Funded,
    ];

    /// Key used in `statusBreakdown`.
    pub fn as_str(self) -> &'static str {
        match self {
            StatusBucket::Pending => "pending",
            StatusBucket::UnderReview => "underReview",
            StatusBucket::Approved => "approved",
            StatusBucket::Rejected => "rejected",
            StatusBucket::Funded => "funded",
        }
    }

    pub fn from_status(raw: &str) -> Option<Self> {
        let folded: String = raw
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match folded.as_str() {
            "pending" | "submitted" => Some(StatusBucket::Pending),
            "underreview" | "inreview" => Some(StatusBucket::UnderReview),
            "approved" => Some(StatusBucket::Approved),
            "rejected" | "declined" => Some(StatusBucket::Rejected),
            "funded" => Some(StatusBucket::Funded),
            _ => None,
        }
    }
}

/// Build the tracked index from application records (`{"id", "status"}`).
/// Records with a missing id or an unmapped status are skipped.
pub fn index_applications<'a>(items: impl IntoIterator<Item = &'a Value>) -> StatusIndex {
    items
        .into_iter()
        .filter_map(|item| {
            let id = match item.get("id")? {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            let bucket = StatusBucket::from_status(item.get("status")?.as_str()?)?;
            Some((id, bucket))
        })
        .collect()
}

impl fmt::Display for StatusBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
