//! The page-level notice under `ui.banner`.

use chrono::{DateTime, Utc};
use dashboard_state::{AlertLevel, Store, keys};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BannerReason {
    DemoData,
    ChannelUnavailable,
    ActionFailed,
    SessionExpired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Banner {
    pub level: AlertLevel,
    pub reason: BannerReason,
    pub message: String,
    pub at: DateTime<Utc>,
}

pub fn show(store: &Store, level: AlertLevel, reason: BannerReason, message: impl Into<String>) {
    let banner = Banner {
        level,
        reason,
        message: message.into(),
        at: Utc::now(),
    };
    if let Err(err) = store.set_serialized(keys::BANNER, &banner) {
        warn!(error = %err, "banner did not serialize");
    }
}

/// Clear the banner if it is currently showing `reason`.
pub fn dismiss(store: &Store, reason: BannerReason) {
    let showing = current(store).is_some_and(|banner| banner.reason == reason);
    if showing {
        store.set_state(keys::BANNER, serde_json::Value::Null);
    }
}

pub fn current(store: &Store) -> Option<Banner> {
    match store.get_state(keys::BANNER) {
        None | Some(serde_json::Value::Null) => None,
        Some(_) => store.get_as(keys::BANNER),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dismiss_only_clears_matching_reason() {
        let store = Store::new();
        show(&store, AlertLevel::Info, BannerReason::DemoData, "demo");
        dismiss(&store, BannerReason::ActionFailed);
        assert_eq!(current(&store).map(|b| b.reason), Some(BannerReason::DemoData));

        dismiss(&store, BannerReason::DemoData);
        assert_eq!(current(&store), None);
    }
}
