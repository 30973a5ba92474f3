//! Store keys shared by the reconciler, the sync runtime and the views.
//!
//! Application-domain keys (`data.*`) are written by the reconciler, the
//! polling refresh and user-action handlers. Connection keys are written only
//! by the connection manager.

pub const DASHBOARD_SUMMARY: &str = "data.dashboardSummary";
pub const APPLICATIONS: &str = "data.applications";
pub const APPLICATION_STATUSES: &str = "data.applicationStatuses";
pub const QUEUE: &str = "data.queue";
pub const SLA_ANALYTICS: &str = "data.slaAnalytics";
pub const INVESTOR_METRICS: &str = "data.investorMetrics";
pub const SLA_BADGES: &str = "data.slaBadges";
pub const ACTIVITY_FEED: &str = "data.activityFeed";

pub const WS_STATUS: &str = "ui.wsStatus";
pub const ALERTS: &str = "ui.alerts";
pub const HIGHLIGHT: &str = "ui.highlight";
pub const BANNER: &str = "ui.banner";

pub const CURRENT_PAGE: &str = "navigation.currentPage";
pub const SESSION_INVALID: &str = "session.invalid";
