//! Shared state for the loan pipeline dashboards.
//!
//! Everything here is synchronous and free of I/O: the keyed [`Store`], the
//! push-event normalizer, the reconciler that folds events into the dashboard
//! aggregate, and the binding layer views use to subscribe.

pub mod action;
pub mod binding;
pub mod event;
pub mod history;
pub mod keys;
pub mod reconciler;
pub mod status;
pub mod store;
pub mod summary;

pub use action::{ActionDispatcher, ActionReceiver, Decision, DispatchError, ViewAction, action_channel};
pub use binding::{View, ViewBinding, bind, bind_selector};
pub use event::{
    ControlMessage, DomainEvent, EventKind, Inbound, NormalizeError, NormalizedEvent, normalize,
    normalize_value,
};
pub use history::{ACTIVITY_FEED_CAPACITY, ALERT_HISTORY_CAPACITY, History};
pub use reconciler::{
    ActivityEntry, Alert, AlertLevel, Highlight, HighlightTarget, Reconciler, Reconciliation,
    SlaBadge, SlaLevel, Transition, reconcile,
};
pub use status::{StatusBucket, StatusIndex, index_applications};
pub use store::{Store, Subscription};
pub use summary::DashboardSummary;
