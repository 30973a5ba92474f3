//! Applies normalized push events to the dashboard aggregate.
//!
//! [`reconcile`] is a pure transition from the previous aggregate to the next.
//! Counter changes are derived from status *transitions*: the previous bucket
//! of an application comes from the locally tracked status index when the
//! application is known, and from the event's `previousStatus` otherwise.
//! `application.updated` carries no previous status, so it only moves
//! counters for tracked applications. A
//! transition into the bucket the application already occupies changes
//! nothing, which makes duplicate delivery harmless.
//!
//! [`Reconciler`] wraps the transition with the store reads and writes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::event::{DomainEvent, EventKind, NormalizedEvent};
use crate::history::{ACTIVITY_FEED_CAPACITY, ALERT_HISTORY_CAPACITY, push_bounded};
use crate::keys;
use crate::status::{StatusBucket, StatusIndex};
use crate::store::Store;
use crate::summary::DashboardSummary;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum HighlightTarget {
    /// A summary metric, addressed by its path (`statusBreakdown.pending`).
    Metric(String),
    Application(String),
}

/// Short-lived flash signal published under `ui.highlight`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    pub targets: Vec<HighlightTarget>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub level: AlertLevel,
    pub application_id: Option<String>,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SlaLevel {
    Warning,
    Breached,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaBadge {
    pub level: SlaLevel,
    pub message: Option<String>,
    pub hours_remaining: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    /// Wire name of the event, or an action label such as `note_added`.
    pub kind: String,
    pub application_id: Option<String>,
    pub summary: String,
    pub at: DateTime<Utc>,
}

/// Counter movement caused by one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<StatusBucket>,
    pub to: StatusBucket,
}

/// Everything one event changes.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub summary: DashboardSummary,
    pub statuses: StatusIndex,
    pub transition: Option<Transition>,
    pub summary_changed: bool,
    /// The event repeated a state the aggregate already reflects.
    pub duplicate: bool,
    pub highlights: Vec<HighlightTarget>,
    pub alert: Option<Alert>,
    pub sla_badge: Option<(String, SlaBadge)>,
    pub application_patch: Option<(String, Map<String, Value>)>,
    pub activity: Option<ActivityEntry>,
}

impl Reconciliation {
    fn unchanged(summary: &DashboardSummary, statuses: &StatusIndex) -> Self {
        Self {
            summary: summary.clone(),
            statuses: statuses.clone(),
            transition: None,
            summary_changed: false,
            duplicate: false,
            highlights: Vec::new(),
            alert: None,
            sla_badge: None,
            application_patch: None,
            activity: None,
        }
    }
}

enum Step {
    Moved(Transition),
    Duplicate,
    Unmapped,
}

/// Move `entity` into `next`, decrementing whichever bucket it is leaving.
fn apply_transition(
    summary: &mut DashboardSummary,
    statuses: &mut StatusIndex,
    entity: Option<&str>,
    reported_previous: Option<&str>,
    next: Option<StatusBucket>,
) -> Step {
    let Some(next) = next else {
        return Step::Unmapped;
    };

    let tracked = entity.and_then(|id| statuses.get(id).copied());
    let reported = reported_previous.and_then(StatusBucket::from_status);

    if let (Some(tracked), Some(reported)) = (tracked, reported)
        && tracked != reported
    {
        warn!(
            application_id = entity.unwrap_or_default(),
            %tracked,
            %reported,
            "status drift: event previousStatus disagrees with tracked status"
        );
    }

    let previous = tracked.or(reported);
    if previous == Some(next) {
        return Step::Duplicate;
    }

    if let Some(previous) = previous {
        if !summary.decrement(previous) {
            warn!(
                application_id = entity.unwrap_or_default(),
                bucket = %previous,
                "bucket already at zero; clamped"
            );
        }
    } else {
        debug!(
            application_id = entity.unwrap_or_default(),
            "previous status unknown; only incrementing target bucket"
        );
    }
    summary.increment(next);
    if let Some(id) = entity {
        statuses.insert(id.to_string(), next);
    }

    Step::Moved(Transition {
        from: previous,
        to: next,
    })
}

fn metric(path: &str) -> HighlightTarget {
    HighlightTarget::Metric(path.to_string())
}

fn breakdown_metric(bucket: StatusBucket) -> HighlightTarget {
    HighlightTarget::Metric(format!("statusBreakdown.{}", bucket.as_str()))
}

/// Pure transition: `(previous aggregate, event) -> next aggregate`.
pub fn reconcile(
    summary: &DashboardSummary,
    statuses: &StatusIndex,
    event: &NormalizedEvent,
) -> Reconciliation {
    let mut out = Reconciliation::unchanged(summary, statuses);
    let entity = event.entity_id.as_deref();
    let kind = event.kind();

    let step = match &event.event {
        DomainEvent::NewApplication { applicant, .. } => {
            if entity.is_some_and(|id| out.statuses.contains_key(id)) {
                Some(Step::Duplicate)
            } else {
                out.summary.total_applications += 1;
                out.summary.increment(StatusBucket::Pending);
                if let Some(id) = entity {
                    out.statuses.insert(id.to_string(), StatusBucket::Pending);
                }
                out.highlights.push(metric("totalApplications"));
                out.activity = Some(activity(
                    kind,
                    entity,
                    match applicant {
                        Some(name) => format!("New application from {name}"),
                        None => "New application received".to_string(),
                    },
                ));
                Some(Step::Moved(Transition {
                    from: None,
                    to: StatusBucket::Pending,
                }))
            }
        }
        DomainEvent::ApprovalGranted {
            previous_status,
            loan_amount,
        } => {
            let step = apply_transition(
                &mut out.summary,
                &mut out.statuses,
                entity,
                previous_status.as_deref(),
                Some(StatusBucket::Approved),
            );
            if let Step::Moved(_) = step {
                if let Some(amount) = (*loan_amount).filter(|a| a.is_finite() && *a > 0.0) {
                    out.summary.total_loan_amount += amount;
                    out.highlights.push(metric("totalLoanAmount"));
                }
                out.activity = Some(activity(kind, entity, "Application approved".to_string()));
            }
            Some(step)
        }
        DomainEvent::RejectionIssued {
            previous_status,
            reason,
        } => {
            let step = apply_transition(
                &mut out.summary,
                &mut out.statuses,
                entity,
                previous_status.as_deref(),
                Some(StatusBucket::Rejected),
            );
            if let Step::Moved(_) = step {
                let summary = match reason {
                    Some(reason) => format!("Application rejected: {reason}"),
                    None => "Application rejected".to_string(),
                };
                out.activity = Some(activity(kind, entity, summary));
            }
            Some(step)
        }
        DomainEvent::StatusChange {
            previous_status,
            new_status,
        }
        | DomainEvent::ReviewCompleted {
            previous_status,
            new_status,
        } => {
            let step = apply_transition(
                &mut out.summary,
                &mut out.statuses,
                entity,
                previous_status.as_deref(),
                StatusBucket::from_status(new_status),
            );
            match &step {
                Step::Moved(t) => {
                    let verb = if kind == EventKind::ReviewCompleted {
                        "Review completed"
                    } else {
                        "Status changed"
                    };
                    out.activity =
                        Some(activity(kind, entity, format!("{verb}: now {}", t.to)));
                }
                Step::Unmapped => {
                    debug!(status = %new_status, "unmapped status; counters untouched");
                }
                Step::Duplicate => {}
            }
            Some(step)
        }
        DomainEvent::ApplicationUpdated { status, changes } => {
            // Counters only move for applications whose current bucket is
            // tracked; an untracked one is settled by the next refresh.
            let tracked = entity.is_some_and(|id| out.statuses.contains_key(id));
            let step = status.as_deref().filter(|_| tracked).map(|status| {
                apply_transition(
                    &mut out.summary,
                    &mut out.statuses,
                    entity,
                    None,
                    StatusBucket::from_status(status),
                )
            });
            if let Some(id) = entity {
                out.application_patch = Some((id.to_string(), changes.clone()));
                out.highlights
                    .push(HighlightTarget::Application(id.to_string()));
            }
            out.activity = Some(activity(kind, entity, "Application updated".to_string()));
            // A status repeat on an update is not a duplicate of the whole event.
            match step {
                Some(Step::Duplicate) | Some(Step::Unmapped) => None,
                other => other,
            }
        }
        DomainEvent::ApplicationAssigned { assignee } => {
            if let Some(id) = entity {
                let mut patch = Map::new();
                if let Some(assignee) = assignee {
                    patch.insert("assignedTo".to_string(), json!(assignee));
                }
                out.application_patch = Some((id.to_string(), patch));
                out.highlights
                    .push(HighlightTarget::Application(id.to_string()));
            }
            let summary = match assignee {
                Some(who) => format!("Assigned to {who}"),
                None => "Application assigned".to_string(),
            };
            out.activity = Some(activity(kind, entity, summary));
            None
        }
        DomainEvent::SlaWarning {
            message,
            hours_remaining,
        } => {
            sla_effects(
                &mut out,
                entity,
                SlaLevel::Warning,
                message.clone(),
                *hours_remaining,
                kind,
            );
            None
        }
        DomainEvent::SlaBreached { message } => {
            sla_effects(&mut out, entity, SlaLevel::Breached, message.clone(), None, kind);
            None
        }
    };

    match step {
        Some(Step::Moved(transition)) => {
            out.transition = Some(transition);
            out.summary_changed = true;
            out.summary.recompute_derived();
            if let Some(from) = transition.from {
                out.highlights.push(breakdown_metric(from));
            }
            out.highlights.push(breakdown_metric(transition.to));
            out.highlights.push(metric("approvalRate"));
            if let Some(id) = entity {
                out.highlights
                    .push(HighlightTarget::Application(id.to_string()));
            }
        }
        Some(Step::Duplicate) => {
            debug!(kind = %kind, application_id = entity.unwrap_or_default(), "duplicate delivery ignored");
            out.duplicate = true;
        }
        Some(Step::Unmapped) | None => {}
    }

    let mut seen = Vec::with_capacity(out.highlights.len());
    out.highlights.retain(|target| {
        if seen.contains(target) {
            false
        } else {
            seen.push(target.clone());
            true
        }
    });
    out
}

fn activity(kind: EventKind, entity: Option<&str>, summary: String) -> ActivityEntry {
    ActivityEntry {
        kind: kind.as_str().to_string(),
        application_id: entity.map(str::to_string),
        summary,
        at: Utc::now(),
    }
}

fn sla_effects(
    out: &mut Reconciliation,
    entity: Option<&str>,
    level: SlaLevel,
    message: Option<String>,
    hours_remaining: Option<f64>,
    kind: EventKind,
) {
    let now = Utc::now();
    let text = message.clone().unwrap_or_else(|| match (level, hours_remaining) {
        (SlaLevel::Warning, Some(hours)) => format!("SLA deadline in {hours:.1}h"),
        (SlaLevel::Warning, None) => "SLA deadline approaching".to_string(),
        (SlaLevel::Breached, _) => "SLA breached".to_string(),
    });

    if let Some(id) = entity {
        out.sla_badge = Some((
            id.to_string(),
            SlaBadge {
                level,
                message,
                hours_remaining,
                updated_at: now,
            },
        ));
        out.highlights
            .push(HighlightTarget::Application(id.to_string()));
    }
    out.alert = Some(Alert {
        level: match level {
            SlaLevel::Warning => AlertLevel::Warning,
            SlaLevel::Breached => AlertLevel::Critical,
        },
        application_id: entity.map(str::to_string),
        message: text.clone(),
        at: now,
    });
    out.activity = Some(activity(kind, entity, text));
}

/// Store-backed reconciler.
///
/// Clones share one apply lock, so the read-modify-write of the aggregate is
/// serialized across the connection task and user-action handlers.
#[derive(Clone, Debug)]
pub struct Reconciler {
    store: Store,
    activity_capacity: usize,
    alert_capacity: usize,
    apply_lock: Arc<Mutex<()>>,
}

impl Reconciler {
    pub fn new(store: Store) -> Self {
        Self::with_capacities(store, ACTIVITY_FEED_CAPACITY, ALERT_HISTORY_CAPACITY)
    }

    pub fn with_capacities(store: Store, activity_capacity: usize, alert_capacity: usize) -> Self {
        Self {
            store,
            activity_capacity,
            alert_capacity,
            apply_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Apply one event and write every affected key.
    pub fn apply(&self, event: &NormalizedEvent) -> Reconciliation {
        let _guard = self.apply_lock.lock();

        let summary: DashboardSummary = self
            .store
            .get_as(keys::DASHBOARD_SUMMARY)
            .unwrap_or_default();
        let statuses: StatusIndex = self
            .store
            .get_as(keys::APPLICATION_STATUSES)
            .unwrap_or_default();

        let result = reconcile(&summary, &statuses, event);
        debug!(
            kind = %event.kind(),
            application_id = event.entity_id.as_deref().unwrap_or_default(),
            changed = result.summary_changed,
            duplicate = result.duplicate,
            "reconciled event"
        );

        if result.statuses != statuses {
            self.write(keys::APPLICATION_STATUSES, &result.statuses);
        }
        if result.summary_changed {
            self.write(keys::DASHBOARD_SUMMARY, &result.summary);
        }
        if let Some((id, badge)) = &result.sla_badge {
            match serde_json::to_value(badge) {
                Ok(badge) => {
                    self.store.update(keys::SLA_BADGES, |previous| {
                        let mut badges = previous
                            .and_then(Value::as_object)
                            .cloned()
                            .unwrap_or_default();
                        badges.insert(id.clone(), badge);
                        Value::Object(badges)
                    });
                }
                Err(err) => warn!(error = %err, "sla badge did not serialize"),
            }
        }
        if let Some((id, patch)) = &result.application_patch {
            self.patch_application(id, patch);
        }
        if let Some(entry) = &result.activity {
            self.record_activity(entry);
        }
        if let Some(alert) = &result.alert {
            push_bounded(&self.store, keys::ALERTS, alert, self.alert_capacity);
        }
        if !result.highlights.is_empty() {
            let highlight = Highlight {
                targets: result.highlights.clone(),
                at: event.received_at,
            };
            self.write(keys::HIGHLIGHT, &highlight);
        }

        result
    }

    /// Run `f` with reconciliation paused, for writes that replace the
    /// aggregate wholesale (an authoritative refresh).
    pub fn exclusive<R>(&self, f: impl FnOnce(&Store) -> R) -> R {
        let _guard = self.apply_lock.lock();
        f(&self.store)
    }

    /// Append an entry to the activity feed.
    pub fn record_activity(&self, entry: &ActivityEntry) {
        push_bounded(&self.store, keys::ACTIVITY_FEED, entry, self.activity_capacity);
    }

    /// Last known status of `id`: the tracked bucket, else the `status` of its
    /// loaded record.
    pub fn known_status(&self, id: &str) -> Option<String> {
        let tracked = self
            .store
            .get_as::<StatusIndex>(keys::APPLICATION_STATUSES)
            .and_then(|statuses| statuses.get(id).copied());
        if let Some(bucket) = tracked {
            return Some(bucket.as_str().to_string());
        }
        let slice = self.store.get_state(keys::APPLICATIONS)?;
        let items = match &slice {
            Value::Object(obj) => obj.get("items")?.as_array()?,
            Value::Array(items) => items,
            _ => return None,
        };
        items
            .iter()
            .find(|item| is_record(item, id))?
            .get("status")?
            .as_str()
            .map(str::to_string)
    }

    /// Merge `patch` into the application with `id` in `data.applications`.
    /// Unknown ids are left alone; the next refresh brings them in.
    pub fn patch_application(&self, id: &str, patch: &Map<String, Value>) {
        if patch.is_empty() || !self.store.contains(keys::APPLICATIONS) {
            return;
        }
        self.store.update(keys::APPLICATIONS, |previous| {
            let mut slice = previous.cloned().unwrap_or(Value::Null);
            let items = match &mut slice {
                Value::Object(obj) => obj.get_mut("items").and_then(Value::as_array_mut),
                Value::Array(items) => Some(items),
                _ => None,
            };
            if let Some(item) =
                items.and_then(|items| items.iter_mut().find(|item| is_record(item, id)))
                && let Some(fields) = item.as_object_mut()
            {
                for (k, v) in patch {
                    fields.insert(k.clone(), v.clone());
                }
            }
            slice
        });
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) {
        if let Err(err) = self.store.set_serialized(key, value) {
            warn!(key, error = %err, "reconciled value did not serialize");
        }
    }
}

fn is_record(item: &Value, id: &str) -> bool {
    item.get("id").is_some_and(|v| match v {
        Value::String(s) => s == id,
        other => other.to_string() == id,
    })
}
