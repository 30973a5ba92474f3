//! Executes view actions against the backend.
//!
//! A successful write is reflected in the store straight away. Decisions are
//! fed through the reconciler as the event the server will later push, so the
//! echo arrives as a duplicate and changes nothing. Only decisions on
//! applications with a known status move counters locally.

use std::sync::Arc;

use chrono::Utc;
use dashboard_state::{
    ActionReceiver, ActivityEntry, AlertLevel, Decision, DomainEvent, NormalizedEvent, Reconciler,
    ViewAction, keys,
};
use futures::StreamExt;
use serde_json::{Map, Value, json};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::api::ApiClient;
use crate::banner::{self, BannerReason};
use crate::error::{ApiError, Result, SyncError};

#[derive(Clone, Debug)]
pub struct ActionHandler {
    api: ApiClient,
    reconciler: Reconciler,
    refresh: Arc<Notify>,
    session_invalid: CancellationToken,
}

impl ActionHandler {
    /// `refresh` wakes the poller for [`ViewAction::Refresh`].
    pub fn new(
        api: ApiClient,
        reconciler: Reconciler,
        refresh: Arc<Notify>,
        session_invalid: CancellationToken,
    ) -> Self {
        Self {
            api,
            reconciler,
            refresh,
            session_invalid,
        }
    }

    pub async fn handle(&self, action: ViewAction) -> Result<()> {
        let label = action.label();
        let outcome = self
            .execute(action)
            .instrument(info_span!("view_action", action = label))
            .await;

        match outcome {
            Ok(()) => Ok(()),
            Err(ApiError::Unauthorized) => {
                warn!(action = label, "session rejected during action");
                let store = self.reconciler.store();
                store.set_state(keys::SESSION_INVALID, json!(true));
                banner::show(
                    store,
                    AlertLevel::Critical,
                    BannerReason::SessionExpired,
                    "Your session has expired. Sign in again.",
                );
                self.session_invalid.cancel();
                Err(SyncError::Unauthorized)
            }
            Err(err) => {
                warn!(action = label, error = %err, "action failed");
                banner::show(
                    self.reconciler.store(),
                    AlertLevel::Warning,
                    BannerReason::ActionFailed,
                    format!("Could not complete {}: {err}", label.replace('_', " ")),
                );
                Err(SyncError::Api(err))
            }
        }
    }

    async fn execute(&self, action: ViewAction) -> std::result::Result<(), ApiError> {
        match action {
            ViewAction::Claim { application_id } => {
                let response = self.api.claim(&application_id).await?;
                self.merge_response(&application_id, &response);
                self.record(&application_id, "application_claimed", "Application claimed");
            }
            ViewAction::Decide {
                application_id,
                decision,
            } => {
                let previous_status = self.reconciler.known_status(&application_id);
                let response = self.api.decide(&application_id, &decision).await?;
                let (event, label) = match &decision {
                    Decision::Approve { loan_amount, .. } => (
                        DomainEvent::ApprovalGranted {
                            previous_status: previous_status.clone(),
                            loan_amount: *loan_amount,
                        },
                        "Application approved",
                    ),
                    Decision::Reject { reason } => (
                        DomainEvent::RejectionIssued {
                            previous_status: previous_status.clone(),
                            reason: Some(reason.clone()),
                        },
                        "Application rejected",
                    ),
                };
                if previous_status.is_some() {
                    self.reconciler.apply(&NormalizedEvent::new(
                        Some(application_id.clone()),
                        event,
                        response.clone(),
                    ));
                } else {
                    // Untracked: leave counters to the server echo or the next refresh.
                    debug!(application_id = %application_id, "decision on untracked application");
                    self.record(&application_id, event.kind().as_str(), label);
                }
                self.merge_response(&application_id, &response);
            }
            ViewAction::AddNote {
                application_id,
                body,
            } => {
                self.api.add_note(&application_id, &body).await?;
                self.record(&application_id, "note_added", "Note added");
            }
            ViewAction::RequestDocuments {
                application_id,
                documents,
                message,
            } => {
                self.api
                    .request_documents(&application_id, &documents, message.as_deref())
                    .await?;
                let summary = format!("Requested {} document(s)", documents.len());
                self.record(&application_id, "documents_requested", &summary);
            }
            ViewAction::Refresh => {
                debug!("manual refresh requested");
                self.refresh.notify_one();
            }
            ViewAction::Navigate { page } => {
                self.reconciler
                    .store()
                    .set_state(keys::CURRENT_PAGE, Value::String(page));
            }
        }
        Ok(())
    }

    /// Patch the application record with whatever the server echoed back.
    fn merge_response(&self, application_id: &str, response: &Value) {
        let record = response
            .get("application")
            .and_then(Value::as_object)
            .or_else(|| response.as_object());
        let Some(record) = record else {
            return;
        };
        let patch: Map<String, Value> = record
            .iter()
            .filter(|(key, _)| key.as_str() != "id" && key.as_str() != "isDemo")
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        self.reconciler.patch_application(application_id, &patch);
    }

    fn record(&self, application_id: &str, kind: &str, summary: &str) {
        self.reconciler.record_activity(&ActivityEntry {
            kind: kind.to_string(),
            application_id: Some(application_id.to_string()),
            summary: summary.to_string(),
            at: Utc::now(),
        });
    }

    /// Drain `actions` until cancelled, the dispatchers are gone, or the
    /// session is rejected.
    pub async fn run(self, mut actions: ActionReceiver, cancel: CancellationToken) {
        loop {
            let action = tokio::select! {
                _ = cancel.cancelled() => break,
                action = actions.next() => action,
            };
            let Some(action) = action else {
                debug!("all dispatchers dropped");
                break;
            };
            if let Err(SyncError::Unauthorized) = self.handle(action).await {
                break;
            }
        }
        info!("action loop stopped");
    }
}
