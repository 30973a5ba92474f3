//! User action requests raised by views.

use futures::channel::mpsc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "camelCase")]
pub enum Decision {
    #[serde(rename_all = "camelCase")]
    Approve {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loan_amount: Option<f64>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        conditions: Vec<String>,
    },
    Reject {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewAction {
    Claim {
        application_id: String,
    },
    Decide {
        application_id: String,
        decision: Decision,
    },
    AddNote {
        application_id: String,
        body: String,
    },
    RequestDocuments {
        application_id: String,
        documents: Vec<String>,
        message: Option<String>,
    },
    /// Force an authoritative refetch of every slice.
    Refresh,
    Navigate {
        page: String,
    },
}

impl ViewAction {
    pub fn label(&self) -> &'static str {
        match self {
            ViewAction::Claim { .. } => "claim",
            ViewAction::Decide { .. } => "decide",
            ViewAction::AddNote { .. } => "add_note",
            ViewAction::RequestDocuments { .. } => "request_documents",
            ViewAction::Refresh => "refresh",
            ViewAction::Navigate { .. } => "navigate",
        }
    }
}

#[derive(Debug, Error)]
#[error("action loop is no longer running")]
pub struct DispatchError(pub ViewAction);

/// Sending half handed to views.
#[derive(Debug, Clone)]
pub struct ActionDispatcher {
    tx: mpsc::UnboundedSender<ViewAction>,
}

impl ActionDispatcher {
    pub fn dispatch(&self, action: ViewAction) -> Result<(), DispatchError> {
        debug!(action = action.label(), "view action dispatched");
        self.tx
            .unbounded_send(action)
            .map_err(|err| DispatchError(err.into_inner()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub type ActionReceiver = mpsc::UnboundedReceiver<ViewAction>;

pub fn action_channel() -> (ActionDispatcher, ActionReceiver) {
    let (tx, rx) = mpsc::unbounded();
    (ActionDispatcher { tx }, rx)
}
