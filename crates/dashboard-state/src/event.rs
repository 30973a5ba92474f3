//! Push-channel event normalization.
//!
//! Server messages arrive as `{"type": "...", "data": {...}}`, with field names
//! that vary between emitters (`applicationId` vs `application_id`,
//! `previousStatus` vs `oldStatus`). [`normalize`] folds them into one
//! canonical shape before anything downstream looks at them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

const ID_FIELDS: &[&str] = &["applicationId", "application_id", "appId", "id"];
const PREVIOUS_STATUS_FIELDS: &[&str] = &[
    "previousStatus",
    "previous_status",
    "oldStatus",
    "fromStatus",
];
const NEW_STATUS_FIELDS: &[&str] = &["newStatus", "new_status", "status", "toStatus"];
const AMOUNT_FIELDS: &[&str] = &["loanAmount", "loan_amount", "amount"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "application.updated")]
    ApplicationUpdated,
    #[serde(rename = "application.assigned")]
    ApplicationAssigned,
    #[serde(rename = "sla.warning")]
    SlaWarning,
    #[serde(rename = "sla.breached")]
    SlaBreached,
    #[serde(rename = "status_change")]
    StatusChange,
    #[serde(rename = "new_application")]
    NewApplication,
    #[serde(rename = "approval_granted")]
    ApprovalGranted,
    #[serde(rename = "rejection_issued")]
    RejectionIssued,
    #[serde(rename = "review_completed")]
    ReviewCompleted,
    #[serde(rename = "connection.established")]
    ConnectionEstablished,
    #[serde(rename = "pong")]
    Pong,
}

impl EventKind {
    pub const ALL: [EventKind; 11] = [
        EventKind::ApplicationUpdated,
        EventKind::ApplicationAssigned,
        EventKind::SlaWarning,
        EventKind::SlaBreached,
        EventKind::StatusChange,
        EventKind::NewApplication,
        EventKind::ApprovalGranted,
        EventKind::RejectionIssued,
        EventKind::ReviewCompleted,
        EventKind::ConnectionEstablished,
        EventKind::Pong,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ApplicationUpdated => "application.updated",
            EventKind::ApplicationAssigned => "application.assigned",
            EventKind::SlaWarning => "sla.warning",
            EventKind::SlaBreached => "sla.breached",
            EventKind::StatusChange => "status_change",
            EventKind::NewApplication => "new_application",
            EventKind::ApprovalGranted => "approval_granted",
            EventKind::RejectionIssued => "rejection_issued",
            EventKind::ReviewCompleted => "review_completed",
            EventKind::ConnectionEstablished => "connection.established",
            EventKind::Pong => "pong",
        }
    }

    pub fn from_wire(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }

    /// Connection bookkeeping messages that never reach the reconciler.
    pub fn is_control(self) -> bool {
        matches!(self, EventKind::ConnectionEstablished | EventKind::Pong)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed body of a domain event. Matching on this is exhaustive, so a new
/// server event type shows up as a compile error in every consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    ApplicationUpdated {
        status: Option<String>,
        changes: Map<String, Value>,
    },
    ApplicationAssigned {
        assignee: Option<String>,
    },
    SlaWarning {
        message: Option<String>,
        hours_remaining: Option<f64>,
    },
    SlaBreached {
        message: Option<String>,
    },
    StatusChange {
        previous_status: Option<String>,
        new_status: String,
    },
    NewApplication {
        applicant: Option<String>,
        loan_amount: Option<f64>,
    },
    ApprovalGranted {
        previous_status: Option<String>,
        loan_amount: Option<f64>,
    },
    RejectionIssued {
        previous_status: Option<String>,
        reason: Option<String>,
    },
    ReviewCompleted {
        previous_status: Option<String>,
        new_status: String,
    },
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::ApplicationUpdated { .. } => EventKind::ApplicationUpdated,
            DomainEvent::ApplicationAssigned { .. } => EventKind::ApplicationAssigned,
            DomainEvent::SlaWarning { .. } => EventKind::SlaWarning,
            DomainEvent::SlaBreached { .. } => EventKind::SlaBreached,
            DomainEvent::StatusChange { .. } => EventKind::StatusChange,
            DomainEvent::NewApplication { .. } => EventKind::NewApplication,
            DomainEvent::ApprovalGranted { .. } => EventKind::ApprovalGranted,
            DomainEvent::RejectionIssued { .. } => EventKind::RejectionIssued,
            DomainEvent::ReviewCompleted { .. } => EventKind::ReviewCompleted,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub entity_id: Option<String>,
    pub event: DomainEvent,
    /// The message body as received, for views that want fields the typed
    /// event does not carry.
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl NormalizedEvent {
    pub fn new(entity_id: Option<String>, event: DomainEvent, payload: Value) -> Self {
        Self {
            entity_id,
            event,
            payload,
            received_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    ConnectionEstablished { connection_id: Option<String> },
    Pong,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Control(ControlMessage),
    Domain(NormalizedEvent),
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("malformed push payload: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("push message is not an object with a string 'type'")]
    MissingType,

    #[error("unknown push event type '{0}'")]
    UnknownType(String),

    #[error("{kind} event is missing '{field}'")]
    MissingField {
        kind: EventKind,
        field: &'static str,
    },
}

/// Parse one raw push-channel frame.
pub fn normalize(raw: &str) -> Result<Inbound, NormalizeError> {
    let value: Value = serde_json::from_str(raw)?;
    normalize_value(value)
}

/// Normalize an already-decoded message.
pub fn normalize_value(value: Value) -> Result<Inbound, NormalizeError> {
    let Value::Object(mut message) = value else {
        return Err(NormalizeError::MissingType);
    };
    let Some(Value::String(wire_type)) = message.remove("type") else {
        return Err(NormalizeError::MissingType);
    };
    let kind =
        EventKind::from_wire(&wire_type).ok_or(NormalizeError::UnknownType(wire_type))?;

    let payload = match message.remove("data") {
        Some(Value::Object(data)) => data,
        _ => message,
    };

    let entity_id = str_field(&payload, ID_FIELDS).or_else(|| {
        payload
            .get("application")
            .and_then(Value::as_object)
            .and_then(|app| str_field(app, ID_FIELDS))
    });
    let require_id = || {
        entity_id.clone().ok_or(NormalizeError::MissingField {
            kind,
            field: "applicationId",
        })
    };
    let previous_status = || str_field(&payload, PREVIOUS_STATUS_FIELDS);
    let message_text = || str_field(&payload, &["message", "description"]);

    let event = match kind {
        EventKind::ApplicationUpdated => {
            require_id()?;
            let mut changes = match payload.get("application") {
                Some(Value::Object(app)) => app.clone(),
                _ => payload.clone(),
            };
            let status = str_field(&changes, NEW_STATUS_FIELDS);
            for alias in ID_FIELDS
                .iter()
                .chain(PREVIOUS_STATUS_FIELDS)
                .chain(NEW_STATUS_FIELDS)
            {
                changes.remove(*alias);
            }
            if let Some(status) = &status {
                changes.insert("status".to_string(), Value::String(status.clone()));
            }
            DomainEvent::ApplicationUpdated { status, changes }
        }
        EventKind::ApplicationAssigned => {
            require_id()?;
            DomainEvent::ApplicationAssigned {
                assignee: str_field(
                    &payload,
                    &["assignedTo", "assigned_to", "assignee", "underwriter"],
                ),
            }
        }
        EventKind::SlaWarning => {
            require_id()?;
            DomainEvent::SlaWarning {
                message: message_text(),
                hours_remaining: num_field(&payload, &["hoursRemaining", "hours_remaining"]),
            }
        }
        EventKind::SlaBreached => {
            require_id()?;
            DomainEvent::SlaBreached {
                message: message_text(),
            }
        }
        EventKind::StatusChange => DomainEvent::StatusChange {
            previous_status: previous_status(),
            new_status: str_field(&payload, NEW_STATUS_FIELDS).ok_or(
                NormalizeError::MissingField {
                    kind,
                    field: "newStatus",
                },
            )?,
        },
        EventKind::ReviewCompleted => DomainEvent::ReviewCompleted {
            previous_status: previous_status(),
            new_status: str_field(&payload, NEW_STATUS_FIELDS).ok_or(
                NormalizeError::MissingField {
                    kind,
                    field: "newStatus",
                },
            )?,
        },
        EventKind::NewApplication => DomainEvent::NewApplication {
            applicant: str_field(&payload, &["applicantName", "applicant_name", "applicant"]),
            loan_amount: num_field(&payload, AMOUNT_FIELDS),
        },
        EventKind::ApprovalGranted => DomainEvent::ApprovalGranted {
            previous_status: previous_status(),
            loan_amount: num_field(&payload, AMOUNT_FIELDS),
        },
        EventKind::RejectionIssued => DomainEvent::RejectionIssued {
            previous_status: previous_status(),
            reason: str_field(&payload, &["reason", "rejectionReason", "rejection_reason"]),
        },
        EventKind::ConnectionEstablished => {
            return Ok(Inbound::Control(ControlMessage::ConnectionEstablished {
                connection_id: str_field(&payload, &["connectionId", "connection_id"]),
            }));
        }
        EventKind::Pong => return Ok(Inbound::Control(ControlMessage::Pong)),
    };

    Ok(Inbound::Domain(NormalizedEvent::new(
        entity_id,
        event,
        Value::Object(payload),
    )))
}

/// First present field among `names`, accepting strings and numbers.
fn str_field(payload: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match payload.get(*name) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// First present numeric field among `names`, accepting numeric strings.
fn num_field(payload: &Map<String, Value>, names: &[&str]) -> Option<f64> {
    names.iter().find_map(|name| match payload.get(*name) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn domain(raw: Value) -> NormalizedEvent {
        match normalize(&raw.to_string()).expect("normalizes") {
            Inbound::Domain(event) => event,
            other => panic!("expected domain event, got {other:?}"),
        }
    }

    #[test]
    fn every_kind_round_trips_its_wire_name() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_wire(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn control_messages_bypass_domain() {
        assert_eq!(
            normalize(r#"{"type":"pong"}"#).unwrap(),
            Inbound::Control(ControlMessage::Pong)
        );
        assert_eq!(
            normalize(r#"{"type":"connection.established","data":{"connectionId":"c-9"}}"#)
                .unwrap(),
            Inbound::Control(ControlMessage::ConnectionEstablished {
                connection_id: Some("c-9".to_string())
            })
        );
    }

    #[test]
    fn malformed_json_is_parse_error() {
        assert!(matches!(
            normalize("{not json"),
            Err(NormalizeError::Parse(_))
        ));
        assert!(matches!(
            normalize("[1,2]"),
            Err(NormalizeError::MissingType)
        ));
    }

    #[test]
    fn unknown_type_is_reported_not_fatal() {
        match normalize(r#"{"type":"loan.securitized","data":{}}"#) {
            Err(NormalizeError::UnknownType(t)) => assert_eq!(t, "loan.securitized"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn status_change_accepts_alias_fields() {
        let event = domain(json!({
            "type": "status_change",
            "data": {"application_id": 42, "oldStatus": "PENDING", "toStatus": "UNDER_REVIEW"}
        }));
        assert_eq!(event.entity_id.as_deref(), Some("42"));
        assert_eq!(
            event.event,
            DomainEvent::StatusChange {
                previous_status: Some("PENDING".to_string()),
                new_status: "UNDER_REVIEW".to_string(),
            }
        );
    }

    #[test]
    fn top_level_fields_used_when_data_missing() {
        let event = domain(json!({
            "type": "approval_granted",
            "applicationId": "app-7",
            "previousStatus": "pending",
            "loanAmount": "50000"
        }));
        assert_eq!(event.entity_id.as_deref(), Some("app-7"));
        assert_eq!(
            event.event,
            DomainEvent::ApprovalGranted {
                previous_status: Some("pending".to_string()),
                loan_amount: Some(50000.0),
            }
        );
    }

    #[test]
    fn application_updated_reads_nested_application() {
        let event = domain(json!({
            "type": "application.updated",
            "data": {"application": {"id": "app-3", "status": "approved", "amount": 12000}}
        }));
        assert_eq!(event.entity_id.as_deref(), Some("app-3"));
        match event.event {
            DomainEvent::ApplicationUpdated { status, changes } => {
                assert_eq!(status.as_deref(), Some("approved"));
                assert_eq!(changes.get("amount"), Some(&json!(12000)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn application_updated_patch_drops_identity_and_alias_keys() {
        let event = domain(json!({
            "type": "application.updated",
            "data": {
                "applicationId": "app-4",
                "previousStatus": "pending",
                "newStatus": "UNDER_REVIEW",
                "assignedTo": "sam"
            }
        }));
        match event.event {
            DomainEvent::ApplicationUpdated { status, changes } => {
                assert_eq!(status.as_deref(), Some("UNDER_REVIEW"));
                let mut keys: Vec<&str> = changes.keys().map(String::as_str).collect();
                keys.sort_unstable();
                assert_eq!(keys, vec!["assignedTo", "status"]);
                assert_eq!(changes["status"], json!("UNDER_REVIEW"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sla_event_without_id_is_rejected() {
        assert!(matches!(
            normalize(r#"{"type":"sla.breached","data":{"message":"late"}}"#),
            Err(NormalizeError::MissingField {
                kind: EventKind::SlaBreached,
                ..
            })
        ));
    }

    #[test]
    fn status_change_without_target_is_rejected() {
        assert!(matches!(
            normalize(r#"{"type":"status_change","data":{"applicationId":"a"}}"#),
            Err(NormalizeError::MissingField { field: "newStatus", .. })
        ));
    }
}
