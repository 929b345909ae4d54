//! Audit event types

use chrono::{DateTime, Utc};
use invigil_util::{ExamCode, StudentId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Root of the append-only audit collection
pub const AUDIT_ROOT: &str = "audit";

/// Types of audit events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Session record created
    SessionCreated { code: ExamCode, start_now: bool },

    /// Session became active and was broadcast
    SessionStarted {
        code: ExamCode,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    },

    /// Start rejected by the single-active check
    StartRefused { code: ExamCode, reason: String },

    /// Session completed by an admin
    SessionStopped { code: ExamCode },

    /// Session completed because its end time passed
    SessionExpired { code: ExamCode },

    /// Session record removed
    SessionDeleted { code: ExamCode },

    /// Results released to a student
    ResultPublished {
        code: ExamCode,
        student: StudentId,
        manual_score: u32,
    },

    /// Startup repair of an inconsistent broadcast or lease
    StateRepaired { detail: String },
}

/// Full audit event with metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(timestamp: DateTime<Utc>, event: AuditEventType) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            event,
        }
    }
}

/// Keys sort by time, then by id for events in the same millisecond
pub(crate) fn audit_path(event: &AuditEvent) -> String {
    format!(
        "{}/{:015}-{}",
        AUDIT_ROOT,
        event.timestamp.timestamp_millis().max(0),
        event.id.simple()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn audit_paths_sort_chronologically() {
        let early = AuditEvent::new(
            Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap(),
            AuditEventType::SessionStopped {
                code: ExamCode::new("A-20261017-001"),
            },
        );
        let late = AuditEvent::new(
            Utc.with_ymd_and_hms(2026, 10, 17, 10, 0, 0).unwrap(),
            AuditEventType::SessionStopped {
                code: ExamCode::new("A-20261017-001"),
            },
        );

        assert!(audit_path(&early) < audit_path(&late));
        assert!(audit_path(&early).starts_with("audit/"));
    }

    #[test]
    fn event_type_is_tagged() {
        let json = serde_json::to_value(AuditEventType::SessionDeleted {
            code: ExamCode::new("A-20261017-001"),
        })
        .unwrap();
        assert_eq!(json["type"], "session_deleted");
        assert_eq!(json["code"], "A-20261017-001");
    }
}
