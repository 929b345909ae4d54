//! The global broadcast record and the lease that guards it

use chrono::{DateTime, Utc};
use invigil_util::{ExamCode, TrackRef};
use serde::{Deserialize, Serialize};

use crate::{ExamSession, TestKind};

/// Singleton record at `exam/status`, written only by the admin controller
/// and polled by every student client.
///
/// `version` grows by one on every write; readers treat an unchanged
/// version as no new information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalBroadcast {
    #[serde(default)]
    pub version: u64,
    pub is_started: bool,
    pub exam_code: Option<ExamCode>,
    pub active_track_reference: Option<TrackRef>,
    pub display_name: Option<String>,
    pub test_kind: Option<TestKind>,
    pub duration_minutes: Option<u32>,
    /// Authoritative start instant
    pub start_time: Option<DateTime<Utc>>,
    /// Authoritative end instant
    pub end_time: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl GlobalBroadcast {
    /// No exam running; every identifying field cleared
    pub fn idle(version: u64, at: DateTime<Utc>) -> Self {
        Self {
            version,
            is_started: false,
            exam_code: None,
            active_track_reference: None,
            display_name: None,
            test_kind: None,
            duration_minutes: None,
            start_time: None,
            end_time: None,
            updated_at: Some(at),
        }
    }

    /// Announce `session` as running from `start_time`
    pub fn started(
        version: u64,
        session: &ExamSession,
        start_time: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Self {
        let end_time =
            start_time + chrono::Duration::minutes(session.schedule.duration_minutes as i64);

        Self {
            version,
            is_started: true,
            exam_code: Some(session.code.clone()),
            active_track_reference: Some(session.track_reference.clone()),
            display_name: Some(session.display_name.clone()),
            test_kind: Some(session.test_kind),
            duration_minutes: Some(session.schedule.duration_minutes),
            start_time: Some(start_time),
            end_time: Some(end_time),
            updated_at: Some(at),
        }
    }

    /// Whether this record announces the given session
    pub fn references(&self, code: &ExamCode) -> bool {
        self.is_started && self.exam_code.as_ref() == Some(code)
    }

    pub fn starts_after(&self, now: DateTime<Utc>) -> bool {
        self.start_time.is_some_and(|start| start > now)
    }

    pub fn has_ended_by(&self, now: DateTime<Utc>) -> bool {
        self.end_time.is_some_and(|end| end <= now)
    }
}

impl Default for GlobalBroadcast {
    fn default() -> Self {
        Self {
            version: 0,
            is_started: false,
            exam_code: None,
            active_track_reference: None,
            display_name: None,
            test_kind: None,
            duration_minutes: None,
            start_time: None,
            end_time: None,
            updated_at: None,
        }
    }
}

/// Record at `exam/lease`; the holder is the only session allowed to be active
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveLease {
    pub holder: Option<ExamCode>,
    pub acquired_at: Option<DateTime<Utc>>,
}

impl ActiveLease {
    pub fn held_by(code: &ExamCode, at: DateTime<Utc>) -> Self {
        Self {
            holder: Some(code.clone()),
            acquired_at: Some(at),
        }
    }

    pub fn released() -> Self {
        Self::default()
    }

    pub fn is_held_by(&self, code: &ExamCode) -> bool {
        self.holder.as_ref() == Some(code)
    }
}
