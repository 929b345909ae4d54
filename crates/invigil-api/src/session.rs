//! Exam session records

use chrono::{DateTime, NaiveDate, Utc};
use invigil_util::{ExamCode, GroupId, TrackRef, WallClock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Kind of test a session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    /// Questions from one content track
    SingleTrack,
    /// Questions drawn from three tracks
    Combined,
}

impl TestKind {
    /// Number of distinct tracks a selection of this kind must name
    pub fn required_tracks(self) -> usize {
        match self {
            TestKind::SingleTrack => 1,
            TestKind::Combined => 3,
        }
    }
}

/// Separator used to build a combined test's composite track reference
pub const COMBINED_TRACK_SEPARATOR: char = '+';

/// Build the track reference stored on a session for the given tracks
pub fn composite_track_reference(tracks: &[TrackRef]) -> TrackRef {
    let joined: Vec<&str> = tracks.iter().map(TrackRef::as_str).collect();
    TrackRef::new(joined.join(&COMBINED_TRACK_SEPARATOR.to_string()))
}

/// Lifecycle state of a session
///
/// `Scheduled -> Active -> Completed`. Completed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Scheduled,
    Active,
    Completed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Scheduled, SessionState::Active)
                | (SessionState::Active, SessionState::Completed)
        )
    }

    /// Sessions may only be deleted while no student can be sitting them
    pub fn is_deletable(self) -> bool {
        !matches!(self, SessionState::Active)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Scheduled => "scheduled",
            SessionState::Active => "active",
            SessionState::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// When a session is planned to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub date: NaiveDate,
    pub start: WallClock,
    pub duration_minutes: u32,
}

impl Schedule {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_minutes as u64 * 60)
    }
}

/// Submission bookkeeping maintained on the session record
///
/// `total`, `graded` and `published` only ever grow; `pending` is the
/// submissions still waiting for a complete set of marks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionCounters {
    pub total: u32,
    pub pending: u32,
    pub graded: u32,
    pub published: u32,
}

impl SubmissionCounters {
    pub fn record_submission(&mut self) {
        self.total += 1;
        self.pending += 1;
    }

    pub fn record_graded(&mut self) {
        self.pending = self.pending.saturating_sub(1);
        self.graded += 1;
    }

    pub fn record_published(&mut self) {
        self.published += 1;
    }
}

/// One scheduled, active or completed exam instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamSession {
    pub code: ExamCode,
    pub track_reference: TrackRef,
    pub test_kind: TestKind,
    /// Individual tracks; one entry for single-track tests, three for combined
    pub tracks: Vec<TrackRef>,
    pub display_name: String,
    pub schedule: Schedule,
    pub question_count: u32,
    pub state: SessionState,
    pub allowed_groups: BTreeSet<GroupId>,
    #[serde(default)]
    pub counters: SubmissionCounters,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExamSession {
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn is_completed(&self) -> bool {
        self.state == SessionState::Completed
    }

    pub fn allows_group(&self, group: &GroupId) -> bool {
        self.allowed_groups.contains(group)
    }

    /// Deadline of a started session, measured from the actual start
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.started_at.map(|started| {
            started + chrono::Duration::minutes(self.schedule.duration_minutes as i64)
        })
    }
}

/// Document written under `submissions/{trackRef}/{code}/_metadata`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionMetadata {
    pub exam_code: ExamCode,
    pub track_reference: TrackRef,
    pub test_kind: TestKind,
    pub question_count: u32,
    pub created_at: DateTime<Utc>,
}

impl SubmissionMetadata {
    pub fn for_session(session: &ExamSession) -> Self {
        Self {
            exam_code: session.code.clone(),
            track_reference: session.track_reference.clone(),
            test_kind: session.test_kind,
            question_count: session.question_count,
            created_at: session.created_at,
        }
    }
}
