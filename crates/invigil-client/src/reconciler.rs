//! Pure reconciliation state machine
//!
//! No I/O and no timers: the runner feeds it broadcast observations and
//! ticks, and acts on the transitions it returns.

use chrono::{DateTime, Utc};
use invigil_api::{GlobalBroadcast, TestKind};
use invigil_util::{saturating_until, ExamCode, TrackRef};
use std::time::Duration;

/// What the student is shown before the exam starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleHint {
    pub start_time: DateTime<Utc>,
    pub duration_minutes: Option<u32>,
    pub display_name: Option<String>,
}

/// The exam a client is counting down to or sitting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamInfo {
    pub exam_code: Option<ExamCode>,
    pub display_name: Option<String>,
    pub track_reference: Option<TrackRef>,
    pub test_kind: Option<TestKind>,
    pub duration_minutes: Option<u32>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl ExamInfo {
    pub fn from_broadcast(b: &GlobalBroadcast) -> Self {
        Self {
            exam_code: b.exam_code.clone(),
            display_name: b.display_name.clone(),
            track_reference: b.active_track_reference.clone(),
            test_kind: b.test_kind,
            duration_minutes: b.duration_minutes,
            start_time: b.start_time,
            end_time: b.end_time,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Phase {
    /// Nothing observed yet
    #[default]
    Idle,
    Waiting { hint: Option<ScheduleHint> },
    Countdown { ticks_left: u32 },
    Running,
    /// The exam's end passed before this client got to start it
    Ended,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Running | Phase::Ended)
    }
}

/// Result of feeding the reconciler an observation or a tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Waiting { hint: Option<ScheduleHint> },
    CountdownStarted { ticks: u32, remaining: Duration },
    CountdownTick { ticks_left: u32 },
    /// The broadcast went idle mid-countdown
    CountdownAborted,
    /// Fires exactly once per reconciler
    ExamBegins { exam: ExamInfo, remaining: Duration },
    Ended,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    phase: Phase,
    countdown_ticks: u32,
    last_version: Option<u64>,
    exam: Option<ExamInfo>,
    remaining: Option<Duration>,
    begun: bool,
}

impl Reconciler {
    pub fn new(countdown_ticks: u32) -> Self {
        Self {
            phase: Phase::Idle,
            countdown_ticks,
            last_version: None,
            exam: None,
            remaining: None,
            begun: false,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn exam(&self) -> Option<&ExamInfo> {
        self.exam.as_ref()
    }

    /// Presentational time left, when counting down or running
    pub fn remaining(&self) -> Option<Duration> {
        self.remaining
    }

    pub fn last_version(&self) -> Option<u64> {
        self.last_version
    }

    /// A future start is time-dependent, so the same version must be
    /// re-evaluated as the clock moves.
    fn awaiting_scheduled_start(&self) -> bool {
        matches!(self.phase, Phase::Waiting { hint: Some(_) })
    }

    /// Reconcile one broadcast read. `now` is already skew-adjusted.
    pub fn observe(&mut self, b: &GlobalBroadcast, now: DateTime<Utc>) -> Transition {
        if self.phase.is_terminal() {
            return Transition::Unchanged;
        }
        if self.last_version == Some(b.version) && !self.awaiting_scheduled_start() {
            return Transition::Unchanged;
        }
        self.last_version = Some(b.version);

        if !b.is_started {
            return self.wait(schedule_hint(b, now));
        }

        if matches!(self.phase, Phase::Countdown { .. }) {
            // Keep counting; pick up any corrected details
            self.exam = Some(ExamInfo::from_broadcast(b));
            return Transition::Unchanged;
        }

        if let Some(hint) = schedule_hint(b, now) {
            return self.wait(Some(hint));
        }

        if b.has_ended_by(now) {
            self.phase = Phase::Ended;
            self.exam = Some(ExamInfo::from_broadcast(b));
            self.remaining = Some(Duration::ZERO);
            return Transition::Ended;
        }

        let remaining = match (b.end_time, b.duration_minutes) {
            (Some(end), _) => saturating_until(now, end),
            (None, Some(minutes)) => Duration::from_secs(minutes as u64 * 60),
            (None, None) => Duration::ZERO,
        };
        self.exam = Some(ExamInfo::from_broadcast(b));
        self.remaining = Some(remaining);

        if self.countdown_ticks == 0 {
            return self.begin();
        }
        self.phase = Phase::Countdown {
            ticks_left: self.countdown_ticks,
        };
        Transition::CountdownStarted {
            ticks: self.countdown_ticks,
            remaining,
        }
    }

    fn wait(&mut self, hint: Option<ScheduleHint>) -> Transition {
        let next = Phase::Waiting { hint: hint.clone() };

        if matches!(self.phase, Phase::Countdown { .. }) {
            self.phase = next;
            self.exam = None;
            self.remaining = None;
            return Transition::CountdownAborted;
        }
        if self.phase == next {
            return Transition::Unchanged;
        }
        self.phase = next;
        Transition::Waiting { hint }
    }

    /// One step of the local countdown
    pub fn countdown_tick(&mut self) -> Transition {
        match self.phase {
            Phase::Countdown { ticks_left } if ticks_left > 1 => {
                self.phase = Phase::Countdown {
                    ticks_left: ticks_left - 1,
                };
                Transition::CountdownTick {
                    ticks_left: ticks_left - 1,
                }
            }
            Phase::Countdown { .. } => self.begin(),
            _ => Transition::Unchanged,
        }
    }

    fn begin(&mut self) -> Transition {
        self.phase = Phase::Running;
        if self.begun {
            return Transition::Unchanged;
        }
        self.begun = true;

        match self.exam.clone() {
            Some(exam) => Transition::ExamBegins {
                exam,
                remaining: self.remaining.unwrap_or(Duration::ZERO),
            },
            None => Transition::Unchanged,
        }
    }

    /// Advance the presentational remaining time, clamped at zero
    pub fn remaining_tick(&mut self, elapsed: Duration) -> Option<Duration> {
        if !matches!(self.phase, Phase::Countdown { .. } | Phase::Running) {
            return None;
        }
        let remaining = self.remaining?.saturating_sub(elapsed);
        self.remaining = Some(remaining);
        Some(remaining)
    }
}

/// Hint for a start that is still in the future
fn schedule_hint(b: &GlobalBroadcast, now: DateTime<Utc>) -> Option<ScheduleHint> {
    if !b.starts_after(now) {
        return None;
    }
    b.start_time.map(|start_time| ScheduleHint {
        start_time,
        duration_minutes: b.duration_minutes,
        display_name: b.display_name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn started(version: u64, start: i64, minutes: u32) -> GlobalBroadcast {
        GlobalBroadcast {
            version,
            is_started: true,
            exam_code: Some(ExamCode::new("MATH-20261017-001")),
            active_track_reference: Some(TrackRef::new("math")),
            display_name: Some("Algebra".into()),
            test_kind: Some(TestKind::SingleTrack),
            duration_minutes: Some(minutes),
            start_time: Some(t(start)),
            end_time: Some(t(start) + chrono::Duration::minutes(minutes as i64)),
            updated_at: Some(t(start)),
        }
    }

    fn count_down(r: &mut Reconciler) -> Vec<Transition> {
        (0..5).map(|_| r.countdown_tick()).collect()
    }

    #[test]
    fn idle_broadcast_waits() {
        let mut r = Reconciler::new(5);
        let idle = GlobalBroadcast::idle(1, t(0));

        assert_eq!(r.observe(&idle, t(0)), Transition::Waiting { hint: None });
        assert_eq!(r.observe(&idle, t(1)), Transition::Unchanged);
        assert_eq!(r.phase(), &Phase::Waiting { hint: None });
    }

    #[test]
    fn started_broadcast_counts_down_then_begins_once() {
        let mut r = Reconciler::new(5);

        let transition = r.observe(&started(2, 0, 60), t(0));
        assert_eq!(
            transition,
            Transition::CountdownStarted {
                ticks: 5,
                remaining: Duration::from_secs(3600)
            }
        );

        let steps = count_down(&mut r);
        assert_eq!(steps[0], Transition::CountdownTick { ticks_left: 4 });
        assert_eq!(steps[3], Transition::CountdownTick { ticks_left: 1 });
        assert!(matches!(
            &steps[4],
            Transition::ExamBegins { exam, remaining }
                if exam.display_name.as_deref() == Some("Algebra")
                    && *remaining == Duration::from_secs(3600)
        ));

        assert_eq!(r.phase(), &Phase::Running);
        assert_eq!(r.countdown_tick(), Transition::Unchanged);
        assert_eq!(r.observe(&started(3, 0, 60), t(10)), Transition::Unchanged);
    }

    #[test]
    fn remaining_uses_end_time_not_duration() {
        let mut r = Reconciler::new(5);

        // Joined 20 minutes late
        let transition = r.observe(&started(2, 0, 60), t(1200));
        assert_eq!(
            transition,
            Transition::CountdownStarted {
                ticks: 5,
                remaining: Duration::from_secs(2400)
            }
        );
    }

    #[test]
    fn remaining_falls_back_to_duration() {
        let mut r = Reconciler::new(5);
        let mut b = started(2, 0, 45);
        b.end_time = None;

        assert_eq!(
            r.observe(&b, t(600)),
            Transition::CountdownStarted {
                ticks: 5,
                remaining: Duration::from_secs(2700)
            }
        );
    }

    #[test]
    fn future_start_waits_and_reevaluates_same_version() {
        let mut r = Reconciler::new(5);
        let b = started(4, 300, 60);

        match r.observe(&b, t(0)) {
            Transition::Waiting { hint: Some(hint) } => {
                assert_eq!(hint.start_time, t(300));
                assert_eq!(hint.duration_minutes, Some(60));
            }
            other => panic!("expected waiting with hint, got {other:?}"),
        }
        assert_eq!(r.observe(&b, t(299)), Transition::Unchanged);
        assert!(matches!(
            r.observe(&b, t(300)),
            Transition::CountdownStarted { ticks: 5, .. }
        ));
    }

    #[test]
    fn ended_before_countdown() {
        let mut r = Reconciler::new(5);
        assert_eq!(r.observe(&started(2, 0, 60), t(3600)), Transition::Ended);
        assert_eq!(r.phase(), &Phase::Ended);
        assert_eq!(r.countdown_tick(), Transition::Unchanged);
    }

    #[test]
    fn going_idle_aborts_the_countdown() {
        let mut r = Reconciler::new(5);
        r.observe(&started(2, 0, 60), t(0));
        r.countdown_tick();

        assert_eq!(
            r.observe(&GlobalBroadcast::idle(3, t(2)), t(2)),
            Transition::CountdownAborted
        );
        assert_eq!(r.phase(), &Phase::Waiting { hint: None });
        assert_eq!(r.countdown_tick(), Transition::Unchanged);
        assert!(r.remaining().is_none());

        // A restart counts down from the top
        assert!(matches!(
            r.observe(&started(4, 10, 60), t(10)),
            Transition::CountdownStarted { ticks: 5, .. }
        ));
    }

    #[test]
    fn unchanged_version_is_skipped() {
        let mut r = Reconciler::new(5);
        let b = started(2, 0, 60);
        r.observe(&b, t(0));

        // Same version while counting down carries no new information
        assert_eq!(r.observe(&b, t(1)), Transition::Unchanged);
        assert_eq!(r.phase(), &Phase::Countdown { ticks_left: 5 });
        assert_eq!(r.last_version(), Some(2));
    }

    #[test]
    fn remaining_ticks_clamp_at_zero() {
        let mut r = Reconciler::new(5);
        assert_eq!(r.remaining_tick(Duration::from_secs(1)), None);

        let mut b = started(2, 0, 1);
        b.end_time = Some(t(2));
        r.observe(&b, t(0));

        assert_eq!(r.remaining_tick(Duration::from_secs(1)), Some(Duration::from_secs(1)));
        assert_eq!(r.remaining_tick(Duration::from_secs(1)), Some(Duration::ZERO));
        assert_eq!(r.remaining_tick(Duration::from_secs(1)), Some(Duration::ZERO));
    }

    #[test]
    fn zero_tick_countdown_begins_immediately() {
        let mut r = Reconciler::new(0);
        assert!(matches!(
            r.observe(&started(2, 0, 60), t(0)),
            Transition::ExamBegins { .. }
        ));
    }
}
