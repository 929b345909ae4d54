//! Session lifecycle controller
//!
//! Owns every write to `examSessions/*`, `exam/status` and `exam/lease`.
//! Write order matters because clients poll concurrently:
//! - start: lease, then session `active`, then broadcast
//! - stop: broadcast cleared, then session `completed`, then broadcast
//!   cleared again for a racing start, then lease released
//!
//! A start that finds its session completed after announcing withdraws the
//! broadcast it wrote.

use chrono::{DateTime, NaiveDate, Utc};
use invigil_api::{
    composite_track_reference, keys, ActiveLease, ExamSession, GlobalBroadcast, Schedule,
    SessionState, SubmissionCounters, SubmissionMetadata, TestKind,
};
use invigil_config::{AdminSettings, StartGuard};
use invigil_store::{AuditEvent, AuditEventType, Store, StoreExt};
use invigil_util::{Clock, ExamCode, GroupId, InvigilError, Result, TrackRef, WallClock};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::codegen::{sanitize_label, CodeGenerator, COMBINED_LABEL, DEFAULT_LABEL_MAX_LEN};
use crate::records::{Records, UPDATE_ATTEMPTS};

/// Admin input for a new session
#[derive(Debug, Clone)]
pub struct SessionDraft {
    pub display_name: String,
    pub test_kind: TestKind,
    pub tracks: Vec<TrackRef>,
    pub allowed_groups: BTreeSet<GroupId>,
    pub date: NaiveDate,
    /// Scheduled start, `HH:MM`
    pub start_time: String,
    pub duration_minutes: u32,
    /// Falls back to the configured question count
    pub question_count: Option<u32>,
    /// Exam code label; derived from the tracks when absent
    pub label: Option<String>,
    pub start_now: bool,
}

impl SessionDraft {
    pub fn single_track(
        track: impl Into<TrackRef>,
        date: NaiveDate,
        start_time: impl Into<String>,
        duration_minutes: u32,
    ) -> Self {
        let track = track.into();
        Self {
            display_name: track.to_string(),
            test_kind: TestKind::SingleTrack,
            tracks: vec![track],
            allowed_groups: BTreeSet::new(),
            date,
            start_time: start_time.into(),
            duration_minutes,
            question_count: None,
            label: None,
            start_now: false,
        }
    }

    pub fn combined(
        tracks: [TrackRef; 3],
        date: NaiveDate,
        start_time: impl Into<String>,
        duration_minutes: u32,
    ) -> Self {
        Self {
            display_name: "Combined test".into(),
            test_kind: TestKind::Combined,
            tracks: tracks.into(),
            allowed_groups: BTreeSet::new(),
            date,
            start_time: start_time.into(),
            duration_minutes,
            question_count: None,
            label: None,
            start_now: false,
        }
    }

    pub fn with_groups<I, G>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: Into<GroupId>,
    {
        self.allowed_groups.extend(groups.into_iter().map(Into::into));
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn starting_now(mut self) -> Self {
        self.start_now = true;
        self
    }

    /// Check the draft and resolve defaults. Nothing is written on failure.
    fn validate(&self, default_question_count: u32) -> Result<SessionPlan> {
        let required = self.test_kind.required_tracks();
        if self.tracks.len() != required {
            return Err(InvigilError::validation(format!(
                "{} test needs {} track(s), got {}",
                kind_name(self.test_kind),
                required,
                self.tracks.len()
            )));
        }
        if self.tracks.iter().any(|t| t.as_str().trim().is_empty()) {
            return Err(InvigilError::validation("track reference cannot be empty"));
        }
        let distinct: BTreeSet<&TrackRef> = self.tracks.iter().collect();
        if distinct.len() != self.tracks.len() {
            return Err(InvigilError::validation("tracks must be distinct"));
        }

        if self.allowed_groups.is_empty() {
            return Err(InvigilError::validation("at least one allowed group is required"));
        }
        if self.duration_minutes == 0 {
            return Err(InvigilError::validation("duration must be positive"));
        }

        let start = WallClock::parse(&self.start_time).map_err(|e| {
            InvigilError::validation(format!("start time '{}': {}", self.start_time, e))
        })?;

        let question_count = self.question_count.unwrap_or(default_question_count);
        if question_count == 0 {
            return Err(InvigilError::validation("question count must be positive"));
        }

        let label = match &self.label {
            Some(label) => sanitize_label(label),
            None => default_label(self.test_kind, &self.tracks),
        };
        if label.is_empty() {
            return Err(InvigilError::validation(
                "exam code label has no letters or digits",
            ));
        }

        let track_reference = match self.test_kind {
            TestKind::SingleTrack => self.tracks[0].clone(),
            TestKind::Combined => composite_track_reference(&self.tracks),
        };
        let display_name = if self.display_name.trim().is_empty() {
            track_reference.to_string()
        } else {
            self.display_name.trim().to_string()
        };

        Ok(SessionPlan {
            label,
            track_reference,
            test_kind: self.test_kind,
            tracks: self.tracks.clone(),
            display_name,
            schedule: Schedule {
                date: self.date,
                start,
                duration_minutes: self.duration_minutes,
            },
            question_count,
            allowed_groups: self.allowed_groups.clone(),
        })
    }
}

fn kind_name(kind: TestKind) -> &'static str {
    match kind {
        TestKind::SingleTrack => "single-track",
        TestKind::Combined => "combined",
    }
}

/// Code label used when the draft does not name one
pub fn default_label(kind: TestKind, tracks: &[TrackRef]) -> String {
    match (kind, tracks.first()) {
        (TestKind::SingleTrack, Some(track)) => sanitize_label(track.as_str())
            .chars()
            .take(DEFAULT_LABEL_MAX_LEN)
            .collect(),
        _ => COMBINED_LABEL.to_string(),
    }
}

/// A validated draft, ready to be stamped with a code
#[derive(Debug, Clone)]
struct SessionPlan {
    label: String,
    track_reference: TrackRef,
    test_kind: TestKind,
    tracks: Vec<TrackRef>,
    display_name: String,
    schedule: Schedule,
    question_count: u32,
    allowed_groups: BTreeSet<GroupId>,
}

impl SessionPlan {
    fn session(&self, code: &ExamCode, now: DateTime<Utc>) -> ExamSession {
        ExamSession {
            code: code.clone(),
            track_reference: self.track_reference.clone(),
            test_kind: self.test_kind,
            tracks: self.tracks.clone(),
            display_name: self.display_name.clone(),
            schedule: self.schedule.clone(),
            question_count: self.question_count,
            state: SessionState::Scheduled,
            allowed_groups: self.allowed_groups.clone(),
            counters: SubmissionCounters::default(),
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Result of a successful start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartReceipt {
    pub code: ExamCode,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub broadcast_version: u64,
}

/// Result of `create`
#[derive(Debug, Clone)]
pub struct CreateReceipt {
    pub code: ExamCode,
    pub session: ExamSession,
    /// Set when the draft asked to start now and the start succeeded
    pub started: Option<StartReceipt>,
    /// Why an immediate start was refused; the session stays scheduled
    pub start_refusal: Option<String>,
}

impl CreateReceipt {
    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }
}

/// Result of `stop`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReceipt {
    pub code: ExamCode,
    /// The session was already completed and nothing was written
    pub already_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Repairs made by `recover`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub repairs: Vec<String>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.repairs.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Stopped,
    Expired,
}

/// The admin-side state machine for exam sessions
pub struct LifecycleController {
    records: Records,
    codes: CodeGenerator,
    clock: Arc<dyn Clock>,
    settings: AdminSettings,
}

impl LifecycleController {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, settings: AdminSettings) -> Self {
        info!(
            start_guard = ?settings.start_guard,
            code_retry_limit = settings.code_retry_limit,
            "Lifecycle controller initialized"
        );
        if settings.start_guard == StartGuard::Unguarded {
            warn!("Start guard disabled: concurrent starts of different exams can both succeed");
        }

        Self {
            codes: CodeGenerator::new(store.clone(), settings.code_retry_limit),
            records: Records::new(store),
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &AdminSettings {
        &self.settings
    }

    pub fn codes(&self) -> &CodeGenerator {
        &self.codes
    }

    /// Create a session in `scheduled`, optionally starting it right away
    pub async fn create(&self, draft: SessionDraft) -> Result<CreateReceipt> {
        let plan = draft.validate(self.settings.question_count)?;
        let now = self.clock.now();

        let (code, _) = self
            .codes
            .reserve_exam_code(&plan.label, plan.schedule.date, |code| {
                plan.session(code, now)
            })
            .await?;
        let mut session = plan.session(&code, now);

        let metadata = SubmissionMetadata::for_session(&session);
        let store = self.records.store();
        if let Err(e) = store
            .set_json(
                &keys::submission_metadata(&session.track_reference, &code),
                &metadata,
            )
            .await
        {
            warn!(code = %code, error = %e, "Metadata write failed, releasing reserved code");
            if let Err(cleanup) = store.remove(&keys::exam_session(&code)).await {
                warn!(code = %code, error = %cleanup, "Could not remove reserved session");
            }
            return Err(e.into());
        }

        info!(
            code = %code,
            track = %session.track_reference,
            date = %session.schedule.date,
            start = %session.schedule.start,
            duration_minutes = session.schedule.duration_minutes,
            "Session created"
        );
        self.audit(AuditEventType::SessionCreated {
            code: code.clone(),
            start_now: draft.start_now,
        })
        .await;

        let mut receipt = CreateReceipt {
            code: code.clone(),
            session: session.clone(),
            started: None,
            start_refusal: None,
        };
        if !draft.start_now {
            return Ok(receipt);
        }

        match self.start(&code).await {
            Ok(started) => {
                session.state = SessionState::Active;
                session.started_at = Some(started.start_time);
                receipt.session = session;
                receipt.started = Some(started);
            }
            Err(e) => {
                // The session exists either way; the caller learns why it
                // did not start.
                receipt.start_refusal = Some(e.to_string());
            }
        }
        Ok(receipt)
    }

    /// Move a scheduled session to `active` and announce it
    pub async fn start(&self, code: &ExamCode) -> Result<StartReceipt> {
        let session = self.records.session(code).await?.value;
        match session.state {
            SessionState::Completed => {
                return Err(InvigilError::conflict(format!(
                    "exam {} is already completed",
                    code
                )));
            }
            SessionState::Active => {
                debug!(code = %code, "Start on an active session");
                return self.current_receipt(&session).await;
            }
            SessionState::Scheduled => {}
        }

        let broadcast = self.records.broadcast().await?.value;
        if broadcast.is_started
            && let Some(other) = broadcast.exam_code.as_ref().filter(|c| *c != code)
        {
            return Err(self
                .refuse(code, format!("exam {} is already active", other))
                .await);
        }

        let claimed = match self.settings.start_guard {
            StartGuard::Leased => self.acquire_lease(code).await?,
            StartGuard::Unguarded => false,
        };
        let leased = self.settings.start_guard == StartGuard::Leased;

        match self.activate_and_announce(code, leased).await {
            Ok(receipt) => {
                info!(
                    code = %code,
                    start_time = %receipt.start_time,
                    end_time = %receipt.end_time,
                    version = receipt.broadcast_version,
                    "Session started"
                );
                self.audit(AuditEventType::SessionStarted {
                    code: code.clone(),
                    start_time: receipt.start_time,
                    end_time: receipt.end_time,
                })
                .await;
                Ok(receipt)
            }
            Err(e) => {
                // A concurrent start of the same code may own the activation
                if claimed && !self.is_live(Some(code)).await.unwrap_or(true) {
                    self.release_lease(code).await;
                }
                Err(e)
            }
        }
    }

    async fn activate_and_announce(&self, code: &ExamCode, guarded: bool) -> Result<StartReceipt> {
        let now = self.clock.now();
        let path = keys::exam_session(code);

        let session: ExamSession = self
            .records
            .update(&path, |s: &mut ExamSession| {
                if s.state.can_transition_to(SessionState::Active) {
                    s.state = SessionState::Active;
                    s.started_at = Some(now);
                    return Ok(true);
                }
                Err(InvigilError::conflict(match s.state {
                    SessionState::Active => format!("exam {} was started concurrently", code),
                    _ => format!("exam {} is already completed", code),
                }))
            })
            .await?;

        let written = self
            .write_broadcast(guarded, |current| {
                if guarded && current.is_started && !current.references(code) {
                    return Err(InvigilError::conflict(format!(
                        "exam {} is already active",
                        current
                            .exam_code
                            .as_ref()
                            .map_or("<unknown>", ExamCode::as_str)
                    )));
                }
                Ok(Some(GlobalBroadcast::started(0, &session, now, now)))
            })
            .await;

        match written {
            Ok(Some(broadcast)) => {
                if !self.is_live(Some(code)).await? {
                    warn!(code = %code, "Session stopped while starting, withdrawing broadcast");
                    self.withdraw_broadcast(code, self.clock.now()).await?;
                    return Err(InvigilError::conflict(format!(
                        "exam {} was stopped while starting",
                        code
                    )));
                }
                Ok(StartReceipt {
                    code: code.clone(),
                    start_time: now,
                    end_time: broadcast.end_time.unwrap_or(
                        now + chrono::Duration::minutes(session.schedule.duration_minutes as i64),
                    ),
                    broadcast_version: broadcast.version,
                })
            }
            Ok(None) => Err(InvigilError::internal("start produced no broadcast")),
            Err(e) => {
                warn!(code = %code, error = %e, "Broadcast write failed, reverting session to scheduled");
                let reverted = self
                    .records
                    .update(&path, |s: &mut ExamSession| {
                        if s.state != SessionState::Active {
                            return Ok(false);
                        }
                        s.state = SessionState::Scheduled;
                        s.started_at = None;
                        Ok(true)
                    })
                    .await;
                if let Err(revert_error) = reverted {
                    warn!(code = %code, error = %revert_error, "Could not revert session");
                }
                Err(e)
            }
        }
    }

    /// Receipt for a session that is already active
    async fn current_receipt(&self, session: &ExamSession) -> Result<StartReceipt> {
        let broadcast = self.records.broadcast().await?.value;
        if broadcast.references(&session.code)
            && let (Some(start_time), Some(end_time)) = (broadcast.start_time, broadcast.end_time)
        {
            return Ok(StartReceipt {
                code: session.code.clone(),
                start_time,
                end_time,
                broadcast_version: broadcast.version,
            });
        }

        let start_time = session.started_at.ok_or_else(|| {
            InvigilError::internal(format!("active exam {} has no start time", session.code))
        })?;
        Ok(StartReceipt {
            code: session.code.clone(),
            start_time,
            end_time: session.deadline().unwrap_or(start_time),
            broadcast_version: broadcast.version,
        })
    }

    /// Claim `exam/lease` for `code` with a compare-and-swap.
    ///
    /// Returns `false` when `code` already held the lease; only the claiming
    /// call may release it on failure.
    async fn acquire_lease(&self, code: &ExamCode) -> Result<bool> {
        let lease = self.records.lease().await?;

        if lease.value.is_held_by(code) {
            debug!(code = %code, "Lease already held for this exam");
            return Ok(false);
        }

        if let Some(holder) = lease.value.holder.as_ref() {
            // A holder whose session is still scheduled may be mid-start
            let stale = match self.records.try_session(holder).await? {
                Some(doc) => doc.value.is_completed(),
                None => true,
            };
            if !stale {
                return Err(self
                    .refuse(code, format!("exam {} is already active", holder))
                    .await);
            }
            warn!(holder = %holder, code = %code, "Taking over stale lease");
        }

        let claim = ActiveLease::held_by(code, self.clock.now());
        match self
            .records
            .store()
            .put_json_if(keys::EXAM_LEASE, lease.revision, &claim)
            .await
        {
            Ok(_) => {
                debug!(code = %code, "Lease acquired");
                Ok(true)
            }
            Err(e) if e.is_write_conflict() => Err(self
                .refuse(code, "another exam was started concurrently".to_string())
                .await),
            Err(e) => Err(e.into()),
        }
    }

    /// Release `exam/lease` if `code` holds it. Failures leave a stale lease
    /// that the next start or `recover` takes over.
    async fn release_lease(&self, code: &ExamCode) {
        let released = async {
            let lease = self.records.lease().await?;
            if !lease.value.is_held_by(code) {
                return Ok(false);
            }
            self.records
                .store()
                .put_json_if(keys::EXAM_LEASE, lease.revision, &ActiveLease::released())
                .await?;
            Ok::<_, InvigilError>(true)
        }
        .await;

        match released {
            Ok(true) => debug!(code = %code, "Lease released"),
            Ok(false) => {}
            Err(e) => warn!(code = %code, error = %e, "Could not release lease"),
        }
    }

    /// Read-modify-write of the broadcast, bumping its version.
    ///
    /// `next` sees the current record and returns the replacement, or `None`
    /// to leave it alone. When `guarded`, the write is conditional on the
    /// revision that was read.
    async fn write_broadcast<F>(&self, guarded: bool, mut next: F) -> Result<Option<GlobalBroadcast>>
    where
        F: FnMut(&GlobalBroadcast) -> Result<Option<GlobalBroadcast>> + Send,
    {
        let store = self.records.store();

        for attempt in 1..=UPDATE_ATTEMPTS {
            let current = self.records.broadcast().await?;
            let Some(mut replacement) = next(&current.value)? else {
                return Ok(None);
            };
            replacement.version = current.value.version + 1;

            let written = if guarded {
                store
                    .put_json_if(keys::EXAM_STATUS, current.revision, &replacement)
                    .await
            } else {
                store.set_json(keys::EXAM_STATUS, &replacement).await
            };

            match written {
                Ok(_) => return Ok(Some(replacement)),
                Err(e) if e.is_write_conflict() => {
                    debug!(attempt, "Broadcast changed underneath us, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(InvigilError::conflict(format!(
            "broadcast kept changing after {} attempts",
            UPDATE_ATTEMPTS
        )))
    }

    /// Reset the broadcast to idle if it names `code`
    async fn withdraw_broadcast(&self, code: &ExamCode, now: DateTime<Utc>) -> Result<bool> {
        let cleared = self
            .write_broadcast(true, |current| {
                Ok(current
                    .references(code)
                    .then(|| GlobalBroadcast::idle(0, now)))
            })
            .await?;
        Ok(cleared.is_some())
    }

    /// Complete an active session. Completed sessions are a no-op.
    pub async fn stop(&self, code: &ExamCode) -> Result<StopReceipt> {
        self.complete(code, Completion::Stopped).await
    }

    async fn complete(&self, code: &ExamCode, cause: Completion) -> Result<StopReceipt> {
        let session = self.records.session(code).await?.value;
        match session.state {
            SessionState::Completed => {
                debug!(code = %code, "Stop on a completed session");
                return Ok(StopReceipt {
                    code: code.clone(),
                    already_completed: true,
                    completed_at: session.completed_at,
                });
            }
            SessionState::Scheduled => {
                return Err(InvigilError::conflict(format!(
                    "exam {} has not been started",
                    code
                )));
            }
            SessionState::Active => {}
        }

        let now = self.clock.now();
        self.withdraw_broadcast(code, now).await?;

        let mut already_completed = false;
        let session: ExamSession = self
            .records
            .update(&keys::exam_session(code), |s: &mut ExamSession| {
                already_completed = s.is_completed();
                if already_completed {
                    return Ok(false);
                }
                if !s.state.can_transition_to(SessionState::Completed) {
                    return Err(InvigilError::conflict(format!(
                        "exam {} was reset while stopping",
                        code
                    )));
                }
                s.state = SessionState::Completed;
                s.completed_at = Some(now);
                Ok(true)
            })
            .await?;

        // A start racing this stop may have announced after the first clear
        self.withdraw_broadcast(code, now).await?;
        self.release_lease(code).await;

        if !already_completed {
            let event = match cause {
                Completion::Stopped => {
                    info!(code = %code, "Session stopped");
                    AuditEventType::SessionStopped { code: code.clone() }
                }
                Completion::Expired => {
                    info!(code = %code, "Session expired");
                    AuditEventType::SessionExpired { code: code.clone() }
                }
            };
            self.audit(event).await;
        }

        Ok(StopReceipt {
            code: code.clone(),
            already_completed,
            completed_at: session.completed_at,
        })
    }

    /// Remove a scheduled or completed session and its metadata
    pub async fn delete(&self, code: &ExamCode) -> Result<()> {
        let session = self.records.session(code).await?.value;
        if !session.state.is_deletable() {
            return Err(InvigilError::conflict(format!(
                "exam {} is active; stop it before deleting",
                code
            )));
        }

        let store = self.records.store();
        store.remove(&keys::exam_session(code)).await?;
        store
            .remove(&keys::submission_metadata(&session.track_reference, code))
            .await?;

        info!(code = %code, state = %session.state, "Session deleted");
        self.audit(AuditEventType::SessionDeleted { code: code.clone() })
            .await;
        Ok(())
    }

    pub async fn get(&self, code: &ExamCode) -> Result<ExamSession> {
        Ok(self.records.session(code).await?.value)
    }

    /// Every session, ordered by code
    pub async fn list(&self) -> Result<Vec<ExamSession>> {
        let keys = self.records.store().list(keys::EXAM_SESSIONS).await?;

        let mut sessions = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(doc) = self.records.try_session(&ExamCode::new(key)).await? {
                sessions.push(doc.value);
            }
        }
        sessions.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(sessions)
    }

    /// The broadcast as clients see it; idle when never written
    pub async fn current_broadcast(&self) -> Result<GlobalBroadcast> {
        Ok(self.records.broadcast().await?.value)
    }

    /// Complete every active session whose deadline has passed
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<Vec<ExamCode>> {
        let mut expired = Vec::new();

        for session in self.list().await? {
            let overdue = session.is_active() && session.deadline().is_some_and(|d| d <= now);
            if !overdue {
                continue;
            }
            let receipt = self.complete(&session.code, Completion::Expired).await?;
            if !receipt.already_completed {
                expired.push(session.code);
            }
        }

        Ok(expired)
    }

    /// Repair state left behind by a controller that died mid-operation
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let now = self.clock.now();

        let broadcast = self.records.broadcast().await?.value;
        if broadcast.is_started {
            let named = broadcast.exam_code.clone();
            if !self.is_live(named.as_ref()).await? {
                let cleared = self
                    .write_broadcast(true, |current| {
                        Ok((current.is_started && current.exam_code == named)
                            .then(|| GlobalBroadcast::idle(0, now)))
                    })
                    .await?;
                if cleared.is_some() {
                    report.repairs.push(format!(
                        "cleared broadcast naming {} which is not active",
                        describe(named.as_ref())
                    ));
                }
            }
        }

        let lease = self.records.lease().await?;
        if let Some(holder) = lease.value.holder.clone()
            && !self.is_live(Some(&holder)).await?
        {
            match self
                .records
                .store()
                .put_json_if(keys::EXAM_LEASE, lease.revision, &ActiveLease::released())
                .await
            {
                Ok(_) => report
                    .repairs
                    .push(format!("released lease held by {} which is not active", holder)),
                Err(e) if e.is_write_conflict() => {
                    debug!(holder = %holder, "Lease changed during recovery, leaving it");
                }
                Err(e) => return Err(e.into()),
            }
        }

        for detail in &report.repairs {
            warn!(detail = %detail, "State repaired");
            self.audit(AuditEventType::StateRepaired {
                detail: detail.clone(),
            })
            .await;
        }
        if report.is_clean() {
            debug!("Recovery found nothing to repair");
        }

        Ok(report)
    }

    async fn is_live(&self, code: Option<&ExamCode>) -> Result<bool> {
        let Some(code) = code else {
            return Ok(false);
        };
        Ok(self
            .records
            .try_session(code)
            .await?
            .is_some_and(|doc| doc.value.is_active()))
    }

    async fn refuse(&self, code: &ExamCode, reason: String) -> InvigilError {
        warn!(code = %code, reason = %reason, "Start refused");
        self.audit(AuditEventType::StartRefused {
            code: code.clone(),
            reason: reason.clone(),
        })
        .await;
        InvigilError::conflict(reason)
    }

    async fn audit(&self, event: AuditEventType) {
        let event = AuditEvent::new(self.clock.now(), event);
        if let Err(e) = self.records.store().append_audit(&event).await {
            warn!(error = %e, "Failed to record audit event");
        }
    }
}

fn describe(code: Option<&ExamCode>) -> &str {
    code.map_or("no exam", ExamCode::as_str)
}
