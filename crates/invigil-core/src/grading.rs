//! Grading and result publication
//!
//! A result can only be released once every question in 1..=N carries a
//! mark. Publishing freezes the percentage; later marks are still recorded
//! but never change what the student was shown.

use chrono::{DateTime, Utc};
use invigil_api::{keys, percentage, ExamSession, Mark, SessionState, Submission, SubmissionKey};
use invigil_store::{AuditEvent, AuditEventType, Store, StoreExt};
use invigil_util::{Clock, ExamCode, GroupId, InvigilError, Result, StudentId};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::records::Records;

/// A student's answers as handed in
#[derive(Debug, Clone)]
pub struct SubmissionDraft {
    pub code: ExamCode,
    pub student: StudentId,
    /// Group the student is enrolled in
    pub group: GroupId,
    /// Question number to answer text; blank answers are dropped
    pub answers: BTreeMap<u32, String>,
}

/// Outcome of a publish request. A rejection is a normal answer, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { manual_score: u32 },
    Rejected { unmarked: Vec<u32> },
    AlreadyPublished { manual_score: u32 },
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        !matches!(self, PublishOutcome::Rejected { .. })
    }
}

/// Where marking of one submission stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradingProgress {
    pub question_count: u32,
    pub marked: u32,
    pub correct: u32,
    pub score: u32,
    pub unmarked: Vec<u32>,
    pub graded: bool,
    pub result_published: bool,
    pub manual_score: Option<u32>,
}

impl GradingProgress {
    pub fn of(submission: &Submission) -> Self {
        Self {
            question_count: submission.question_count,
            marked: submission.marked_count(),
            correct: submission.correct_count(),
            score: submission.score,
            unmarked: submission.unmarked(),
            graded: submission.graded,
            result_published: submission.result_published,
            manual_score: submission.manual_score,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.unmarked.is_empty()
    }
}

pub struct GradingCoordinator {
    records: Records,
    clock: Arc<dyn Clock>,
}

impl GradingCoordinator {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Records::new(store),
            clock,
        }
    }

    /// Store a submission and count it on its session
    pub async fn submit(&self, draft: SubmissionDraft) -> Result<Submission> {
        let session = self.records.session(&draft.code).await?.value;
        if session.state == SessionState::Scheduled {
            return Err(InvigilError::conflict(format!(
                "exam {} has not started",
                draft.code
            )));
        }
        if !session.allows_group(&draft.group) {
            return Err(InvigilError::conflict(format!(
                "group {} may not sit {}",
                draft.group, draft.code
            )));
        }

        let answers = clean_answers(&session, draft.answers)?;
        let submission = Submission {
            student_id: draft.student.clone(),
            exam_code: session.code.clone(),
            track_reference: session.track_reference.clone(),
            question_count: session.question_count,
            answers,
            marks: BTreeMap::new(),
            score: 0,
            manual_score: None,
            graded: false,
            result_published: false,
            submitted_at: self.clock.now(),
            published_at: None,
        };

        let key = submission.key();
        match self
            .records
            .store()
            .put_json_if(&key.path(), None, &submission)
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_write_conflict() => {
                return Err(InvigilError::conflict(format!(
                    "{} has already submitted {}",
                    draft.student, draft.code
                )));
            }
            Err(e) => return Err(e.into()),
        }

        self.bump_counters(&session.code, |s| s.counters.record_submission())
            .await?;

        info!(
            code = %session.code,
            student = %draft.student,
            answered = submission.answered_count(),
            "Submission received"
        );
        Ok(submission)
    }

    /// Set (`Some`) or clear (`None`) the mark for one question
    pub async fn set_mark(
        &self,
        key: &SubmissionKey,
        question: u32,
        mark: Option<Mark>,
    ) -> Result<GradingProgress> {
        let mut newly_graded = false;

        let submission: Submission = self
            .records
            .update(&key.path(), |s: &mut Submission| {
                newly_graded = false;
                if !s.in_range(question) {
                    return Err(InvigilError::validation(format!(
                        "question {} is outside 1..={}",
                        question, s.question_count
                    )));
                }
                if s.marks.get(&question) == mark.as_ref() {
                    return Ok(false);
                }

                match mark {
                    Some(m) => s.marks.insert(question, m),
                    None => s.marks.remove(&question),
                };

                if !s.result_published {
                    s.score = s.correct_count();
                    if !s.graded && s.is_fully_marked() {
                        s.graded = true;
                        newly_graded = true;
                    }
                }
                Ok(true)
            })
            .await
            .map_err(|e| match e {
                InvigilError::NotFound(_) => {
                    InvigilError::not_found(format!("submission {}", key))
                }
                other => other,
            })?;

        debug!(submission = %key, question, mark = ?mark, "Mark recorded");

        if newly_graded {
            self.bump_counters(&key.code, |s| s.counters.record_graded())
                .await?;
            info!(submission = %key, score = submission.score, "Submission fully graded");
        }

        Ok(GradingProgress::of(&submission))
    }

    /// Release a result, provided every question is marked
    pub async fn publish(&self, key: &SubmissionKey) -> Result<PublishOutcome> {
        let now = self.clock.now();
        let mut outcome = None;

        self.records
            .update(&key.path(), |s: &mut Submission| {
                if s.result_published {
                    let frozen = s
                        .manual_score
                        .unwrap_or_else(|| percentage(s.correct_count(), s.question_count));
                    outcome = Some(PublishOutcome::AlreadyPublished {
                        manual_score: frozen,
                    });
                    return Ok(false);
                }

                let unmarked = s.unmarked();
                if !unmarked.is_empty() {
                    outcome = Some(PublishOutcome::Rejected { unmarked });
                    return Ok(false);
                }

                let manual_score = percentage(s.correct_count(), s.question_count);
                publish_submission(s, manual_score, now);
                outcome = Some(PublishOutcome::Published { manual_score });
                Ok(true)
            })
            .await
            .map_err(|e| match e {
                InvigilError::NotFound(_) => {
                    InvigilError::not_found(format!("submission {}", key))
                }
                other => other,
            })?;

        let outcome =
            outcome.ok_or_else(|| InvigilError::internal("publish produced no outcome"))?;

        match &outcome {
            PublishOutcome::Published { manual_score } => {
                self.bump_counters(&key.code, |s| s.counters.record_published())
                    .await?;
                info!(submission = %key, manual_score, "Result published");
                self.audit(AuditEventType::ResultPublished {
                    code: key.code.clone(),
                    student: key.student.clone(),
                    manual_score: *manual_score,
                })
                .await;
            }
            PublishOutcome::Rejected { unmarked } => {
                debug!(submission = %key, unmarked = unmarked.len(), "Publish rejected");
            }
            PublishOutcome::AlreadyPublished { .. } => {
                debug!(submission = %key, "Result already published");
            }
        }

        Ok(outcome)
    }

    pub async fn progress(&self, key: &SubmissionKey) -> Result<GradingProgress> {
        let submission = self.submission(key).await?;
        Ok(GradingProgress::of(&submission))
    }

    pub async fn submission(&self, key: &SubmissionKey) -> Result<Submission> {
        self.records
            .store()
            .get_json::<Submission>(&key.path())
            .await?
            .map(|doc| doc.value)
            .ok_or_else(|| InvigilError::not_found(format!("submission {}", key)))
    }

    /// Every submission for a session, ordered by student
    pub async fn list_submissions(&self, code: &ExamCode) -> Result<Vec<Submission>> {
        let session = self.records.session(code).await?.value;
        let store = self.records.store();
        let parent = keys::session_submissions(&session.track_reference, code);

        let mut submissions = Vec::new();
        for child in store.list(&parent).await? {
            if child == keys::METADATA_KEY {
                continue;
            }
            if let Some(doc) = store
                .get_json::<Submission>(&keys::join(&parent, &child))
                .await?
            {
                submissions.push(doc.value);
            }
        }
        Ok(submissions)
    }

    async fn bump_counters<F>(&self, code: &ExamCode, mut bump: F) -> Result<()>
    where
        F: FnMut(&mut ExamSession) + Send,
    {
        self.records
            .update(&keys::exam_session(code), |s: &mut ExamSession| {
                bump(s);
                Ok(true)
            })
            .await?;
        Ok(())
    }

    async fn audit(&self, event: AuditEventType) {
        let event = AuditEvent::new(self.clock.now(), event);
        if let Err(e) = self.records.store().append_audit(&event).await {
            warn!(error = %e, "Failed to record audit event");
        }
    }
}

fn publish_submission(s: &mut Submission, manual_score: u32, now: DateTime<Utc>) {
    s.score = s.correct_count();
    s.manual_score = Some(manual_score);
    s.result_published = true;
    s.published_at = Some(now);
}

/// Drop blank answers and reject question numbers outside the session's range
fn clean_answers(
    session: &ExamSession,
    answers: BTreeMap<u32, String>,
) -> Result<BTreeMap<u32, String>> {
    let mut cleaned = BTreeMap::new();
    for (question, answer) in answers {
        if !(1..=session.question_count).contains(&question) {
            return Err(InvigilError::validation(format!(
                "question {} is outside 1..={}",
                question, session.question_count
            )));
        }
        let answer = answer.trim();
        if !answer.is_empty() {
            cleaned.insert(question, answer.to_string());
        }
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LifecycleController, SessionDraft};
    use chrono::{NaiveDate, TimeZone};
    use invigil_config::AdminSettings;
    use invigil_store::MemoryStore;
    use invigil_util::ManualClock;

    struct Fixture {
        grading: GradingCoordinator,
        lifecycle: LifecycleController,
        code: ExamCode,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap(),
        ));
        let lifecycle =
            LifecycleController::new(store.clone(), clock.clone(), AdminSettings::default());
        let draft = SessionDraft::single_track(
            "math",
            NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
            "09:00",
            60,
        )
        .with_groups(["G1"])
        .starting_now();
        let code = lifecycle.create(draft).await.unwrap().code;

        Fixture {
            grading: GradingCoordinator::new(store, clock),
            lifecycle,
            code,
        }
    }

    impl Fixture {
        async fn submit(&self, student: &str) -> SubmissionKey {
            let answers = (1..=40).map(|q| (q, format!("answer {q}"))).collect();
            self.grading
                .submit(SubmissionDraft {
                    code: self.code.clone(),
                    student: StudentId::new(student),
                    group: GroupId::new("G1"),
                    answers,
                })
                .await
                .unwrap()
                .key()
        }

        async fn mark_all(&self, key: &SubmissionKey, correct: u32) {
            for q in 1..=40 {
                let mark = if q <= correct { Mark::Correct } else { Mark::Incorrect };
                self.grading.set_mark(key, q, Some(mark)).await.unwrap();
            }
        }

        async fn counters(&self) -> invigil_api::SubmissionCounters {
            self.lifecycle.get(&self.code).await.unwrap().counters
        }
    }

    #[tokio::test]
    async fn submit_refuses_groups_not_on_the_roster() {
        let f = fixture().await;

        let err = f
            .grading
            .submit(SubmissionDraft {
                code: f.code.clone(),
                student: StudentId::new("STU20260001"),
                group: GroupId::new("G2"),
                answers: BTreeMap::new(),
            })
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "{err}");
        assert_eq!(f.counters().await.total, 0);
    }

    #[tokio::test]
    async fn submit_drops_blank_answers_and_counts() {
        let f = fixture().await;

        let mut answers = BTreeMap::new();
        answers.insert(1, "B".to_string());
        answers.insert(2, "   ".to_string());
        answers.insert(40, " D ".to_string());
        let submission = f
            .grading
            .submit(SubmissionDraft {
                code: f.code.clone(),
                student: StudentId::new("STU20260001"),
                group: GroupId::new("G1"),
                answers,
            })
            .await
            .unwrap();

        assert_eq!(submission.answered_count(), 2);
        assert_eq!(submission.answers.get(&40).map(String::as_str), Some("D"));

        let counters = f.counters().await;
        assert_eq!((counters.total, counters.pending), (1, 1));
    }

    #[tokio::test]
    async fn submit_rejects_out_of_range_and_duplicates() {
        let f = fixture().await;

        let mut answers = BTreeMap::new();
        answers.insert(41, "A".to_string());
        let err = f
            .grading
            .submit(SubmissionDraft {
                code: f.code.clone(),
                student: StudentId::new("STU20260001"),
                group: GroupId::new("G1"),
                answers,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, InvigilError::Validation(_)));

        f.submit("STU20260001").await;
        let err = f
            .grading
            .submit(SubmissionDraft {
                code: f.code.clone(),
                student: StudentId::new("STU20260001"),
                group: GroupId::new("G1"),
                answers: BTreeMap::new(),
            })
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(f.counters().await.total, 1);
    }

    #[tokio::test]
    async fn set_mark_validates_question_and_submission() {
        let f = fixture().await;
        let key = f.submit("STU20260001").await;

        for q in [0, 41] {
            let err = f.grading.set_mark(&key, q, Some(Mark::Correct)).await.unwrap_err();
            assert!(matches!(err, InvigilError::Validation(_)));
        }

        let missing = SubmissionKey::new(key.track.clone(), key.code.clone(), StudentId::new("STU20269999"));
        let err = f.grading.set_mark(&missing, 1, Some(Mark::Correct)).await.unwrap_err();
        assert!(matches!(err, InvigilError::NotFound(_)));
    }

    #[tokio::test]
    async fn score_tracks_marks_before_publish() {
        let f = fixture().await;
        let key = f.submit("STU20260001").await;

        f.grading.set_mark(&key, 1, Some(Mark::Correct)).await.unwrap();
        f.grading.set_mark(&key, 2, Some(Mark::Correct)).await.unwrap();
        let progress = f.grading.set_mark(&key, 2, None).await.unwrap();

        assert_eq!(progress.score, 1);
        assert_eq!(progress.marked, 1);
        assert_eq!(progress.unmarked.len(), 39);
        assert!(!progress.graded);
    }

    #[tokio::test]
    async fn publish_requires_every_mark() {
        let f = fixture().await;
        let key = f.submit("STU20260001").await;

        for q in 1..=39 {
            f.grading.set_mark(&key, q, Some(Mark::Correct)).await.unwrap();
        }
        assert_eq!(
            f.grading.publish(&key).await.unwrap(),
            PublishOutcome::Rejected { unmarked: vec![40] }
        );
        assert_eq!(f.counters().await.graded, 0);

        f.grading.set_mark(&key, 40, Some(Mark::Incorrect)).await.unwrap();
        let counters = f.counters().await;
        assert_eq!((counters.pending, counters.graded), (0, 1));

        // 39 / 40 = 97.5 rounds up
        assert_eq!(
            f.grading.publish(&key).await.unwrap(),
            PublishOutcome::Published { manual_score: 98 }
        );
        assert_eq!(f.counters().await.published, 1);

        let submission = f.grading.submission(&key).await.unwrap();
        assert!(submission.result_published);
        assert!(submission.published_at.is_some());
    }

    #[tokio::test]
    async fn republish_returns_frozen_score() {
        let f = fixture().await;
        let key = f.submit("STU20260001").await;
        f.mark_all(&key, 13).await;

        assert_eq!(
            f.grading.publish(&key).await.unwrap(),
            PublishOutcome::Published { manual_score: 33 }
        );

        // Later corrections are recorded but do not move the released result
        let progress = f.grading.set_mark(&key, 40, Some(Mark::Correct)).await.unwrap();
        assert_eq!(progress.correct, 14);
        assert_eq!(progress.score, 13);
        assert_eq!(progress.manual_score, Some(33));

        assert_eq!(
            f.grading.publish(&key).await.unwrap(),
            PublishOutcome::AlreadyPublished { manual_score: 33 }
        );
        assert_eq!(f.counters().await.published, 1);
    }

    #[tokio::test]
    async fn graded_counter_moves_once() {
        let f = fixture().await;
        let key = f.submit("STU20260001").await;
        f.mark_all(&key, 40).await;

        f.grading.set_mark(&key, 5, None).await.unwrap();
        f.grading.set_mark(&key, 5, Some(Mark::Correct)).await.unwrap();

        let counters = f.counters().await;
        assert_eq!((counters.total, counters.pending, counters.graded), (1, 0, 1));
    }

    #[tokio::test]
    async fn list_skips_metadata() {
        let f = fixture().await;
        f.submit("STU20260002").await;
        f.submit("STU20260001").await;

        let students: Vec<String> = f
            .grading
            .list_submissions(&f.code)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.student_id.to_string())
            .collect();
        assert_eq!(students, vec!["STU20260001", "STU20260002"]);
    }

    #[tokio::test]
    async fn scheduled_sessions_take_no_submissions() {
        let f = fixture().await;
        let draft = SessionDraft::single_track(
            "math",
            NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
            "09:00",
            60,
        )
        .with_groups(["G1"]);
        let code = f.lifecycle.create(draft).await.unwrap().code;

        let err = f
            .grading
            .submit(SubmissionDraft {
                code,
                student: StudentId::new("STU20260001"),
                group: GroupId::new("G1"),
                answers: BTreeMap::new(),
            })
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }
}
