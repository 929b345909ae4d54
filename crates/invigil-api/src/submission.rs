//! Submissions and marks

use chrono::{DateTime, Utc};
use invigil_util::{ExamCode, StudentId, TrackRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::keys;

/// Grader verdict for one question. An absent entry means unmarked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mark {
    Correct,
    Incorrect,
}

/// Locates one submission: one per (student, session)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionKey {
    pub track: TrackRef,
    pub code: ExamCode,
    pub student: StudentId,
}

impl SubmissionKey {
    pub fn new(track: TrackRef, code: ExamCode, student: StudentId) -> Self {
        Self {
            track,
            code,
            student,
        }
    }

    pub fn path(&self) -> String {
        keys::submission(&self.track, &self.code, &self.student)
    }
}

impl fmt::Display for SubmissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.code, self.student)
    }
}

/// A student's answers for one session and their grading state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub student_id: StudentId,
    pub exam_code: ExamCode,
    pub track_reference: TrackRef,
    pub question_count: u32,
    /// Question number (1..=N) to answer text; unanswered questions are absent
    pub answers: BTreeMap<u32, String>,
    #[serde(default)]
    pub marks: BTreeMap<u32, Mark>,
    /// Number of questions marked correct
    #[serde(default)]
    pub score: u32,
    /// Percentage frozen at publish time
    pub manual_score: Option<u32>,
    /// Set the first time every question carried a mark
    #[serde(default)]
    pub graded: bool,
    #[serde(default)]
    pub result_published: bool,
    pub submitted_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Submission {
    pub fn key(&self) -> SubmissionKey {
        SubmissionKey::new(
            self.track_reference.clone(),
            self.exam_code.clone(),
            self.student_id.clone(),
        )
    }

    pub fn in_range(&self, question: u32) -> bool {
        (1..=self.question_count).contains(&question)
    }

    pub fn correct_count(&self) -> u32 {
        self.marks
            .iter()
            .filter(|(q, m)| self.in_range(**q) && **m == Mark::Correct)
            .count() as u32
    }

    pub fn marked_count(&self) -> u32 {
        (1..=self.question_count)
            .filter(|q| self.marks.contains_key(q))
            .count() as u32
    }

    /// Question numbers in 1..=N with no mark
    pub fn unmarked(&self) -> Vec<u32> {
        (1..=self.question_count)
            .filter(|q| !self.marks.contains_key(q))
            .collect()
    }

    pub fn is_fully_marked(&self) -> bool {
        self.marked_count() == self.question_count
    }

    pub fn answered_count(&self) -> u32 {
        self.answers.len() as u32
    }
}

/// `100 * correct / total`, rounded to the nearest integer with halves up
pub fn percentage(correct: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let correct = correct.min(total) as u64;
    let total = total as u64;
    ((200 * correct + total) / (2 * total)) as u32
}
