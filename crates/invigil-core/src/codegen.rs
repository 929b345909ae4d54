//! Human-readable identifier generation
//!
//! Exam codes look like `PHYSICS-20261017-003`: a sanitised label, the
//! scheduled date and a per-day sequence. Enrollment ids look like
//! `STU20260042`. Both are reserved with a create-if-absent write, so two
//! generators racing on the same prefix cannot hand out the same id; the
//! loser re-scans and takes the next number.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use invigil_api::keys;
use invigil_store::{Store, StoreExt};
use invigil_util::{ExamCode, GroupId, InvigilError, Result, StudentId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Minimum width of the exam code sequence number
pub const EXAM_CODE_SEQUENCE_WIDTH: usize = 3;

/// Longest label taken from a track reference when none is given
pub const DEFAULT_LABEL_MAX_LEN: usize = 8;

/// Label used for combined tests when none is given
pub const COMBINED_LABEL: &str = "CMB";

/// Upper-case ASCII alphanumerics only
pub fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// `LABEL-YYYYMMDD`
pub fn exam_code_prefix(label: &str, date: NaiveDate) -> String {
    format!("{}-{}", label, date.format("%Y%m%d"))
}

/// Parse the sequence number of `candidate` if it is exactly `prefix-<digits>`
pub fn sequence_suffix(prefix: &str, candidate: &str) -> Option<u32> {
    let digits = candidate.strip_prefix(prefix)?.strip_prefix('-')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Next free sequence number among `existing` children for `prefix`
fn next_sequence<'a>(
    existing: impl IntoIterator<Item = &'a String>,
    parse: impl Fn(&str) -> Option<u32>,
) -> u32 {
    existing
        .into_iter()
        .filter_map(|key| parse(key))
        .max()
        .map_or(1, |max| max.saturating_add(1))
}

pub fn format_exam_code(prefix: &str, sequence: u32) -> ExamCode {
    ExamCode::new(format!(
        "{}-{:0width$}",
        prefix,
        sequence,
        width = EXAM_CODE_SEQUENCE_WIDTH
    ))
}

/// Parse the sequence of an enrollment id `PREFIXYYYYNNNN`
pub fn enrollment_suffix(year_prefix: &str, candidate: &str) -> Option<u32> {
    let digits = candidate.strip_prefix(year_prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Body written when an enrollment id is reserved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub enrollment_id: StudentId,
    pub group: Option<GroupId>,
    pub created_at: DateTime<Utc>,
}

/// Reserves exam codes and enrollment ids in the shared store
#[derive(Clone)]
pub struct CodeGenerator {
    store: Arc<dyn Store>,
    retry_limit: u32,
}

impl CodeGenerator {
    pub fn new(store: Arc<dyn Store>, retry_limit: u32) -> Self {
        Self {
            store,
            retry_limit: retry_limit.max(1),
        }
    }

    /// Reserve a fresh exam code and write the document `build` returns for
    /// it at `examSessions/{code}`.
    ///
    /// Returns the code and the revision of the reserved document.
    pub async fn reserve_exam_code<T, F>(
        &self,
        label: &str,
        date: NaiveDate,
        build: F,
    ) -> Result<(ExamCode, u64)>
    where
        T: Serialize + Send + Sync,
        F: Fn(&ExamCode) -> T + Send + Sync,
    {
        let label = sanitize_label(label);
        if label.is_empty() {
            return Err(InvigilError::validation(
                "exam code label has no letters or digits",
            ));
        }
        let prefix = exam_code_prefix(&label, date);

        for attempt in 1..=self.retry_limit {
            let existing = self.store.list(keys::EXAM_SESSIONS).await?;
            let sequence = next_sequence(&existing, |key| sequence_suffix(&prefix, key));
            let code = format_exam_code(&prefix, sequence);

            let document = build(&code);
            match self
                .store
                .put_json_if(&keys::exam_session(&code), None, &document)
                .await
            {
                Ok(revision) => {
                    info!(code = %code, attempt, "Exam code reserved");
                    return Ok((code, revision));
                }
                Err(e) if e.is_write_conflict() => {
                    debug!(code = %code, attempt, "Exam code taken concurrently, rescanning");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(prefix = %prefix, attempts = self.retry_limit, "Exam code reservation exhausted");
        Err(InvigilError::conflict(format!(
            "could not reserve an exam code for {} after {} attempts",
            prefix, self.retry_limit
        )))
    }

    /// Reserve the next enrollment id for `year` under `students/`
    pub async fn reserve_enrollment_id(
        &self,
        prefix: &str,
        width: usize,
        year: i32,
        group: Option<GroupId>,
        now: DateTime<Utc>,
    ) -> Result<StudentId> {
        let prefix = sanitize_label(prefix);
        if prefix.is_empty() {
            return Err(InvigilError::validation("enrollment prefix is empty"));
        }
        let year_prefix = format!("{}{:04}", prefix, year);

        for attempt in 1..=self.retry_limit {
            let existing = self.store.list(keys::STUDENTS).await?;
            let sequence =
                next_sequence(&existing, |key| enrollment_suffix(&year_prefix, key));
            let id = StudentId::new(format!("{}{:0width$}", year_prefix, sequence, width = width));

            let record = EnrollmentRecord {
                enrollment_id: id.clone(),
                group: group.clone(),
                created_at: now,
            };
            match self
                .store
                .put_json_if(&keys::student(&id), None, &record)
                .await
            {
                Ok(_) => {
                    info!(enrollment_id = %id, attempt, "Enrollment id reserved");
                    return Ok(id);
                }
                Err(e) if e.is_write_conflict() => {
                    debug!(enrollment_id = %id, attempt, "Enrollment id taken concurrently, rescanning");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(InvigilError::conflict(format!(
            "could not reserve an enrollment id for {} after {} attempts",
            year_prefix, self.retry_limit
        )))
    }

    /// Convenience wrapper using the year of `now`
    pub async fn reserve_enrollment_id_now(
        &self,
        prefix: &str,
        width: usize,
        group: Option<GroupId>,
        now: DateTime<Utc>,
    ) -> Result<StudentId> {
        self.reserve_enrollment_id(prefix, width, now.year(), group, now)
            .await
    }
}
