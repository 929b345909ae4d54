//! Store key paths
//!
//! Admin and student processes agree on nothing but these paths and the
//! JSON documents stored under them.

use invigil_util::{ExamCode, StudentId, TrackRef};

/// The global broadcast record every student polls
pub const EXAM_STATUS: &str = "exam/status";

/// Lease record guarding the single-active invariant
pub const EXAM_LEASE: &str = "exam/lease";

/// Collection of exam session documents, keyed by code
pub const EXAM_SESSIONS: &str = "examSessions";

/// Root of the hierarchical submission tree
pub const SUBMISSIONS: &str = "submissions";

/// Key of the metadata document created alongside each session
pub const METADATA_KEY: &str = "_metadata";

/// Enrolled student records, keyed by enrollment ID
pub const STUDENTS: &str = "students";

/// Join path segments with `/`
pub fn join(parent: &str, child: &str) -> String {
    format!("{}/{}", parent, child)
}

pub fn exam_session(code: &ExamCode) -> String {
    join(EXAM_SESSIONS, code.as_str())
}

/// `submissions/{trackRef}/{code}`
pub fn session_submissions(track: &TrackRef, code: &ExamCode) -> String {
    format!("{}/{}/{}", SUBMISSIONS, track.as_str(), code.as_str())
}

pub fn submission(track: &TrackRef, code: &ExamCode, student: &StudentId) -> String {
    join(&session_submissions(track, code), student.as_str())
}

pub fn submission_metadata(track: &TrackRef, code: &ExamCode) -> String {
    join(&session_submissions(track, code), METADATA_KEY)
}

pub fn student(id: &StudentId) -> String {
    join(STUDENTS, id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_paths_nest_under_session() {
        let track = TrackRef::new("physics");
        let code = ExamCode::new("PHYSICS-20261017-001");
        let student = StudentId::new("STU20260001");

        assert_eq!(
            submission(&track, &code, &student),
            "submissions/physics/PHYSICS-20261017-001/STU20260001"
        );
        assert_eq!(
            submission_metadata(&track, &code),
            "submissions/physics/PHYSICS-20261017-001/_metadata"
        );
    }
}
