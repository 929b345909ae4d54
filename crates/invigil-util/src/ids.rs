//! Strongly-typed identifiers for invigil

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Human-readable exam session code, e.g. `MATH-20261017-001`
    ExamCode
);

string_id!(
    /// Reference to a content track
    TrackRef
);

string_id!(
    /// Batch/group permitted to sit an exam
    GroupId
);

string_id!(
    /// Student identifier (enrollment id)
    StudentId
);

/// Identifier of one student endpoint process, used for log correlation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exam_code_equality() {
        let a = ExamCode::new("MATH-20261017-001");
        let b = ExamCode::from("MATH-20261017-001");
        let c = ExamCode::new("MATH-20261017-002");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a < c);
    }

    #[test]
    fn client_id_uniqueness() {
        assert_ne!(ClientId::new(), ClientId::new());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let code = ExamCode::new("CMB-20260101-007");
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, "\"CMB-20260101-007\"");

        let parsed: ExamCode = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, code);
    }
}
