//! Store trait definitions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::{AuditEvent, StoreResult};

/// A stored document together with the revision it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T = Value> {
    pub revision: u64,
    pub value: T,
}

/// Emitted after every successful write or removal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub path: String,
    /// New revision, or `None` when the document was removed
    pub revision: Option<u64>,
}

/// Main store trait
///
/// Paths are `/`-separated. Documents live at leaf paths; listing a path
/// returns the distinct next segments of every document beneath it.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a document
    async fn get(&self, path: &str) -> StoreResult<Option<Versioned>>;

    /// Unconditionally write a document, returning its new revision
    async fn set(&self, path: &str, value: Value) -> StoreResult<u64>;

    /// Write only if the current revision matches `expected`.
    ///
    /// `None` means the document must not exist yet (create-if-absent) and
    /// fails with `AlreadyExists`; otherwise a mismatch fails with
    /// `RevisionMismatch`.
    async fn put_if(&self, path: &str, expected: Option<u64>, value: Value) -> StoreResult<u64>;

    /// Remove a document. Returns whether anything was removed.
    async fn remove(&self, path: &str) -> StoreResult<bool>;

    /// Child keys directly below `path`, sorted
    async fn list(&self, path: &str) -> StoreResult<Vec<String>>;

    /// The store's own clock, when it exposes one
    async fn server_time(&self) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(None)
    }

    /// Change notifications, when the backend supports push
    fn subscribe(&self) -> Option<broadcast::Receiver<ChangeNotice>> {
        None
    }

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}

/// Typed JSON helpers available on every store
#[async_trait]
pub trait StoreExt: Store {
    async fn get_json<T>(&self, path: &str) -> StoreResult<Option<Versioned<T>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        match self.get(path).await? {
            Some(doc) => Ok(Some(Versioned {
                revision: doc.revision,
                value: serde_json::from_value(doc.value)?,
            })),
            None => Ok(None),
        }
    }

    async fn set_json<T>(&self, path: &str, value: &T) -> StoreResult<u64>
    where
        T: Serialize + Sync + ?Sized,
    {
        let value = serde_json::to_value(value)?;
        self.set(path, value).await
    }

    async fn put_json_if<T>(&self, path: &str, expected: Option<u64>, value: &T) -> StoreResult<u64>
    where
        T: Serialize + Sync + ?Sized,
    {
        let value = serde_json::to_value(value)?;
        self.put_if(path, expected, value).await
    }

    /// Append an audit event under `audit/`
    async fn append_audit(&self, event: &AuditEvent) -> StoreResult<()> {
        let path = crate::audit::audit_path(event);
        let value = serde_json::to_value(event)?;
        self.put_if(&path, None, value).await?;
        tracing::debug!(path = %path, "Audit event appended");
        Ok(())
    }

    /// Most recent audit events, newest first
    async fn recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let mut keys = self.list(crate::audit::AUDIT_ROOT).await?;
        keys.reverse();

        let mut events = Vec::new();
        for key in keys.into_iter().take(limit) {
            let path = format!("{}/{}", crate::audit::AUDIT_ROOT, key);
            if let Some(doc) = self.get_json::<AuditEvent>(&path).await? {
                events.push(doc.value);
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl<S: Store + ?Sized> StoreExt for S {}

/// Split `path` into the segment directly below `parent`, if it is beneath it
pub(crate) fn child_segment<'a>(parent: &str, path: &'a str) -> Option<&'a str> {
    let rest = path.strip_prefix(parent)?.strip_prefix('/')?;
    let segment = rest.split('/').next()?;
    (!segment.is_empty()).then_some(segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_segment_extraction() {
        assert_eq!(child_segment("examSessions", "examSessions/A-1"), Some("A-1"));
        assert_eq!(
            child_segment("submissions/math", "submissions/math/CODE/STU1"),
            Some("CODE")
        );
        assert_eq!(child_segment("exam", "examSessions/A-1"), None);
        assert_eq!(child_segment("exam", "exam"), None);
        assert_eq!(child_segment("exam", "exam/"), None);
    }
}
