//! In-memory store implementation
//!
//! Used by tests and the drill harness. Every operation passes through a
//! scheduler yield so concurrent actors interleave the way they would
//! against a remote store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use invigil_util::Clock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;

use crate::traits::child_segment;
use crate::{ChangeNotice, Store, StoreError, StoreResult, Versioned};

const NOTICE_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct Inner {
    next_revision: u64,
    documents: BTreeMap<String, Versioned>,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }
}

/// In-memory key-path store
pub struct MemoryStore {
    inner: Mutex<Inner>,
    notices: broadcast::Sender<ChangeNotice>,
    clock: Option<Arc<dyn Clock>>,

    /// Fail every operation while set
    pub unavailable: AtomicBool,

    /// Fail this many upcoming operations, then recover
    pub fail_next: AtomicU32,

    /// Fail writes to paths ending with this suffix
    failing_writes: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            notices,
            clock: None,
            unavailable: AtomicBool::new(false),
            fail_next: AtomicU32::new(0),
            failing_writes: Mutex::new(None),
        }
    }

    /// Expose `clock` as the store's server time
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn fail_next_operations(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Fail every `set`/`put_if` whose path ends with `suffix`; `None` clears it
    pub fn fail_writes_ending_with(&self, suffix: Option<&str>) {
        if let Ok(mut failing) = self.failing_writes.lock() {
            *failing = suffix.map(str::to_string);
        }
    }

    fn check_write(&self, path: &str) -> StoreResult<()> {
        let rejected = self
            .failing_writes
            .lock()
            .map(|failing| failing.as_deref().is_some_and(|suffix| path.ends_with(suffix)))
            .unwrap_or(false);
        if rejected {
            return Err(StoreError::Unavailable(format!("injected write failure for {}", path)));
        }
        Ok(())
    }

    /// Write a document synchronously, bypassing fault injection.
    ///
    /// Lets tests play a competing writer from inside non-async callbacks.
    pub fn seed(&self, path: &str, value: Value) -> Option<u64> {
        let revision = {
            let mut inner = self.inner.lock().ok()?;
            let revision = inner.bump();
            inner
                .documents
                .insert(path.to_string(), Versioned { revision, value });
            revision
        };
        self.notify(path, Some(revision));
        Some(revision)
    }

    /// Every stored path, sorted
    pub fn paths(&self) -> Vec<String> {
        match self.inner.lock() {
            Ok(inner) => inner.documents.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn enter(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        tokio::task::yield_now().await;

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected failure".into()));
        }

        self.inner
            .lock()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }

    fn notify(&self, path: &str, revision: Option<u64>) {
        // No receivers is fine
        let _ = self.notices.send(ChangeNotice {
            path: path.to_string(),
            revision,
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Versioned>> {
        let inner = self.enter().await?;
        Ok(inner.documents.get(path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> StoreResult<u64> {
        self.check_write(path)?;
        let revision = {
            let mut inner = self.enter().await?;
            let revision = inner.bump();
            inner
                .documents
                .insert(path.to_string(), Versioned { revision, value });
            revision
        };

        debug!(path, revision, "Document written");
        self.notify(path, Some(revision));
        Ok(revision)
    }

    async fn put_if(&self, path: &str, expected: Option<u64>, value: Value) -> StoreResult<u64> {
        self.check_write(path)?;
        let revision = {
            let mut inner = self.enter().await?;
            let actual = inner.documents.get(path).map(|doc| doc.revision);

            match (expected, actual) {
                (None, Some(_)) => return Err(StoreError::AlreadyExists(path.to_string())),
                (None, None) => {}
                (Some(e), Some(a)) if e == a => {}
                (Some(_), _) => {
                    return Err(StoreError::RevisionMismatch {
                        path: path.to_string(),
                        expected,
                        actual,
                    });
                }
            }

            let revision = inner.bump();
            inner
                .documents
                .insert(path.to_string(), Versioned { revision, value });
            revision
        };

        debug!(path, revision, "Document conditionally written");
        self.notify(path, Some(revision));
        Ok(revision)
    }

    async fn remove(&self, path: &str) -> StoreResult<bool> {
        let removed = {
            let mut inner = self.enter().await?;
            inner.documents.remove(path).is_some()
        };

        if removed {
            debug!(path, "Document removed");
            self.notify(path, None);
        }
        Ok(removed)
    }

    async fn list(&self, path: &str) -> StoreResult<Vec<String>> {
        let inner = self.enter().await?;
        let children: BTreeSet<String> = inner
            .documents
            .keys()
            .filter_map(|key| child_segment(path, key))
            .map(str::to_string)
            .collect();
        Ok(children.into_iter().collect())
    }

    async fn server_time(&self) -> StoreResult<Option<DateTime<Utc>>> {
        let _inner = self.enter().await?;
        Ok(self.clock.as_ref().map(|clock| clock.now()))
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ChangeNotice>> {
        Some(self.notices.subscribe())
    }

    fn is_healthy(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst) && self.inner.lock().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_set_remove() {
        let store = MemoryStore::new();
        assert!(store.get("exam/status").await.unwrap().is_none());

        let rev = store.set("exam/status", json!({"is_started": false})).await.unwrap();
        let doc = store.get("exam/status").await.unwrap().unwrap();
        assert_eq!(doc.revision, rev);
        assert_eq!(doc.value["is_started"], false);

        assert!(store.remove("exam/status").await.unwrap());
        assert!(!store.remove("exam/status").await.unwrap());
        assert!(store.get("exam/status").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_if_create_and_swap() {
        let store = MemoryStore::new();

        let rev = store.put_if("examSessions/A", None, json!(1)).await.unwrap();
        let err = store.put_if("examSessions/A", None, json!(2)).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));

        let err = store
            .put_if("examSessions/A", Some(rev + 100), json!(3))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RevisionMismatch { .. }));

        let rev2 = store.put_if("examSessions/A", Some(rev), json!(4)).await.unwrap();
        assert!(rev2 > rev);
        assert_eq!(store.get("examSessions/A").await.unwrap().unwrap().value, json!(4));
    }

    #[tokio::test]
    async fn test_revisions_never_repeat_after_remove() {
        let store = MemoryStore::new();
        let first = store.set("a/b", json!(1)).await.unwrap();
        store.remove("a/b").await.unwrap();
        let second = store.set("a/b", json!(1)).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_list_children() {
        let store = MemoryStore::new();
        store.set("submissions/math/C1/_metadata", json!({})).await.unwrap();
        store.set("submissions/math/C1/S1", json!({})).await.unwrap();
        store.set("submissions/math/C2/S1", json!({})).await.unwrap();
        store.set("submissionsOld/x", json!({})).await.unwrap();

        assert_eq!(store.list("submissions/math").await.unwrap(), vec!["C1", "C2"]);
        assert_eq!(store.list("submissions").await.unwrap(), vec!["math"]);
        assert_eq!(
            store.list("submissions/math/C1").await.unwrap(),
            vec!["S1", "_metadata"]
        );
        assert!(store.list("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = MemoryStore::new();
        store.fail_next_operations(2);

        assert!(matches!(store.get("x").await, Err(StoreError::Unavailable(_))));
        assert!(matches!(store.get("x").await, Err(StoreError::Unavailable(_))));
        assert!(store.get("x").await.unwrap().is_none());

        store.set_unavailable(true);
        assert!(!store.is_healthy());
        assert!(store.set("x", json!(1)).await.is_err());
        store.set_unavailable(false);
        assert!(store.is_healthy());
    }

    #[tokio::test]
    async fn test_failing_writes_by_suffix() {
        let store = MemoryStore::new();
        store.fail_writes_ending_with(Some("/_metadata"));

        assert!(store.set("a/_metadata", json!(1)).await.is_err());
        assert!(store.put_if("a/_metadata", None, json!(1)).await.is_err());
        assert!(store.set("a/b", json!(1)).await.is_ok());

        store.fail_writes_ending_with(None);
        assert!(store.set("a/_metadata", json!(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_change_notices() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe().unwrap();

        let rev = store.set("exam/status", json!({})).await.unwrap();
        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.path, "exam/status");
        assert_eq!(notice.revision, Some(rev));
    }

    #[tokio::test]
    async fn test_server_time_from_clock() {
        use chrono::TimeZone;
        use invigil_util::ManualClock;

        let at = Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap();
        let store = MemoryStore::new().with_clock(Arc::new(ManualClock::new(at)));
        assert_eq!(store.server_time().await.unwrap(), Some(at));
        assert_eq!(MemoryStore::new().server_time().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_typed_helpers_and_audit() {
        use crate::{AuditEvent, AuditEventType};
        use invigil_util::ExamCode;

        let store = MemoryStore::new();
        store.set_json("examSessions/A", &vec![1, 2, 3]).await.unwrap();
        let doc = store.get_json::<Vec<u32>>("examSessions/A").await.unwrap().unwrap();
        assert_eq!(doc.value, vec![1, 2, 3]);

        for code in ["A-20261017-001", "A-20261017-002"] {
            let event = AuditEvent::new(
                invigil_util::now(),
                AuditEventType::SessionDeleted {
                    code: ExamCode::new(code),
                },
            );
            store.append_audit(&event).await.unwrap();
        }

        let recent = store.recent_audits(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].timestamp >= recent[1].timestamp);
    }
}
