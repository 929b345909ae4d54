//! Typed access to the documents the core reads and writes

use invigil_api::{keys, ActiveLease, ExamSession, GlobalBroadcast};
use invigil_store::{Store, StoreExt, Versioned};
use invigil_util::{ExamCode, InvigilError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Attempts made by an optimistic read-modify-write before giving up
pub(crate) const UPDATE_ATTEMPTS: u32 = 8;

/// A singleton document that may not have been written yet
#[derive(Debug, Clone)]
pub(crate) struct Singleton<T> {
    /// `None` while the document does not exist
    pub revision: Option<u64>,
    pub value: T,
}

#[derive(Clone)]
pub(crate) struct Records {
    store: Arc<dyn Store>,
}

impl Records {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn try_session(&self, code: &ExamCode) -> Result<Option<Versioned<ExamSession>>> {
        Ok(self.store.get_json(&keys::exam_session(code)).await?)
    }

    pub async fn session(&self, code: &ExamCode) -> Result<Versioned<ExamSession>> {
        self.try_session(code)
            .await?
            .ok_or_else(|| InvigilError::not_found(format!("exam session {}", code)))
    }

    pub async fn broadcast(&self) -> Result<Singleton<GlobalBroadcast>> {
        self.singleton(keys::EXAM_STATUS).await
    }

    pub async fn lease(&self) -> Result<Singleton<ActiveLease>> {
        self.singleton(keys::EXAM_LEASE).await
    }

    async fn singleton<T>(&self, path: &str) -> Result<Singleton<T>>
    where
        T: DeserializeOwned + Default + Send + 'static,
    {
        Ok(match self.store.get_json::<T>(path).await? {
            Some(doc) => Singleton {
                revision: Some(doc.revision),
                value: doc.value,
            },
            None => Singleton {
                revision: None,
                value: T::default(),
            },
        })
    }

    /// Optimistic read-modify-write of an existing document.
    ///
    /// `mutate` returns whether it changed anything; an unchanged document is
    /// not written. Lost races re-read and re-apply.
    pub async fn update<T, F>(&self, path: &str, mut mutate: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnMut(&mut T) -> Result<bool> + Send,
    {
        for attempt in 1..=UPDATE_ATTEMPTS {
            let Some(doc) = self.store.get_json::<T>(path).await? else {
                return Err(InvigilError::not_found(path.to_string()));
            };

            let mut value = doc.value;
            if !mutate(&mut value)? {
                return Ok(value);
            }

            match self.store.put_json_if(path, Some(doc.revision), &value).await {
                Ok(_) => return Ok(value),
                Err(e) if e.is_write_conflict() => {
                    debug!(path = %path, attempt, "Concurrent update, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(InvigilError::conflict(format!(
            "{} kept changing after {} attempts",
            path, UPDATE_ATTEMPTS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invigil_store::MemoryStore;

    #[tokio::test]
    async fn missing_singletons_read_as_default() {
        let records = Records::new(Arc::new(MemoryStore::new()));

        let broadcast = records.broadcast().await.unwrap();
        assert!(broadcast.revision.is_none());
        assert!(!broadcast.value.is_started);

        let lease = records.lease().await.unwrap();
        assert!(lease.value.holder.is_none());
    }

    #[tokio::test]
    async fn update_applies_and_skips_unchanged() {
        let store = Arc::new(MemoryStore::new());
        store.set("counters/a", serde_json::json!(1)).await.unwrap();
        let records = Records::new(store.clone());

        let value: u32 = records
            .update("counters/a", |n: &mut u32| {
                *n += 1;
                Ok(true)
            })
            .await
            .unwrap();
        assert_eq!(value, 2);

        let before = store.get("counters/a").await.unwrap().unwrap().revision;
        let _: u32 = records.update("counters/a", |_: &mut u32| Ok(false)).await.unwrap();
        let after = store.get("counters/a").await.unwrap().unwrap().revision;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn update_of_missing_document_is_not_found() {
        let records = Records::new(Arc::new(MemoryStore::new()));
        let err = records
            .update("nothing/here", |_: &mut u32| Ok(true))
            .await
            .unwrap_err();
        assert!(matches!(err, InvigilError::NotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_updates_do_not_lose_increments() {
        let store = Arc::new(MemoryStore::new());
        store.set("counters/b", serde_json::json!(0)).await.unwrap();
        let records = Records::new(store.clone());

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let records = records.clone();
            tasks.push(tokio::spawn(async move {
                records
                    .update("counters/b", |n: &mut u32| {
                        *n += 1;
                        Ok(true)
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let doc = store.get_json::<u32>("counters/b").await.unwrap().unwrap();
        assert_eq!(doc.value, 4);
    }
}
