//! Fault-injecting store for exercising partial-failure paths.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::errors::StoreError;
use crate::model::Row;
use crate::policy::KeyPolicy;
use crate::store::{MemoryStore, MergeOutcome, Store, StoreSession};

#[derive(Debug, Default)]
struct Faults {
    permanent: HashSet<String>,
    transient: HashMap<String, usize>,
    connection_loss: HashSet<String>,
    prepare: Option<String>,
}

/// A [`MemoryStore`] wrapper that fails chosen keys.
///
/// Keys are matched on their display form, e.g. `id=K1` or
/// `product_id=P1,currency=USD`. A connection loss poisons only the session
/// that hit it; other sessions keep working.
#[derive(Debug, Clone, Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    faults: Arc<Mutex<Faults>>,
    refuse: Arc<AtomicBool>,
    merges: Arc<AtomicUsize>,
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl FaultyStore {
    /// Wraps a memory store.
    #[must_use]
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// Rejects every merge of `key` with a permanent error.
    #[must_use]
    pub fn fail_permanently(self, key: &str) -> Self {
        self.faults.lock().permanent.insert(key.to_string());
        self
    }

    /// Fails the first `times` merges of `key` with a transient error.
    #[must_use]
    pub fn fail_transiently(self, key: &str, times: usize) -> Self {
        self.faults.lock().transient.insert(key.to_string(), times);
        self
    }

    /// Breaks the session that tries to merge `key`.
    #[must_use]
    pub fn lose_connection_at(self, key: &str) -> Self {
        self.faults.lock().connection_loss.insert(key.to_string());
        self
    }

    /// Makes `prepare` fail with a permanent error.
    #[must_use]
    pub fn fail_prepare(self, message: &str) -> Self {
        self.faults.lock().prepare = Some(message.to_string());
        self
    }

    /// Makes every `acquire` fail.
    #[must_use]
    pub fn refuse_connections(self) -> Self {
        self.refuse.store(true, Ordering::SeqCst);
        self
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Merge calls received, including failed ones.
    #[must_use]
    pub fn merge_calls(&self) -> usize {
        self.merges.load(Ordering::SeqCst)
    }

    /// Sessions handed out.
    #[must_use]
    pub fn sessions_acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Sessions dropped.
    #[must_use]
    pub fn sessions_released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    fn inject(&self, key: &str) -> Option<StoreError> {
        let mut faults = self.faults.lock();
        if faults.connection_loss.contains(key) {
            return Some(StoreError::connection(format!("connection reset while writing {key}")));
        }
        if faults.permanent.contains(key) {
            return Some(StoreError::permanent(format!("constraint violated for {key}")));
        }
        if let Some(remaining) = faults.transient.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Some(StoreError::transient(format!("database is locked ({key})")));
            }
        }
        None
    }
}

#[async_trait]
impl Store for FaultyStore {
    fn name(&self) -> &str {
        "faulty"
    }

    async fn prepare(&self, _policies: &[KeyPolicy]) -> Result<(), StoreError> {
        let fault = self.faults.lock().prepare.clone();
        fault.map_or(Ok(()), |message| Err(StoreError::permanent(message)))
    }

    async fn acquire(&self) -> Result<Box<dyn StoreSession>, StoreError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(StoreError::connection("connection refused"));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FaultySession {
            store: self.clone(),
            broken: false,
        }))
    }
}

struct FaultySession {
    store: FaultyStore,
    broken: bool,
}

#[async_trait]
impl StoreSession for FaultySession {
    async fn merge(&mut self, policy: &KeyPolicy, row: &Row) -> Result<MergeOutcome, StoreError> {
        self.store.merges.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            return Err(StoreError::connection("session already broken"));
        }
        let key = policy
            .key_of(row)
            .map_err(|e| StoreError::permanent(e.to_string()))?
            .to_string();
        if let Some(err) = self.store.inject(&key) {
            if err.is_connection() {
                self.broken = true;
            }
            return Err(err);
        }
        self.store.inner.merge_row(policy, row)
    }
}

impl Drop for FaultySession {
    fn drop(&mut self) {
        self.store.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Record, TableName};
    use crate::testing::fixtures::building;

    #[tokio::test]
    async fn test_faulty_store_injects_transient_then_recovers() {
        let store = FaultyStore::new(MemoryStore::new()).fail_transiently("id=B1", 1);
        let policy = KeyPolicy::for_table(TableName::Buildings);
        let row = building("B1").to_row();

        let mut session = store.acquire().await.unwrap();
        assert!(session.merge(&policy, &row).await.unwrap_err().is_transient());
        assert_eq!(session.merge(&policy, &row).await.unwrap(), MergeOutcome::Inserted);
        drop(session);

        assert_eq!(store.merge_calls(), 2);
        assert_eq!(store.sessions_acquired(), store.sessions_released());
    }

    #[tokio::test]
    async fn test_connection_loss_poisons_only_its_session() {
        let store = FaultyStore::new(MemoryStore::new()).lose_connection_at("id=B1");
        let policy = KeyPolicy::for_table(TableName::Buildings);

        let mut broken = store.acquire().await.unwrap();
        let mut healthy = store.acquire().await.unwrap();

        assert!(broken
            .merge(&policy, &building("B1").to_row())
            .await
            .unwrap_err()
            .is_connection());
        assert!(broken
            .merge(&policy, &building("B2").to_row())
            .await
            .unwrap_err()
            .is_connection());
        assert_eq!(
            healthy.merge(&policy, &building("B2").to_row()).await.unwrap(),
            MergeOutcome::Inserted
        );
    }

    #[tokio::test]
    async fn test_refused_connections() {
        let store = FaultyStore::new(MemoryStore::new()).refuse_connections();
        assert!(store.acquire().await.is_err());
        assert_eq!(store.sessions_acquired(), 0);
    }
}
