use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use super::PlaybookStore;
use crate::error::{PlaybookError, PlaybookResult};
use crate::models::{MetricId, Playbook, PlaybookId};

/// Process-local store with the same version semantics as the Postgres one.
#[derive(Default)]
pub struct InMemoryPlaybookStore {
    playbooks: RwLock<HashMap<PlaybookId, Playbook>>,
    concurrent_writes: AtomicU32,
    latency_ms: AtomicU64,
    saves: AtomicU64,
}

impl InMemoryPlaybookStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `playbook` as a freshly created record at version 1.
    pub async fn insert(&self, mut playbook: Playbook) -> Playbook {
        playbook.version = 1;
        let mut playbooks = self.playbooks.write().await;
        playbooks.insert(playbook.id.clone(), playbook.clone());
        playbook
    }

    /// Makes the next `count` saves lose a race against another writer: the
    /// stored version is bumped and the save reports a conflict.
    pub fn simulate_concurrent_writes(&self, count: u32) {
        self.concurrent_writes.store(count, Ordering::SeqCst);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of saves that were committed.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn take_concurrent_write(&self) -> bool {
        self.concurrent_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PlaybookStore for InMemoryPlaybookStore {
    async fn load_playbook(&self, id: &PlaybookId) -> PlaybookResult<Option<Playbook>> {
        self.simulate_latency().await;
        let playbooks = self.playbooks.read().await;
        Ok(playbooks.get(id).cloned())
    }

    async fn save_playbook(&self, playbook: &Playbook) -> PlaybookResult<i64> {
        self.simulate_latency().await;
        let mut playbooks = self.playbooks.write().await;
        let stored = playbooks
            .get_mut(&playbook.id)
            .ok_or_else(|| PlaybookError::PlaybookNotFound(playbook.id.to_string()))?;

        if self.take_concurrent_write() {
            stored.version += 1;
            debug!(playbook_id = %playbook.id, "Simulated concurrent write");
        }

        if stored.version != playbook.version {
            return Err(PlaybookError::Conflict {
                playbook_id: playbook.id.to_string(),
            });
        }

        let mut saved = playbook.clone();
        saved.version = stored.version + 1;
        saved.updated_at = Utc::now();
        *stored = saved;
        self.saves.fetch_add(1, Ordering::SeqCst);

        Ok(stored.version)
    }

    async fn list_playbooks(&self) -> PlaybookResult<Vec<Playbook>> {
        self.simulate_latency().await;
        let playbooks = self.playbooks.read().await;
        Ok(playbooks.values().cloned().collect())
    }

    async fn find_playbook_id_by_metric(
        &self,
        metric_id: &MetricId,
    ) -> PlaybookResult<Option<PlaybookId>> {
        self.simulate_latency().await;
        let playbooks = self.playbooks.read().await;
        Ok(playbooks
            .values()
            .find(|p| p.metrics.contains(metric_id))
            .map(|p| p.id.clone()))
    }
}
