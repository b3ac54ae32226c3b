mod memory;
mod playbook_repo;

pub use memory::InMemoryPlaybookStore;
pub use playbook_repo::PgPlaybookRepository;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::PlaybookResult;
use crate::models::{MetricId, Playbook, PlaybookId};

/// Persistence for playbooks and their metrics.
///
/// Implementations own same-playbook serialization: [`save_playbook`] must
/// only succeed when the stored version still equals `playbook.version`, and
/// must report [`PlaybookError::Conflict`] otherwise.
///
/// [`save_playbook`]: PlaybookStore::save_playbook
/// [`PlaybookError::Conflict`]: crate::error::PlaybookError::Conflict
#[async_trait]
pub trait PlaybookStore: Send + Sync {
    async fn load_playbook(&self, id: &PlaybookId) -> PlaybookResult<Option<Playbook>>;

    /// Writes the whole playbook, metrics included, and returns the new version.
    async fn save_playbook(&self, playbook: &Playbook) -> PlaybookResult<i64>;

    async fn list_playbooks(&self) -> PlaybookResult<Vec<Playbook>>;

    async fn find_playbook_id_by_metric(
        &self,
        metric_id: &MetricId,
    ) -> PlaybookResult<Option<PlaybookId>>;
}

pub type DynPlaybookStore = Arc<dyn PlaybookStore>;
