use std::collections::HashMap;

use tokio::sync::RwLock;

use tierflow_core::{ApprovalItem, ItemId};

use super::{ItemRepository, RepositoryError};

/// In-memory store used by tests and the seed command. Enforces the same
/// compare-and-set contract as the SQL repository.
#[derive(Default)]
pub struct InMemoryItemRepository {
    items: RwLock<HashMap<String, ApprovalItem>>,
}

#[async_trait::async_trait]
impl ItemRepository for InMemoryItemRepository {
    async fn insert(&self, item: ApprovalItem) -> Result<(), RepositoryError> {
        let mut items = self.items.write().await;
        if items.contains_key(&item.id.0) {
            return Err(RepositoryError::DuplicateId { id: item.id.0.clone() });
        }
        items.insert(item.id.0.clone(), item);
        Ok(())
    }

    async fn find_by_id(&self, id: &ItemId) -> Result<Option<ApprovalItem>, RepositoryError> {
        let items = self.items.read().await;
        Ok(items.get(&id.0).cloned())
    }

    async fn list_all(&self) -> Result<Vec<ApprovalItem>, RepositoryError> {
        let items = self.items.read().await;
        let mut all: Vec<ApprovalItem> = items.values().cloned().collect();
        all.sort_by(|left, right| {
            left.submitted_at.cmp(&right.submitted_at).then_with(|| left.id.cmp(&right.id))
        });
        Ok(all)
    }

    async fn update_versioned(
        &self,
        item: ApprovalItem,
        expected_version: i64,
    ) -> Result<(), RepositoryError> {
        let mut items = self.items.write().await;
        let Some(stored) = items.get(&item.id.0) else {
            return Err(RepositoryError::NotFound { id: item.id.0.clone() });
        };
        if stored.version != expected_version {
            return Err(RepositoryError::VersionConflict { id: item.id.0.clone() });
        }
        items.insert(item.id.0.clone(), item);
        Ok(())
    }
}
