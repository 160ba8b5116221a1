use async_trait::async_trait;
use thiserror::Error;

use tierflow_core::{ApprovalItem, ItemId};

pub mod item;
pub mod memory;

pub use item::SqlItemRepository;
pub use memory::InMemoryItemRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("item `{id}` already exists")]
    DuplicateId { id: String },
    #[error("item `{id}` was updated concurrently (stale version)")]
    VersionConflict { id: String },
    #[error("item `{id}` not found")]
    NotFound { id: String },
}

/// Keyed item store with compare-and-set updates on the item version token.
///
/// `update_versioned` commits only when the stored version still equals
/// `expected_version`; otherwise it fails with `VersionConflict` and the
/// caller retries against fresh state. History rows are append-only: an
/// update writes the new trailing entries and never touches existing ones.
#[async_trait]
pub trait ItemRepository: Send + Sync {
    /// Store a new item. Fails with `DuplicateId` when the id is taken.
    async fn insert(&self, item: ApprovalItem) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &ItemId) -> Result<Option<ApprovalItem>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<ApprovalItem>, RepositoryError>;

    async fn update_versioned(
        &self,
        item: ApprovalItem,
        expected_version: i64,
    ) -> Result<(), RepositoryError>;
}
