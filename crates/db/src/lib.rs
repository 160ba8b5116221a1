pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{demo_items, seed_demo_items, SeedError};
pub use repositories::{
    InMemoryItemRepository, ItemRepository, RepositoryError, SqlItemRepository,
};
