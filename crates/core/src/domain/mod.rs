pub mod actor;
pub mod item;
