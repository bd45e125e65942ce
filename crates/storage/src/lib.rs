pub mod db;
pub mod store;

pub use db::{create_db, create_in_memory, seed_default_categories, DbPool};
pub use store::SqliteStore;
