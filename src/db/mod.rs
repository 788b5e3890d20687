//! Database module for the PostgreSQL catalog store.

mod catalog;
mod pool;
mod schema;

pub use catalog::PgCatalogStore;
pub use pool::DatabasePool;
pub use schema::*;
