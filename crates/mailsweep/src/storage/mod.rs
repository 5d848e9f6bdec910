//! Storage traits and implementations
//!
//! The trait-based design allows swapping between in-memory and sqlite
//! storage implementations; tests use the in-memory store.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryMailStore;
pub use sqlite::SqliteMailStore;
pub use traits::MailStore;
