//! # relay-store
//!
//! SQLite persistence for the relay's record API. The hub itself never
//! touches the database; messages are not persisted.

pub mod database;
pub mod error;
pub mod schema;
pub mod users;

pub use database::Database;
pub use error::StoreError;
pub use users::{NewUser, UserRepo, UserRow};
