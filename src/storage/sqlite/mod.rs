//! `SQLite` store.
//!
//! - [`connection`]: lock acquisition with poison recovery, pragmas
//! - [`store`]: [`SqliteWebhookStore`], implementing both store traits

mod connection;
mod store;

pub use connection::{acquire_lock, configure_connection, open_database};
pub use store::SqliteWebhookStore;
