//! Storage layer.
//!
//! The engine depends on two narrow collaborator traits:
//! - [`EndpointStore`]: endpoint configuration and delivery counters
//! - [`AttemptStore`]: the per-try delivery attempt log
//!
//! [`SqliteWebhookStore`] implements both on a single `SQLite` database.

pub mod sqlite;
pub mod traits;

use std::path::{Path, PathBuf};

pub use sqlite::SqliteWebhookStore;
pub use traits::{AttemptStats, AttemptStore, EndpointStore};

/// File name of the webhook database inside the data directory.
pub const DATABASE_FILE: &str = "webhooks.db";

/// Returns the database path for a data directory.
#[must_use]
pub fn database_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DATABASE_FILE)
}

/// Returns the platform data directory for the engine.
///
/// Falls back to `.webhook-engine` in the current directory when no home
/// directory can be determined.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "webhook-engine").map_or_else(
        || PathBuf::from(".webhook-engine"),
        |dirs| dirs.data_local_dir().to_path_buf(),
    )
}
