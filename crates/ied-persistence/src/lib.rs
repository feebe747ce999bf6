//! ---
//! ied_section: "03-persistence-logging"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Persistence abstractions and storage bindings."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Durable storage for the model schema, the proxy's system of record.

use std::path::PathBuf;

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Wrapper for IO errors encountered while reading/writing the schema file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Reported when no schema has been stored yet.
    #[error("no schema stored at {0}")]
    Missing(PathBuf),
}

/// Schema store trait and its file and memory implementations.
pub mod store;

pub use store::{InMemoryStore, JsonFileStore, SchemaStore};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_error_names_the_location() {
        let err = PersistenceError::Missing(PathBuf::from("config/points.json"));
        assert_eq!(format!("{err}"), "no schema stored at config/points.json");
    }
}
