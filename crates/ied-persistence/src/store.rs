//! ---
//! ied_section: "03-persistence-logging"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Persistence abstractions and storage bindings."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use ied_model::ModelSchema;
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::{PersistenceError, Result};

/// Storage for the schema snapshot the proxy builds its model from.
pub trait SchemaStore: Send + Sync {
    /// Read the stored schema.
    fn load(&self) -> Result<ModelSchema>;
    /// Replace the stored schema. Readers observe either the previous or the
    /// new document, never a partial one.
    fn save_atomic(&self, schema: &ModelSchema) -> Result<()>;
}

/// Pretty-printed JSON file, replaced through a sibling temp file and rename.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the schema file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

impl SchemaStore for JsonFileStore {
    fn load(&self) -> Result<ModelSchema> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(PersistenceError::Missing(self.path.clone()))
            }
            Err(err) => return Err(err.into()),
        };
        let schema = serde_json::from_reader(BufReader::new(file))?;
        debug!(path = %self.path.display(), "schema loaded");
        Ok(schema)
    }

    fn save_atomic(&self, schema: &ModelSchema) -> Result<()> {
        let directory = self.directory();
        fs::create_dir_all(directory)?;
        let mut temp = NamedTempFile::new_in(directory)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, schema)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|err| err.error)?;
        debug!(
            path = %self.path.display(),
            devices = schema.logical_devices.len(),
            "schema persisted"
        );
        Ok(())
    }
}

/// Volatile store, used by tests and the `validate` command.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    schema: Mutex<Option<ModelSchema>>,
    saves: Mutex<usize>,
}

impl InMemoryStore {
    /// Store pre-populated with `schema`.
    pub fn with_schema(schema: ModelSchema) -> Self {
        Self {
            schema: Mutex::new(Some(schema)),
            saves: Mutex::new(0),
        }
    }

    /// Number of successful `save_atomic` calls.
    pub fn saves(&self) -> usize {
        *self.saves.lock()
    }

    /// Currently stored schema, if any.
    pub fn snapshot(&self) -> Option<ModelSchema> {
        self.schema.lock().clone()
    }
}

impl SchemaStore for InMemoryStore {
    fn load(&self) -> Result<ModelSchema> {
        self.schema
            .lock()
            .clone()
            .ok_or_else(|| PersistenceError::Missing(PathBuf::from("<memory>")))
    }

    fn save_atomic(&self, schema: &ModelSchema) -> Result<()> {
        *self.schema.lock() = Some(schema.clone());
        *self.saves.lock() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_memory_store_reports_missing() {
        let store = InMemoryStore::default();
        assert!(matches!(store.load(), Err(PersistenceError::Missing(_))));
        store.save_atomic(&ModelSchema::new("proxy")).unwrap();
        assert_eq!(store.load().unwrap().name, "proxy");
        assert_eq!(store.saves(), 1);
    }

    #[test]
    fn bare_file_names_use_the_working_directory() {
        let store = JsonFileStore::new("points.json");
        assert_eq!(store.directory(), Path::new("."));
    }
}
