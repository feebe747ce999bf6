//! ---
//! ied_section: "03-persistence-logging"
//! ied_subsection: "tests"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Schema file persistence round trips."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
use std::fs;

use anyhow::Result;
use ied_model::schema::{DataObjectSchema, LogicalDeviceSchema, LogicalNodeSchema};
use ied_model::{DataType, ModelSchema};
use ied_persistence::{JsonFileStore, PersistenceError, SchemaStore};

fn schema() -> ModelSchema {
    let mut schema = ModelSchema::new("proxy");
    schema.logical_devices.push(LogicalDeviceSchema {
        name: "SENSORS".into(),
        logical_nodes: vec![LogicalNodeSchema {
            name: "TTMP1".into(),
            data_objects: vec![DataObjectSchema::new("TmpSv", "SAV")
                .with_attribute("instMag.f", DataType::Float)],
            data_sets: Vec::new(),
        }],
    });
    schema
}

#[test]
fn saved_schema_loads_back() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = JsonFileStore::new(dir.path().join("config").join("points.json"));
    store.save_atomic(&schema())?;
    assert_eq!(store.load()?, schema());

    let raw = fs::read_to_string(store.path())?;
    assert!(raw.contains("\n  \"logical_devices\""), "file is pretty-printed");
    Ok(())
}

#[test]
fn overwrite_replaces_the_whole_file_and_leaves_no_temp_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = JsonFileStore::new(dir.path().join("points.json"));
    store.save_atomic(&schema())?;
    store.save_atomic(&ModelSchema::new("empty"))?;

    assert_eq!(store.load()?.logical_devices.len(), 0);
    let entries: Vec<_> = fs::read_dir(dir.path())?.collect::<std::io::Result<_>>()?;
    assert_eq!(entries.len(), 1);
    Ok(())
}

#[test]
fn missing_and_corrupt_files_are_distinguished() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = JsonFileStore::new(dir.path().join("points.json"));
    assert!(matches!(store.load(), Err(PersistenceError::Missing(_))));

    fs::write(store.path(), "{ not json")?;
    assert!(matches!(store.load(), Err(PersistenceError::Json(_))));
    Ok(())
}
