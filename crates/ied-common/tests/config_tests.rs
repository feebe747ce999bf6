//! ---
//! ied_section: "01-core-functionality"
//! ied_subsection: "tests"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Configuration loading from candidate files."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
use std::fs;

use ied_common::config::AppConfig;
use ied_common::logging::{init_tracing, LogFormat};
use ied_common::LoggingConfig;

#[test]
fn first_existing_candidate_wins() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.toml");
    let present = dir.path().join("iedproxy.toml");
    fs::write(
        &present,
        "[iec61850]\nport = 10102\n\n[rpc]\nlisten = \"127.0.0.1:50051\"\nworkers = 4\n",
    )
    .unwrap();

    let loaded = AppConfig::load_with_source(&[missing, present.clone()]).unwrap();
    assert_eq!(loaded.source, present);
    assert_eq!(loaded.config.iec61850.port, 10102);
    assert_eq!(loaded.config.rpc.workers, 4);
}

#[test]
fn missing_candidates_are_listed_in_the_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nowhere.toml");
    let err = AppConfig::load(&[missing]).unwrap_err();
    assert!(err.to_string().contains("nowhere.toml"));
}

#[test]
fn invalid_files_name_their_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[control]\nqueue_capacity = \"many\"\n").unwrap();
    let err = AppConfig::load(&[path]).unwrap_err();
    assert!(format!("{err:#}").contains("broken.toml"));
}

#[test]
fn tracing_creates_its_log_directory() {
    let dir = tempfile::tempdir().unwrap();
    let config = LoggingConfig {
        directory: dir.path().join("logs"),
        format: LogFormat::Pretty,
        file_prefix: Some("test".into()),
    };
    init_tracing("iedproxyd", &config).unwrap();
    assert!(config.directory.is_dir());
}
