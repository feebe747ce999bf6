//! ---
//! ied_section: "15-testing-qa-runbook"
//! ied_subsection: "integration-tests"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "The shipped configuration and schema load and build."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use ied_common::config::AppConfig;
use ied_model::{LoopbackStack, ModelBuilder, ModelSchema};

fn repo_path(path: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join(path)
}

#[test]
fn reference_daemon_config_is_valid() {
    let config = AppConfig::load(&[repo_path("config/iedproxy.toml")]).unwrap();
    assert_eq!(config.iec61850.port, 102);
    assert_eq!(config.rpc.listen.port(), 61850);
    assert_eq!(config.rpc.workers, 10);
    assert_eq!(
        config.control.backend_timeout,
        Some(std::time::Duration::from_secs(5))
    );
    assert_eq!(config.model.schema_path, PathBuf::from("config/points.json"));
}

#[test]
fn reference_schema_builds() {
    let raw = fs::read_to_string(repo_path("config/points.json")).unwrap();
    let schema = ModelSchema::from_json_str(&raw).unwrap();
    let stack = LoopbackStack::new();
    let model = ModelBuilder::new(&stack).build(&schema).unwrap();

    let controllable: Vec<_> = model
        .index()
        .controllable_objects()
        .map(|(path, _)| path)
        .collect();
    assert_eq!(
        controllable,
        vec![
            "ASG90001.GGIO1.AnOut1",
            "ASG90001.GGIO1.SPCSO1",
            "ASG90001.LLN0.Mod"
        ]
    );
    assert!(model.index().resolve("ASG90001.MMXU1.TotW.mag.f").is_ok());
    assert!(model.index().resolve("ASG90001.GGIO1.Ind1.t").is_ok());

    let report = &model.reports()[0];
    assert_eq!(report.reference, "ASG90001/MMXU1.RP.urcb01");
    assert_eq!(report.members.len(), 2);
}
