//! ---
//! ied_section: "01-core-functionality"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Shared primitives and utilities for the proxy runtime."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
//! Shared primitives for the IED proxy workspace.
//! This crate exposes configuration loading and logging setup consumed
//! across the workspace.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, ControlConfig, Iec61850Config, LoadedAppConfig, LoggingConfig, MetricsConfig,
    ModelConfig, RpcConfig,
};
pub use logging::{init_tracing, LogFormat};
