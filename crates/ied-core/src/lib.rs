//! ---
//! ied_section: "01-core-functionality"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Runtime lifecycle, point updates, control dispatch and report decoding."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
//! Proxy runtime: owns the live model generation and bridges it to the
//! backend in both directions.

pub mod backend;
pub mod control;
pub mod report;
pub mod runtime;
pub mod state;
pub mod update;

pub use backend::{Backend, RecordingBackend};
pub use control::{
    ControlCommand, ControlDispatcher, ControlOutcome, ControlRoute, ControlStatus, ControlWorker,
    DispatchError,
};
pub use report::{DecodedEntry, DecodedReport, ReportBridge, ReportRoute};
pub use runtime::{AddOutcome, IedRuntime, RuntimeStatus};
pub use state::{Generation, ModelWriteGuard};
pub use update::UpdateOutcome;
