//! ---
//! ied_section: "02-information-model"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "IEC 61850 information model: schema, catalog, paths, codec and builder."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
//! Configuration-driven information model for the IED proxy.

pub mod builder;
pub mod cdc;
pub mod error;
pub mod model;
pub mod path;
pub mod schema;
pub mod stack;
pub mod value;

pub use builder::ModelBuilder;
pub use cdc::{Cdc, CreationArgs, OptionKind};
pub use error::{ConfigError, ModelError, Result};
pub use model::{DataSetMember, IedModel, ReportInfo};
pub use path::{join_path, object_path, split_path, PathIndex};
pub use schema::{LogicalDeviceSchema, ModelSchema};
pub use stack::{LoopbackStack, ProtocolStack};
pub use value::{decode, encode, DataType, MmsValue};
