//! ---
//! ied_section: "05-networking-external-interfaces"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "gRPC surfaces of the proxy."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Inbound `AncillaryInputs` service and outbound `AncillaryOutputs` client.

pub mod backend;
pub mod grpc;

pub use backend::GrpcBackend;
pub use grpc::{proto, GrpcServerBuilder, GrpcServerHandle};
