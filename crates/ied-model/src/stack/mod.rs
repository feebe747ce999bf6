//! ---
//! ied_section: "02-information-model"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Interface the core requires from the field-protocol engine."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
//! The engine owns wire encoding, sessions and the listen socket. The core only
//! talks to it through [`ProtocolStack`] and opaque handles.
use std::sync::Arc;

use strum::{Display, EnumString};

use crate::cdc::{Cdc, CreationArgs};
use crate::error::Result;
use crate::value::{DataType, MmsValue};

pub mod loopback;
pub mod templates;

pub use loopback::LoopbackStack;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);
    };
}

handle!(
    /// Root of one engine-side model.
    ModelHandle
);
handle!(
    /// Logical device, logical node or data object.
    NodeHandle
);
handle!(
    /// Data attribute, leaf or structured.
    AttributeHandle
);
handle!(DataSetHandle);
handle!(ServerHandle);

/// Functional constraint of a data attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum FunctionalConstraint {
    St,
    Mx,
    Sp,
    Sv,
    Cf,
    Dc,
    Sg,
    Se,
    Sr,
    Or,
    Bl,
    Ex,
    Co,
}

/// Engine-side type of a leaf attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasicType {
    Boolean,
    Int32,
    Int64,
    Uint32,
    Float,
    Timestamp,
    Quality,
    Dbpos,
    Enum,
    VisibleString,
    /// Fixed-length array of INT32 values.
    Int32Array(u16),
}

impl BasicType {
    /// Schema type this leaf can be declared as, if any.
    pub fn data_type(self) -> Option<DataType> {
        match self {
            BasicType::Boolean => Some(DataType::Boolean),
            BasicType::Int32 | BasicType::Enum => Some(DataType::Int32),
            BasicType::Int64 => Some(DataType::Int64),
            BasicType::Uint32 => Some(DataType::Uint32),
            BasicType::Float => Some(DataType::Float),
            BasicType::Timestamp => Some(DataType::Timestamp),
            BasicType::Quality
            | BasicType::Dbpos
            | BasicType::VisibleString
            | BasicType::Int32Array(_) => None,
        }
    }

    pub fn initial_value(self) -> MmsValue {
        match self {
            BasicType::Boolean => MmsValue::Boolean(false),
            BasicType::Int32 | BasicType::Enum => MmsValue::Int32(0),
            BasicType::Int64 => MmsValue::Int64(0),
            BasicType::Uint32 => MmsValue::Uint32(0),
            BasicType::Float => MmsValue::Float(0.0),
            BasicType::Timestamp => MmsValue::UtcTime(0),
            BasicType::Quality => MmsValue::BitString { bits: 0, size: 13 },
            BasicType::Dbpos => MmsValue::BitString { bits: 0, size: 2 },
            BasicType::VisibleString => MmsValue::VisibleString(String::new()),
            BasicType::Int32Array(len) => {
                MmsValue::Array(vec![MmsValue::Int32(0); usize::from(len)])
            }
        }
    }
}

/// Result of resolving a dotted attribute name below a data object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeNode {
    pub handle: AttributeHandle,
    pub fc: FunctionalConstraint,
    /// `None` for structured attributes.
    pub kind: Option<BasicType>,
}

/// Configuration of one report control block as handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportControl {
    pub name: String,
    /// `LD/LN.{BR|RP}.name`
    pub reference: String,
    pub report_id: String,
    pub buffered: bool,
    pub configuration_revision: u32,
    pub trigger_options: u32,
    pub report_options: u32,
    pub buffer_time: u32,
    pub integrity_period: u32,
}

/// Metadata of an operate request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlAction {
    pub ctl_num: u8,
    pub originator: Option<String>,
    pub test: bool,
}

/// Confirmation returned to the field client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlResult {
    Ok,
    Failed,
    Waiting,
}

/// Receives operate requests for one data object.
pub trait ControlHandler: Send + Sync {
    fn handle_control(&self, action: &ControlAction, value: &MmsValue) -> ControlResult;
}

/// Why a data-set member appears in a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ReasonForInclusion {
    NotIncluded,
    DataChange,
    QualityChange,
    DataUpdate,
    Integrity,
    GeneralInterrogation,
    Unknown,
}

impl ReasonForInclusion {
    pub fn from_bits(bits: u8) -> Self {
        match bits {
            0 => ReasonForInclusion::NotIncluded,
            1 => ReasonForInclusion::DataChange,
            2 => ReasonForInclusion::QualityChange,
            4 => ReasonForInclusion::DataUpdate,
            8 => ReasonForInclusion::Integrity,
            16 => ReasonForInclusion::GeneralInterrogation,
            _ => ReasonForInclusion::Unknown,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            ReasonForInclusion::NotIncluded => 0,
            ReasonForInclusion::DataChange => 1,
            ReasonForInclusion::QualityChange => 2,
            ReasonForInclusion::DataUpdate => 4,
            ReasonForInclusion::Integrity => 8,
            ReasonForInclusion::GeneralInterrogation => 16,
            ReasonForInclusion::Unknown => 32,
        }
    }
}

/// One data-set position in a report, in data-set order.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportEntry {
    pub reason: ReasonForInclusion,
    pub value: Option<MmsValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub rcb_reference: String,
    pub report_id: String,
    /// Milliseconds since the Unix epoch, when the block includes time stamps.
    pub timestamp: Option<u64>,
    pub entries: Vec<ReportEntry>,
}

/// Receives reports generated for one control block.
pub trait ReportHandler: Send + Sync {
    fn handle_report(&self, report: &Report);
}

/// Operations the core needs from a field-protocol engine.
///
/// Implementations must tolerate calls from arbitrary threads. Control and
/// report handlers may be invoked from engine-owned threads.
pub trait ProtocolStack: Send + Sync {
    fn create_model(&self, name: &str) -> Result<ModelHandle>;
    fn create_logical_device(&self, model: ModelHandle, name: &str) -> Result<NodeHandle>;
    fn create_logical_node(&self, device: NodeHandle, name: &str) -> Result<NodeHandle>;
    fn create_data_object(
        &self,
        node: NodeHandle,
        name: &str,
        cdc: Cdc,
        args: &CreationArgs,
    ) -> Result<NodeHandle>;
    /// Resolve a dotted attribute name below a data object.
    fn find_attribute(&self, object: NodeHandle, name: &str) -> Option<AttributeNode>;
    fn create_data_set(&self, node: NodeHandle, name: &str) -> Result<DataSetHandle>;
    fn add_data_set_entry(
        &self,
        data_set: DataSetHandle,
        variable: &str,
        target: AttributeHandle,
    ) -> Result<()>;
    fn create_report_control_block(
        &self,
        node: NodeHandle,
        data_set: DataSetHandle,
        control: &ReportControl,
    ) -> Result<()>;
    /// Drop a logical device and everything below it.
    fn remove_logical_device(&self, model: ModelHandle, device: NodeHandle) -> Result<()>;
    fn destroy_model(&self, model: ModelHandle);

    fn create_server(&self, model: ModelHandle) -> Result<ServerHandle>;
    fn set_control_handler(
        &self,
        server: ServerHandle,
        object: NodeHandle,
        handler: Arc<dyn ControlHandler>,
    ) -> Result<()>;
    fn install_report_handler(
        &self,
        server: ServerHandle,
        rcb_reference: &str,
        handler: Arc<dyn ReportHandler>,
    ) -> Result<()>;
    fn start_server(&self, server: ServerHandle, port: u16) -> Result<()>;
    fn is_running(&self, server: ServerHandle) -> bool;
    /// Blocks until the server has fully stopped.
    fn stop_server(&self, server: ServerHandle);
    fn destroy_server(&self, server: ServerHandle);

    fn lock_data_model(&self, server: ServerHandle);
    fn unlock_data_model(&self, server: ServerHandle);
    fn update_attribute(
        &self,
        server: ServerHandle,
        attribute: AttributeHandle,
        value: &MmsValue,
    ) -> Result<()>;
    fn read_attribute(&self, server: ServerHandle, attribute: AttributeHandle) -> Result<MmsValue>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_bits_round_trip() {
        for bits in [0u8, 1, 2, 4, 8, 16] {
            assert_eq!(ReasonForInclusion::from_bits(bits).bits(), bits);
        }
        assert_eq!(ReasonForInclusion::from_bits(3), ReasonForInclusion::Unknown);
        assert_eq!(ReasonForInclusion::DataChange.to_string(), "data_change");
    }

    #[test]
    fn only_plain_leaves_map_to_schema_types() {
        assert_eq!(BasicType::Enum.data_type(), Some(DataType::Int32));
        assert_eq!(BasicType::Quality.data_type(), None);
        assert_eq!(
            BasicType::Int32Array(2).initial_value(),
            MmsValue::Array(vec![MmsValue::Int32(0), MmsValue::Int32(0)])
        );
    }
}
