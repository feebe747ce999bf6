//! ---
//! ied_section: "02-information-model"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Live model generation bound to engine handles."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
use indexmap::IndexMap;
use uuid::Uuid;

use crate::path::PathIndex;
use crate::stack::{ModelHandle, NodeHandle};
use crate::value::DataType;

/// One resolved member of a data set, in data-set order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSetMember {
    pub variable: String,
    /// Canonical path of the referenced attribute.
    pub path: String,
    /// Declared type, or the engine leaf type when the attribute was not
    /// declared. `None` for structured members.
    pub data_type: Option<DataType>,
}

/// A report control block and the data set it publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportInfo {
    pub reference: String,
    pub report_id: String,
    pub data_set: String,
    pub members: Vec<DataSetMember>,
}

/// In-memory, path-indexed model built from one schema snapshot.
///
/// Each instance carries a fresh identity; rebuilding from the same schema
/// yields the same paths under a different id.
#[derive(Debug)]
pub struct IedModel {
    id: Uuid,
    name: String,
    handle: ModelHandle,
    devices: IndexMap<String, NodeHandle>,
    index: PathIndex,
    reports: Vec<ReportInfo>,
}

impl IedModel {
    pub(crate) fn new(name: &str, handle: ModelHandle) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            handle,
            devices: IndexMap::new(),
            index: PathIndex::new(),
            reports: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> ModelHandle {
        self.handle
    }

    pub fn index(&self) -> &PathIndex {
        &self.index
    }

    pub fn reports(&self) -> &[ReportInfo] {
        &self.reports
    }

    pub fn device_names(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn contains_device(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    pub(crate) fn absorb(
        &mut self,
        devices: IndexMap<String, NodeHandle>,
        index: PathIndex,
        reports: Vec<ReportInfo>,
    ) {
        self.devices.extend(devices);
        self.index.merge(index);
        self.reports.extend(reports);
    }

    /// Forget `name` and everything indexed under it. Returns the engine
    /// handle of the device, if it was part of this model.
    pub(crate) fn detach(&mut self, name: &str) -> Option<NodeHandle> {
        let handle = self.devices.shift_remove(name)?;
        self.index.remove_device(name);
        let rcb_prefix = format!("{name}/");
        self.reports
            .retain(|info| !info.reference.starts_with(&rcb_prefix));
        Some(handle)
    }
}
