//! ---
//! ied_section: "02-information-model"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Turns a declarative schema into a live, path-indexed model."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::cdc::{Cdc, REPORT_OPTIONS, TRIGGER_OPTIONS};
use crate::error::{ConfigError, ModelError, Result};
use crate::model::{DataSetMember, IedModel, ReportInfo};
use crate::path::{
    join_path, object_path, rcb_reference, AttributeEntry, ObjectEntry, PathIndex, VariableRef,
};
use crate::schema::{DataSetSchema, LogicalDeviceSchema, LogicalNodeSchema, ModelSchema};
use crate::stack::{DataSetHandle, ModelHandle, NodeHandle, ProtocolStack, ReportControl};

/// Builds models against a protocol stack.
///
/// Any configuration error aborts the whole build and releases every engine
/// resource acquired so far.
pub struct ModelBuilder<'a> {
    stack: &'a dyn ProtocolStack,
}

impl<'a> ModelBuilder<'a> {
    pub fn new(stack: &'a dyn ProtocolStack) -> Self {
        Self { stack }
    }

    pub fn build(&self, schema: &ModelSchema) -> Result<IedModel> {
        ensure_unique(
            "logical device",
            schema.logical_devices.iter().map(|device| device.name.as_str()),
        )?;
        let handle = self.stack.create_model(&schema.name)?;
        let mut model = IedModel::new(&schema.name, handle);
        let mut assembly = Assembly::new(handle);
        let outcome = schema
            .logical_devices
            .iter()
            .try_for_each(|device| assembly.objects(self.stack, device))
            .and_then(|()| assembly.data_sets(self.stack, &PathIndex::new()));
        if let Err(err) = outcome {
            warn!(model = %schema.name, error = %err, "model build failed");
            self.stack.destroy_model(handle);
            return Err(err);
        }
        assembly.finish(&mut model);
        info!(
            model = %model.name(),
            id = %model.id(),
            paths = model.index().len(),
            reports = model.reports().len(),
            "model built"
        );
        Ok(model)
    }

    /// Build `device` into an existing model without touching its other
    /// devices. On failure the partially created device is removed again.
    pub fn add_device(&self, model: &mut IedModel, device: &LogicalDeviceSchema) -> Result<()> {
        if model.contains_device(&device.name) {
            return Err(ConfigError::DuplicateName {
                kind: "logical device",
                name: device.name.clone(),
            }
            .into());
        }
        let mut assembly = Assembly::new(model.handle());
        let outcome = assembly
            .objects(self.stack, device)
            .and_then(|()| assembly.data_sets(self.stack, model.index()));
        if let Err(err) = outcome {
            warn!(device = %device.name, error = %err, "logical device rejected");
            for handle in assembly.devices.values() {
                if let Err(cleanup) = self.stack.remove_logical_device(model.handle(), *handle) {
                    warn!(device = %device.name, error = %cleanup, "rollback of logical device failed");
                }
            }
            return Err(err);
        }
        assembly.finish(model);
        debug!(device = %device.name, paths = model.index().len(), "logical device added");
        Ok(())
    }

    /// Take a device added with [`ModelBuilder::add_device`] out of the model
    /// and the engine again.
    pub fn remove_device(&self, model: &mut IedModel, name: &str) -> Result<()> {
        let handle = model.detach(name).ok_or_else(|| {
            ModelError::PathNotFound(name.to_owned())
        })?;
        self.stack.remove_logical_device(model.handle(), handle)?;
        debug!(device = name, paths = model.index().len(), "logical device removed");
        Ok(())
    }
}

fn ensure_unique<'n>(kind: &'static str, names: impl Iterator<Item = &'n str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ConfigError::DuplicateName {
                kind,
                name: name.to_owned(),
            }
            .into());
        }
    }
    Ok(())
}

/// Logical node whose objects exist and whose data sets are still to come.
struct PendingNode<'s> {
    device: &'s str,
    schema: &'s LogicalNodeSchema,
    handle: NodeHandle,
}

/// Work in progress for one build or one dynamic add.
struct Assembly<'s> {
    model: ModelHandle,
    devices: IndexMap<String, NodeHandle>,
    index: PathIndex,
    pending: Vec<PendingNode<'s>>,
    reports: Vec<ReportInfo>,
}

impl<'s> Assembly<'s> {
    fn new(model: ModelHandle) -> Self {
        Self {
            model,
            devices: IndexMap::new(),
            index: PathIndex::new(),
            pending: Vec::new(),
            reports: Vec::new(),
        }
    }

    /// Create the device, its nodes, objects and declared attributes.
    fn objects(&mut self, stack: &dyn ProtocolStack, device: &'s LogicalDeviceSchema) -> Result<()> {
        let device_handle = stack.create_logical_device(self.model, &device.name)?;
        self.devices.insert(device.name.clone(), device_handle);
        ensure_unique(
            "logical node",
            device.logical_nodes.iter().map(|node| node.name.as_str()),
        )?;
        for node in &device.logical_nodes {
            let node_handle = stack.create_logical_node(device_handle, &node.name)?;
            ensure_unique(
                "data object",
                node.data_objects.iter().map(|object| object.name.as_str()),
            )?;
            for object in &node.data_objects {
                let cdc = Cdc::lookup(&object.cdc)?;
                let args = cdc.creation_args(object)?;
                let handle = stack.create_data_object(node_handle, &object.name, cdc, &args)?;
                let object_path = object_path(&device.name, &node.name, &object.name);
                self.index.insert_object(
                    object_path.clone(),
                    ObjectEntry {
                        handle,
                        cdc,
                        control_type: cdc.control_value_type(args.integer()),
                    },
                );
                for attribute in &object.data_attributes {
                    let found = stack.find_attribute(handle, &attribute.name).ok_or_else(|| {
                        ConfigError::UnknownAttribute {
                            object: object_path.clone(),
                            attribute: attribute.name.clone(),
                        }
                    })?;
                    let path = join_path(&device.name, &node.name, &object.name, &attribute.name);
                    let actual = found.kind.and_then(|kind| kind.data_type());
                    if actual != Some(attribute.data_type) {
                        return Err(ConfigError::TypeMismatch {
                            path,
                            declared: attribute.data_type,
                            actual: match found.kind {
                                Some(kind) => format!("{kind:?}").to_lowercase(),
                                None => "structure".to_owned(),
                            },
                        }
                        .into());
                    }
                    let entry = AttributeEntry {
                        handle: found.handle,
                        data_type: attribute.data_type,
                        fc: found.fc,
                    };
                    if !self.index.insert_attribute(path.clone(), entry) {
                        return Err(ConfigError::DuplicateName {
                            kind: "data attribute",
                            name: path,
                        }
                        .into());
                    }
                }
            }
            self.pending.push(PendingNode {
                device: &device.name,
                schema: node,
                handle: node_handle,
            });
        }
        Ok(())
    }

    /// Create data sets, then the report control blocks bound to them.
    /// Variables resolve against this assembly first, then `base`.
    fn data_sets(&mut self, stack: &dyn ProtocolStack, base: &PathIndex) -> Result<()> {
        for pending in std::mem::take(&mut self.pending) {
            let node = pending.schema;
            ensure_unique(
                "data set",
                node.data_sets.iter().map(|data_set| data_set.name.as_str()),
            )?;
            let mut created: HashMap<&str, (DataSetHandle, Vec<DataSetMember>)> = HashMap::new();
            for data_set in &node.data_sets {
                let handle = stack.create_data_set(pending.handle, &data_set.name)?;
                let members = self.members(stack, base, pending.device, data_set, handle)?;
                created.insert(data_set.name.as_str(), (handle, members));
            }
            let mut report_names = HashSet::new();
            for data_set in &node.data_sets {
                for report in &data_set.reports {
                    if !report_names.insert(report.name.as_str()) {
                        return Err(ConfigError::DuplicateName {
                            kind: "report",
                            name: report.name.clone(),
                        }
                        .into());
                    }
                    let target = report.data_set.as_deref().unwrap_or(&data_set.name);
                    let (data_set_handle, members) =
                        created.get(target).ok_or_else(|| ConfigError::UnknownDataSet {
                            report: report.name.clone(),
                            data_set: target.to_owned(),
                        })?;
                    let reference =
                        rcb_reference(pending.device, &node.name, report.buffered, &report.name);
                    let control = ReportControl {
                        name: report.name.clone(),
                        reference: reference.clone(),
                        report_id: report.report_id.clone().unwrap_or_else(|| reference.clone()),
                        buffered: report.buffered,
                        configuration_revision: report.configuration_revision,
                        trigger_options: TRIGGER_OPTIONS.reduce(&report.trigger_options)?,
                        report_options: REPORT_OPTIONS.reduce(&report.report_options)?,
                        buffer_time: report.buffer_time,
                        integrity_period: report.integrity_period,
                    };
                    stack.create_report_control_block(pending.handle, *data_set_handle, &control)?;
                    self.reports.push(ReportInfo {
                        reference,
                        report_id: control.report_id,
                        data_set: target.to_owned(),
                        members: members.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn members(
        &self,
        stack: &dyn ProtocolStack,
        base: &PathIndex,
        device: &str,
        data_set: &DataSetSchema,
        handle: DataSetHandle,
    ) -> Result<Vec<DataSetMember>> {
        let unknown = |variable: &str| -> ModelError {
            ConfigError::UnknownDataSetEntry {
                data_set: data_set.name.clone(),
                variable: variable.to_owned(),
            }
            .into()
        };
        let mut members = Vec::with_capacity(data_set.entries.len());
        for entry in &data_set.entries {
            let variable = VariableRef::parse(&entry.variable, device)
                .ok_or_else(|| unknown(&entry.variable))?;
            let object_path = variable.object_path();
            let object = self
                .index
                .object(&object_path)
                .or_else(|_| base.object(&object_path))
                .map_err(|_| unknown(&entry.variable))?;
            let found = stack
                .find_attribute(object.handle, &variable.attribute)
                .filter(|found| found.fc == variable.fc)
                .ok_or_else(|| unknown(&entry.variable))?;
            let path = variable.path();
            let declared = self
                .index
                .resolve(&path)
                .or_else(|_| base.resolve(&path))
                .ok()
                .map(|entry| entry.data_type);
            stack.add_data_set_entry(handle, &entry.variable, found.handle)?;
            members.push(DataSetMember {
                variable: entry.variable.clone(),
                path,
                data_type: declared.or_else(|| found.kind.and_then(|kind| kind.data_type())),
            });
        }
        Ok(members)
    }

    fn finish(self, model: &mut IedModel) {
        model.absorb(self.devices, self.index, self.reports);
    }
}
