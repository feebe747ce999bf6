//! ---
//! ied_section: "02-information-model"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "In-process protocol engine used when no hardware engine is linked."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
//! `LoopbackStack` keeps the whole engine-side model in memory. It generates
//! reports from value updates and can simulate field-client control operations,
//! which makes it the engine behind every test in the workspace.
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cdc::{report as report_option, trigger, Cdc, CreationArgs};
use crate::error::{ModelError, Result};
use crate::path::split_path;
use crate::stack::templates;
use crate::stack::{
    AttributeHandle, AttributeNode, BasicType, ControlAction, ControlHandler, ControlResult,
    DataSetHandle, FunctionalConstraint, ModelHandle, NodeHandle, ProtocolStack,
    ReasonForInclusion, Report, ReportControl, ReportEntry, ReportHandler, ServerHandle,
};
use crate::value::MmsValue;

enum NodeKind {
    Model,
    Device,
    LogicalNode,
    Object,
    Structure(FunctionalConstraint),
    Leaf {
        fc: FunctionalConstraint,
        kind: BasicType,
        value: MmsValue,
    },
}

struct Node {
    name: String,
    parent: Option<u64>,
    children: Vec<u64>,
    kind: NodeKind,
}

struct DataSetState {
    node: u64,
    members: Vec<u64>,
}

struct RcbState {
    node: u64,
    data_set: u64,
    control: ReportControl,
}

#[derive(Default)]
struct ServerState {
    model: u64,
    running: bool,
    port: u16,
    lock_depth: u32,
    pending: Vec<Delivery>,
    control_handlers: HashMap<u64, Arc<dyn ControlHandler>>,
    report_handlers: HashMap<String, Arc<dyn ReportHandler>>,
}

type Delivery = (Arc<dyn ReportHandler>, Report);

#[derive(Default)]
struct State {
    nodes: HashMap<u64, Node>,
    data_sets: HashMap<u64, DataSetState>,
    rcbs: HashMap<String, RcbState>,
    servers: HashMap<u64, ServerState>,
}

impl State {
    fn node(&self, id: u64) -> Result<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| ModelError::Stack(format!("unknown handle {id}")))
    }

    fn root_of(&self, mut id: u64) -> u64 {
        while let Some(parent) = self.nodes.get(&id).and_then(|node| node.parent) {
            id = parent;
        }
        id
    }

    fn child(&self, parent: u64, name: &str) -> Option<u64> {
        self.nodes.get(&parent)?.children.iter().copied().find(|child| {
            self.nodes
                .get(child)
                .is_some_and(|node| node.name == name)
        })
    }

    fn descend<'a>(&self, from: u64, segments: impl IntoIterator<Item = &'a str>) -> Option<u64> {
        segments
            .into_iter()
            .try_fold(from, |current, segment| self.child(current, segment))
    }

    fn insert(&mut self, id: u64, parent: Option<u64>, name: &str, kind: NodeKind) {
        if let Some(parent) = parent.and_then(|parent| self.nodes.get_mut(&parent)) {
            parent.children.push(id);
        }
        self.nodes.insert(
            id,
            Node {
                name: name.to_owned(),
                parent,
                children: Vec::new(),
                kind,
            },
        );
    }

    fn subtree(&self, id: u64) -> HashSet<u64> {
        let mut found = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if found.insert(current) {
                if let Some(node) = self.nodes.get(&current) {
                    stack.extend(node.children.iter().copied());
                }
            }
        }
        found
    }

    /// Drop every node in the subtree rooted at `id` together with the data
    /// sets, control blocks and handlers that hang off it.
    fn remove_subtree(&mut self, id: u64) {
        let removed = self.subtree(id);
        if let Some(parent) = self.nodes.get(&id).and_then(|node| node.parent) {
            if let Some(parent) = self.nodes.get_mut(&parent) {
                parent.children.retain(|child| *child != id);
            }
        }
        self.nodes.retain(|id, _| !removed.contains(id));
        self.data_sets
            .retain(|_, data_set| !removed.contains(&data_set.node));
        let data_sets = &self.data_sets;
        let mut dropped_rcbs = Vec::new();
        self.rcbs.retain(|reference, rcb| {
            let keep = !removed.contains(&rcb.node) && data_sets.contains_key(&rcb.data_set);
            if !keep {
                dropped_rcbs.push(reference.clone());
            }
            keep
        });
        for server in self.servers.values_mut() {
            server
                .control_handlers
                .retain(|object, _| !removed.contains(object));
            for reference in &dropped_rcbs {
                server.report_handlers.remove(reference);
            }
        }
    }

    fn value_of(&self, id: u64) -> Result<MmsValue> {
        let node = self.node(id)?;
        match &node.kind {
            NodeKind::Leaf { value, .. } => Ok(value.clone()),
            NodeKind::Structure(_) | NodeKind::Object => node
                .children
                .iter()
                .map(|child| self.value_of(*child))
                .collect::<Result<Vec<_>>>()
                .map(MmsValue::Structure),
            _ => Err(ModelError::Stack(format!(
                "'{}' is not a data attribute",
                node.name
            ))),
        }
    }

    fn server(&self, server: ServerHandle) -> Result<&ServerState> {
        self.servers
            .get(&server.0)
            .ok_or_else(|| ModelError::Stack(format!("unknown server {}", server.0)))
    }

    fn server_mut(&mut self, server: ServerHandle) -> Result<&mut ServerState> {
        self.servers
            .get_mut(&server.0)
            .ok_or_else(|| ModelError::Stack(format!("unknown server {}", server.0)))
    }

    fn running_server(&self) -> Option<(u64, &ServerState)> {
        self.servers
            .iter()
            .find(|(_, server)| server.running)
            .map(|(id, server)| (*id, server))
    }

    fn resolve_object(&self, model: u64, object_path: &str) -> Option<u64> {
        self.descend(model, object_path.split('.'))
    }

    fn resolve_attribute(&self, model: u64, path: &str) -> Option<u64> {
        let (device, node, object, attribute) = split_path(path)?;
        self.descend(
            model,
            [device, node, object].into_iter().chain(attribute.split('.')),
        )
    }

    /// Build a report for `rcb` listing `reasons` per data-set position.
    fn report(&self, rcb: &RcbState, reasons: &[ReasonForInclusion]) -> Result<Report> {
        let members = self
            .data_sets
            .get(&rcb.data_set)
            .map(|data_set| data_set.members.as_slice())
            .unwrap_or_default();
        let entries = members
            .iter()
            .zip(reasons)
            .map(|(member, reason)| {
                let value = match reason {
                    ReasonForInclusion::NotIncluded => None,
                    _ => Some(self.value_of(*member)?),
                };
                Ok(ReportEntry {
                    reason: *reason,
                    value,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let timestamp = if rcb.control.report_options & report_option::TIME_STAMP != 0 {
            u64::try_from(Utc::now().timestamp_millis()).ok()
        } else {
            None
        };
        Ok(Report {
            rcb_reference: rcb.control.reference.clone(),
            report_id: rcb.control.report_id.clone(),
            timestamp,
            entries,
        })
    }
}

/// In-memory engine with simulated report generation and control operations.
pub struct LoopbackStack {
    state: Mutex<State>,
    next_handle: AtomicU64,
    fail_next_start: AtomicBool,
    fail_next_handler: AtomicBool,
    lock_balance: AtomicI64,
    ctl_num: AtomicU8,
}

impl Default for LoopbackStack {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackStack {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_handle: AtomicU64::new(1),
            fail_next_start: AtomicBool::new(false),
            fail_next_handler: AtomicBool::new(false),
            lock_balance: AtomicI64::new(0),
            ctl_num: AtomicU8::new(0),
        }
    }

    fn allocate(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    /// Make the next `start_server` call fail as if the port could not be bound.
    pub fn fail_next_start(&self) {
        self.fail_next_start.store(true, Ordering::SeqCst);
    }

    /// Make the next control or report handler installation fail.
    pub fn fail_next_handler(&self) {
        self.fail_next_handler.store(true, Ordering::SeqCst);
    }

    fn refuse_handler(&self, target: &str) -> Result<()> {
        if self.fail_next_handler.swap(false, Ordering::SeqCst) {
            return Err(ModelError::Stack(format!("handler for {target} refused")));
        }
        Ok(())
    }

    /// Outstanding `lock_data_model` calls without a matching unlock.
    pub fn lock_balance(&self) -> i64 {
        self.lock_balance.load(Ordering::SeqCst)
    }

    pub fn running_servers(&self) -> usize {
        self.state
            .lock()
            .servers
            .values()
            .filter(|server| server.running)
            .count()
    }

    pub fn live_models(&self) -> usize {
        self.state
            .lock()
            .nodes
            .values()
            .filter(|node| matches!(node.kind, NodeKind::Model))
            .count()
    }

    /// Whether the running server offers control on `object_path`.
    pub fn has_control_handler(&self, object_path: &str) -> bool {
        let state = self.state.lock();
        let Some((_, server)) = state.running_server() else {
            return false;
        };
        state
            .resolve_object(server.model, object_path)
            .is_some_and(|object| server.control_handlers.contains_key(&object))
    }

    /// Current value of a canonical attribute path on the running server.
    pub fn read_path(&self, path: &str) -> Option<MmsValue> {
        let state = self.state.lock();
        let (_, server) = state.running_server()?;
        let id = state.resolve_attribute(server.model, path)?;
        state.value_of(id).ok()
    }

    /// Simulate a field client operating `object_path` on the running server.
    pub fn operate(&self, object_path: &str, value: MmsValue, test: bool) -> Result<ControlResult> {
        let handler = {
            let state = self.state.lock();
            let (_, server) = state
                .running_server()
                .ok_or_else(|| ModelError::Stack("no running server".into()))?;
            let object = state
                .resolve_object(server.model, object_path)
                .ok_or_else(|| ModelError::PathNotFound(object_path.to_owned()))?;
            server
                .control_handlers
                .get(&object)
                .cloned()
                .ok_or_else(|| {
                    ModelError::Stack(format!("{object_path} does not accept control"))
                })?
        };
        let action = ControlAction {
            ctl_num: self.ctl_num.fetch_add(1, Ordering::Relaxed),
            originator: Some("loopback".to_owned()),
            test,
        };
        Ok(handler.handle_control(&action, &value))
    }

    /// Emit a general-interrogation report for `rcb_reference`.
    pub fn general_interrogation(&self, rcb_reference: &str) -> Result<()> {
        let delivery = {
            let mut state = self.state.lock();
            let (server_id, server) = state
                .running_server()
                .ok_or_else(|| ModelError::Stack("no running server".into()))?;
            let handler = server
                .report_handlers
                .get(rcb_reference)
                .cloned()
                .ok_or_else(|| {
                    ModelError::Stack(format!("no report handler on {rcb_reference}"))
                })?;
            let rcb = state
                .rcbs
                .get(rcb_reference)
                .ok_or_else(|| ModelError::PathNotFound(rcb_reference.to_owned()))?;
            let members = state
                .data_sets
                .get(&rcb.data_set)
                .map_or(0, |data_set| data_set.members.len());
            let reasons = vec![ReasonForInclusion::GeneralInterrogation; members];
            let report = state.report(rcb, &reasons)?;
            let server = state.server_mut(ServerHandle(server_id))?;
            if server.lock_depth > 0 {
                server.pending.push((handler, report));
                None
            } else {
                Some((handler, report))
            }
        };
        if let Some((handler, report)) = delivery {
            handler.handle_report(&report);
        }
        Ok(())
    }

    fn deliver(deliveries: Vec<Delivery>) {
        for (handler, report) in deliveries {
            handler.handle_report(&report);
        }
    }
}

fn trigger_reason(
    trigger_options: u32,
    kind: BasicType,
    changed: bool,
) -> Option<ReasonForInclusion> {
    if changed && kind == BasicType::Quality {
        return (trigger_options & trigger::QUALITY_CHANGED != 0)
            .then_some(ReasonForInclusion::QualityChange);
    }
    if changed && trigger_options & trigger::DATA_CHANGED != 0 {
        Some(ReasonForInclusion::DataChange)
    } else if trigger_options & trigger::DATA_UPDATED != 0 {
        Some(ReasonForInclusion::DataUpdate)
    } else {
        None
    }
}

impl ProtocolStack for LoopbackStack {
    fn create_model(&self, name: &str) -> Result<ModelHandle> {
        let id = self.allocate();
        self.state.lock().insert(id, None, name, NodeKind::Model);
        Ok(ModelHandle(id))
    }

    fn create_logical_device(&self, model: ModelHandle, name: &str) -> Result<NodeHandle> {
        let mut state = self.state.lock();
        if !matches!(state.node(model.0)?.kind, NodeKind::Model) {
            return Err(ModelError::Stack(format!("handle {} is not a model", model.0)));
        }
        if state.child(model.0, name).is_some() {
            return Err(ModelError::Stack(format!("logical device '{name}' exists")));
        }
        let id = self.allocate();
        state.insert(id, Some(model.0), name, NodeKind::Device);
        Ok(NodeHandle(id))
    }

    fn create_logical_node(&self, device: NodeHandle, name: &str) -> Result<NodeHandle> {
        let mut state = self.state.lock();
        if !matches!(state.node(device.0)?.kind, NodeKind::Device) {
            return Err(ModelError::Stack(format!("handle {} is not a device", device.0)));
        }
        let id = self.allocate();
        state.insert(id, Some(device.0), name, NodeKind::LogicalNode);
        Ok(NodeHandle(id))
    }

    fn create_data_object(
        &self,
        node: NodeHandle,
        name: &str,
        cdc: Cdc,
        args: &CreationArgs,
    ) -> Result<NodeHandle> {
        let mut state = self.state.lock();
        if !matches!(state.node(node.0)?.kind, NodeKind::LogicalNode) {
            return Err(ModelError::Stack(format!(
                "handle {} is not a logical node",
                node.0
            )));
        }
        let object = self.allocate();
        state.insert(object, Some(node.0), name, NodeKind::Object);
        for leaf in templates::leaves(cdc, args) {
            let mut parent = object;
            let mut segments = leaf.name.split('.').peekable();
            while let Some(segment) = segments.next() {
                if segments.peek().is_none() {
                    let id = self.allocate();
                    state.insert(
                        id,
                        Some(parent),
                        segment,
                        NodeKind::Leaf {
                            fc: leaf.fc,
                            kind: leaf.kind,
                            value: leaf.kind.initial_value(),
                        },
                    );
                } else if let Some(existing) = state.child(parent, segment) {
                    parent = existing;
                } else {
                    let id = self.allocate();
                    state.insert(id, Some(parent), segment, NodeKind::Structure(leaf.fc));
                    parent = id;
                }
            }
        }
        debug!(object = name, cdc = %cdc, "loopback data object created");
        Ok(NodeHandle(object))
    }

    fn find_attribute(&self, object: NodeHandle, name: &str) -> Option<AttributeNode> {
        let state = self.state.lock();
        let id = state.descend(object.0, name.split('.'))?;
        match &state.nodes.get(&id)?.kind {
            NodeKind::Leaf { fc, kind, .. } => Some(AttributeNode {
                handle: AttributeHandle(id),
                fc: *fc,
                kind: Some(*kind),
            }),
            NodeKind::Structure(fc) => Some(AttributeNode {
                handle: AttributeHandle(id),
                fc: *fc,
                kind: None,
            }),
            _ => None,
        }
    }

    fn create_data_set(&self, node: NodeHandle, name: &str) -> Result<DataSetHandle> {
        let mut state = self.state.lock();
        if !matches!(state.node(node.0)?.kind, NodeKind::LogicalNode) {
            return Err(ModelError::Stack(format!(
                "data set '{name}' needs a logical node parent"
            )));
        }
        let id = self.allocate();
        state.data_sets.insert(
            id,
            DataSetState {
                node: node.0,
                members: Vec::new(),
            },
        );
        Ok(DataSetHandle(id))
    }

    fn add_data_set_entry(
        &self,
        data_set: DataSetHandle,
        variable: &str,
        target: AttributeHandle,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.node(target.0)?;
        let data_set = state
            .data_sets
            .get_mut(&data_set.0)
            .ok_or_else(|| ModelError::Stack(format!("unknown data set for '{variable}'")))?;
        data_set.members.push(target.0);
        Ok(())
    }

    fn create_report_control_block(
        &self,
        node: NodeHandle,
        data_set: DataSetHandle,
        control: &ReportControl,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.node(node.0)?;
        if !state.data_sets.contains_key(&data_set.0) {
            return Err(ModelError::Stack(format!(
                "report '{}' bound to unknown data set",
                control.name
            )));
        }
        if state.rcbs.contains_key(&control.reference) {
            return Err(ModelError::Stack(format!(
                "report control block '{}' exists",
                control.reference
            )));
        }
        state.rcbs.insert(
            control.reference.clone(),
            RcbState {
                node: node.0,
                data_set: data_set.0,
                control: control.clone(),
            },
        );
        Ok(())
    }

    fn remove_logical_device(&self, model: ModelHandle, device: NodeHandle) -> Result<()> {
        let mut state = self.state.lock();
        if state.root_of(device.0) != model.0 {
            return Err(ModelError::Stack(format!(
                "device {} does not belong to model {}",
                device.0, model.0
            )));
        }
        state.remove_subtree(device.0);
        Ok(())
    }

    fn destroy_model(&self, model: ModelHandle) {
        let mut state = self.state.lock();
        state.remove_subtree(model.0);
    }

    fn create_server(&self, model: ModelHandle) -> Result<ServerHandle> {
        let mut state = self.state.lock();
        if !matches!(state.node(model.0)?.kind, NodeKind::Model) {
            return Err(ModelError::Stack(format!("handle {} is not a model", model.0)));
        }
        let id = self.allocate();
        state.servers.insert(
            id,
            ServerState {
                model: model.0,
                ..ServerState::default()
            },
        );
        Ok(ServerHandle(id))
    }

    fn set_control_handler(
        &self,
        server: ServerHandle,
        object: NodeHandle,
        handler: Arc<dyn ControlHandler>,
    ) -> Result<()> {
        self.refuse_handler(&format!("object {}", object.0))?;
        let mut state = self.state.lock();
        if !matches!(state.node(object.0)?.kind, NodeKind::Object) {
            return Err(ModelError::Stack(format!(
                "handle {} is not a data object",
                object.0
            )));
        }
        state
            .server_mut(server)?
            .control_handlers
            .insert(object.0, handler);
        Ok(())
    }

    fn install_report_handler(
        &self,
        server: ServerHandle,
        rcb_reference: &str,
        handler: Arc<dyn ReportHandler>,
    ) -> Result<()> {
        self.refuse_handler(rcb_reference)?;
        let mut state = self.state.lock();
        if !state.rcbs.contains_key(rcb_reference) {
            return Err(ModelError::PathNotFound(rcb_reference.to_owned()));
        }
        state
            .server_mut(server)?
            .report_handlers
            .insert(rcb_reference.to_owned(), handler);
        Ok(())
    }

    fn start_server(&self, server: ServerHandle, port: u16) -> Result<()> {
        let mut state = self.state.lock();
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(ModelError::Startup(format!("unable to listen on port {port}")));
        }
        let clash = state
            .servers
            .iter()
            .any(|(id, other)| *id != server.0 && other.running && other.port == port);
        if clash {
            return Err(ModelError::Startup(format!("port {port} already in use")));
        }
        let entry = state.server_mut(server)?;
        entry.running = true;
        entry.port = port;
        debug!(server = server.0, port, "loopback server listening");
        Ok(())
    }

    fn is_running(&self, server: ServerHandle) -> bool {
        self.state
            .lock()
            .servers
            .get(&server.0)
            .is_some_and(|server| server.running)
    }

    fn stop_server(&self, server: ServerHandle) {
        let mut state = self.state.lock();
        if let Some(entry) = state.servers.get_mut(&server.0) {
            entry.running = false;
            entry.pending.clear();
        }
    }

    fn destroy_server(&self, server: ServerHandle) {
        self.state.lock().servers.remove(&server.0);
    }

    fn lock_data_model(&self, server: ServerHandle) {
        self.lock_balance.fetch_add(1, Ordering::SeqCst);
        if let Some(entry) = self.state.lock().servers.get_mut(&server.0) {
            entry.lock_depth += 1;
        }
    }

    fn unlock_data_model(&self, server: ServerHandle) {
        self.lock_balance.fetch_sub(1, Ordering::SeqCst);
        let deliveries = {
            let mut state = self.state.lock();
            match state.servers.get_mut(&server.0) {
                Some(entry) => {
                    entry.lock_depth = entry.lock_depth.saturating_sub(1);
                    if entry.lock_depth == 0 {
                        std::mem::take(&mut entry.pending)
                    } else {
                        Vec::new()
                    }
                }
                None => Vec::new(),
            }
        };
        Self::deliver(deliveries);
    }

    fn update_attribute(
        &self,
        server: ServerHandle,
        attribute: AttributeHandle,
        value: &MmsValue,
    ) -> Result<()> {
        let deliveries = {
            let mut state = self.state.lock();
            let model = state.server(server)?.model;
            if state.root_of(attribute.0) != model {
                return Err(ModelError::Stack(format!(
                    "attribute {} does not belong to the served model",
                    attribute.0
                )));
            }
            let node = state
                .nodes
                .get_mut(&attribute.0)
                .ok_or_else(|| ModelError::Stack(format!("unknown handle {}", attribute.0)))?;
            let (kind, changed) = match &mut node.kind {
                NodeKind::Leaf {
                    kind, value: held, ..
                } => {
                    if std::mem::discriminant(held) != std::mem::discriminant(value) {
                        return Err(ModelError::Stack(format!(
                            "{} value written to {} attribute '{}'",
                            value.kind(),
                            held.kind(),
                            node.name
                        )));
                    }
                    let changed = *held != *value;
                    *held = value.clone();
                    (*kind, changed)
                }
                _ => {
                    return Err(ModelError::Stack(format!(
                        "'{}' is not a leaf attribute",
                        node.name
                    )))
                }
            };

            let mut lineage = vec![attribute.0];
            let mut cursor = attribute.0;
            while let Some(parent) = state.nodes.get(&cursor).and_then(|node| node.parent) {
                lineage.push(parent);
                cursor = parent;
            }

            let server_state = state.server(server)?;
            let mut generated = Vec::new();
            if server_state.running {
                for (reference, rcb) in &state.rcbs {
                    let Some(handler) = server_state.report_handlers.get(reference) else {
                        continue;
                    };
                    let Some(data_set) = state.data_sets.get(&rcb.data_set) else {
                        continue;
                    };
                    let Some(reason) =
                        trigger_reason(rcb.control.trigger_options, kind, changed)
                    else {
                        continue;
                    };
                    let reasons: Vec<_> = data_set
                        .members
                        .iter()
                        .map(|member| {
                            if lineage.contains(member) {
                                reason
                            } else {
                                ReasonForInclusion::NotIncluded
                            }
                        })
                        .collect();
                    if reasons.iter().all(|reason| *reason == ReasonForInclusion::NotIncluded) {
                        continue;
                    }
                    match state.report(rcb, &reasons) {
                        Ok(report) => generated.push((Arc::clone(handler), report)),
                        Err(err) => warn!(rcb = %reference, error = %err, "report dropped"),
                    }
                }
            }

            let server_state = state.server_mut(server)?;
            if server_state.lock_depth > 0 {
                server_state.pending.extend(generated);
                Vec::new()
            } else {
                generated
            }
        };
        Self::deliver(deliveries);
        Ok(())
    }

    fn read_attribute(&self, server: ServerHandle, attribute: AttributeHandle) -> Result<MmsValue> {
        let state = self.state.lock();
        let model = state.server(server)?.model;
        if state.root_of(attribute.0) != model {
            return Err(ModelError::Stack(format!(
                "attribute {} does not belong to the served model",
                attribute.0
            )));
        }
        state.value_of(attribute.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as TestMutex;

    #[derive(Default)]
    struct Collect(TestMutex<Vec<Report>>);

    impl ReportHandler for Collect {
        fn handle_report(&self, report: &Report) {
            self.0.lock().push(report.clone());
        }
    }

    struct Fixture {
        stack: LoopbackStack,
        model: ModelHandle,
        server: ServerHandle,
        mag: AttributeHandle,
        quality: AttributeHandle,
    }

    fn fixture(trigger_options: u32) -> Fixture {
        let stack = LoopbackStack::new();
        let model = stack.create_model("proxy").unwrap();
        let device = stack.create_logical_device(model, "SENSORS").unwrap();
        let node = stack.create_logical_node(device, "TTMP1").unwrap();
        let object = stack
            .create_data_object(
                node,
                "TmpSv",
                Cdc::Sav,
                &CreationArgs::Analogue {
                    options: 0,
                    integer: false,
                },
            )
            .unwrap();
        let mag = stack.find_attribute(object, "instMag.f").unwrap().handle;
        let quality = stack.find_attribute(object, "q").unwrap().handle;
        let data_set = stack.create_data_set(node, "Temps").unwrap();
        stack
            .add_data_set_entry(data_set, "TTMP1$MX$TmpSv$instMag$f", mag)
            .unwrap();
        stack
            .add_data_set_entry(data_set, "TTMP1$MX$TmpSv$q", quality)
            .unwrap();
        stack
            .create_report_control_block(
                node,
                data_set,
                &ReportControl {
                    name: "urcb01".into(),
                    reference: "SENSORS/TTMP1.RP.urcb01".into(),
                    report_id: "temps".into(),
                    buffered: false,
                    configuration_revision: 1,
                    trigger_options,
                    report_options: report_option::TIME_STAMP,
                    buffer_time: 0,
                    integrity_period: 0,
                },
            )
            .unwrap();
        let server = stack.create_server(model).unwrap();
        Fixture {
            stack,
            model,
            server,
            mag,
            quality,
        }
    }

    #[test]
    fn structured_attributes_resolve_by_dotted_name() {
        let fx = fixture(0);
        assert_eq!(
            fx.stack.read_attribute(fx.server, fx.mag).unwrap(),
            MmsValue::Float(0.0)
        );
        fx.stack
            .update_attribute(fx.server, fx.mag, &MmsValue::Float(12.5))
            .unwrap();
        assert_eq!(
            fx.stack.read_attribute(fx.server, fx.mag).unwrap(),
            MmsValue::Float(12.5)
        );
        let err = fx
            .stack
            .update_attribute(fx.server, fx.mag, &MmsValue::Boolean(true))
            .unwrap_err();
        assert!(matches!(err, ModelError::Stack(_)));
    }

    #[test]
    fn changes_are_reported_with_reasons_per_entry() {
        let fx = fixture(trigger::DATA_CHANGED | trigger::QUALITY_CHANGED);
        let sink = Arc::new(Collect::default());
        fx.stack
            .install_report_handler(fx.server, "SENSORS/TTMP1.RP.urcb01", sink.clone())
            .unwrap();
        fx.stack.start_server(fx.server, 10102).unwrap();

        fx.stack
            .update_attribute(fx.server, fx.mag, &MmsValue::Float(3.0))
            .unwrap();
        fx.stack
            .update_attribute(fx.server, fx.mag, &MmsValue::Float(3.0))
            .unwrap();
        fx.stack
            .update_attribute(fx.server, fx.quality, &MmsValue::BitString { bits: 1, size: 13 })
            .unwrap();

        let reports = sink.0.lock();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].entries[0].reason, ReasonForInclusion::DataChange);
        assert_eq!(reports[0].entries[0].value, Some(MmsValue::Float(3.0)));
        assert_eq!(reports[0].entries[1].reason, ReasonForInclusion::NotIncluded);
        assert!(reports[0].timestamp.is_some());
        assert_eq!(reports[1].entries[1].reason, ReasonForInclusion::QualityChange);
    }

    #[test]
    fn reports_wait_for_the_data_model_lock() {
        let fx = fixture(trigger::DATA_UPDATED);
        let sink = Arc::new(Collect::default());
        fx.stack
            .install_report_handler(fx.server, "SENSORS/TTMP1.RP.urcb01", sink.clone())
            .unwrap();
        fx.stack.start_server(fx.server, 10102).unwrap();

        fx.stack.lock_data_model(fx.server);
        fx.stack
            .update_attribute(fx.server, fx.mag, &MmsValue::Float(0.0))
            .unwrap();
        assert!(sink.0.lock().is_empty());
        fx.stack.unlock_data_model(fx.server);
        assert_eq!(sink.0.lock().len(), 1);
        assert_eq!(sink.0.lock()[0].entries[0].reason, ReasonForInclusion::DataUpdate);
        assert_eq!(fx.stack.lock_balance(), 0);
    }

    #[test]
    fn general_interrogation_includes_every_entry() {
        let fx = fixture(trigger::GENERAL_INTERROGATION);
        let sink = Arc::new(Collect::default());
        fx.stack
            .install_report_handler(fx.server, "SENSORS/TTMP1.RP.urcb01", sink.clone())
            .unwrap();
        fx.stack.start_server(fx.server, 10102).unwrap();
        fx.stack
            .general_interrogation("SENSORS/TTMP1.RP.urcb01")
            .unwrap();
        let reports = sink.0.lock();
        assert!(reports[0]
            .entries
            .iter()
            .all(|entry| entry.reason == ReasonForInclusion::GeneralInterrogation));
    }

    #[test]
    fn start_failures_and_port_clashes_are_startup_errors() {
        let fx = fixture(0);
        fx.stack.fail_next_start();
        assert!(matches!(
            fx.stack.start_server(fx.server, 10102),
            Err(ModelError::Startup(_))
        ));
        fx.stack.start_server(fx.server, 10102).unwrap();

        let other = fx.stack.create_model("other").unwrap();
        let second = fx.stack.create_server(other).unwrap();
        assert!(matches!(
            fx.stack.start_server(second, 10102),
            Err(ModelError::Startup(_))
        ));
    }

    #[test]
    fn destroying_a_model_releases_everything_below_it() {
        let fx = fixture(0);
        fx.stack.stop_server(fx.server);
        fx.stack.destroy_server(fx.server);
        fx.stack.destroy_model(fx.model);
        assert_eq!(fx.stack.live_models(), 0);
        assert!(fx.stack.state.lock().nodes.is_empty());
        assert!(fx.stack.state.lock().rcbs.is_empty());
    }
}
