//! ---
//! ied_section: "01-core-functionality"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Lifecycle manager for the served model generation."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
//! [`IedRuntime`] owns the current schema and at most one live generation.
//!
//! Lifecycle operations (start, stop, restart, add, reset) hold the lifecycle
//! lock exclusively, so they are serialised with each other and with point
//! writes, which hold it shared. A generation is never visible to callers
//! before its server reports running.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use ied_metrics::BridgeMetrics;
use ied_model::{
    IedModel, LogicalDeviceSchema, ModelBuilder, ModelError, ModelSchema, ProtocolStack,
    ReportInfo,
};
use ied_persistence::{PersistenceError, SchemaStore};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::control::{ControlDispatcher, ControlRoute};
use crate::report::ReportBridge;
use crate::state::Generation;
use crate::update::{self, UpdateOutcome};

/// Model name used when no schema has been stored yet.
pub const DEFAULT_MODEL_NAME: &str = "proxy";

/// Devices accepted and skipped by one add request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddOutcome {
    pub added: Vec<String>,
    pub skipped: Vec<String>,
}

/// Point-in-time view of the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeStatus {
    pub running: bool,
    pub generation: Option<Uuid>,
    pub port: u16,
    pub devices: Vec<String>,
    pub paths: usize,
}

struct Lifecycle {
    schema: ModelSchema,
    live: Option<Arc<Generation>>,
}

pub struct IedRuntime {
    stack: Arc<dyn ProtocolStack>,
    store: Arc<dyn SchemaStore>,
    port: u16,
    dispatcher: ControlDispatcher,
    reports: ReportBridge,
    metrics: Option<BridgeMetrics>,
    lifecycle: RwLock<Lifecycle>,
}

impl IedRuntime {
    /// Load the stored schema, or an empty one when none exists yet. Nothing
    /// is built until [`IedRuntime::start`].
    pub fn new(
        stack: Arc<dyn ProtocolStack>,
        store: Arc<dyn SchemaStore>,
        port: u16,
        dispatcher: ControlDispatcher,
        reports: ReportBridge,
    ) -> Result<Self> {
        let schema = match store.load() {
            Ok(schema) => schema,
            Err(PersistenceError::Missing(path)) => {
                warn!(path = %path.display(), "no stored schema; starting with an empty model");
                ModelSchema::new(DEFAULT_MODEL_NAME)
            }
            Err(err) => return Err(anyhow::Error::new(err).context("failed to load model schema")),
        };
        info!(
            model = %schema.name,
            devices = schema.logical_devices.len(),
            "schema loaded"
        );
        Ok(Self {
            stack,
            store,
            port,
            dispatcher,
            reports,
            metrics: None,
            lifecycle: RwLock::new(Lifecycle { schema, live: None }),
        })
    }

    pub fn with_metrics(mut self, metrics: BridgeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn reports(&self) -> &ReportBridge {
        &self.reports
    }

    /// Build the stored schema and start serving it. Idempotent.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.write();
        if lifecycle.live.is_some() {
            debug!("runtime already started");
            return Ok(());
        }
        let result = self.launch(&lifecycle.schema);
        self.observe("start", &result);
        lifecycle.live = Some(result?);
        Ok(())
    }

    /// Stop serving and release the live generation.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle.write();
        if let Some(generation) = lifecycle.live.take() {
            self.teardown(&generation);
            if let Some(metrics) = &self.metrics {
                metrics.record_lifecycle("stop", true);
            }
        }
    }

    /// Tear down the live generation and rebuild it from the current schema.
    pub fn restart(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.write();
        if let Some(generation) = lifecycle.live.take() {
            self.teardown(&generation);
        }
        let result = self.launch(&lifecycle.schema);
        self.observe("restart", &result);
        lifecycle.live = Some(result?);
        info!("server restarted");
        Ok(())
    }

    /// Add devices not yet in the schema, without rebuilding the model.
    ///
    /// Devices whose name already exists are skipped. Devices accepted before
    /// a failing one stay added and are persisted. While stopped, devices are
    /// checked against a scratch build of the schema so that nothing which
    /// cannot be built reaches the store.
    pub fn add_logical_devices(&self, devices: &[LogicalDeviceSchema]) -> Result<AddOutcome> {
        let mut lifecycle = self.lifecycle.write();
        let mut staging = match &lifecycle.live {
            Some(_) => None,
            None => Some(
                ModelBuilder::new(self.stack.as_ref())
                    .build(&lifecycle.schema)
                    .context("stored schema does not build")?,
            ),
        };
        let mut outcome = AddOutcome::default();
        let mut failure = None;
        for device in devices {
            if lifecycle.schema.contains_device(&device.name) {
                info!(device = %device.name, "logical device already present, skipped");
                outcome.skipped.push(device.name.clone());
                continue;
            }
            let accepted = match (&lifecycle.live, staging.as_mut()) {
                (Some(generation), _) => self.incorporate(generation, device),
                (None, Some(model)) => {
                    ModelBuilder::new(self.stack.as_ref()).add_device(model, device)
                }
                (None, None) => Ok(()),
            };
            if let Err(err) = accepted {
                failure = Some(
                    anyhow::Error::new(err)
                        .context(format!("failed to add logical device {}", device.name)),
                );
                break;
            }
            lifecycle.schema.logical_devices.push(device.clone());
            outcome.added.push(device.name.clone());
        }
        if let Some(model) = staging {
            self.stack.destroy_model(model.handle());
        }
        if !outcome.added.is_empty() {
            self.store
                .save_atomic(&lifecycle.schema)
                .context("failed to persist schema")?;
            if let Some(generation) = &lifecycle.live {
                self.record_paths(&generation.model());
            }
        }
        let result = match failure {
            Some(err) => Err(err),
            None => Ok(outcome),
        };
        self.observe("add", &result);
        result
    }

    /// Replace every device, persist the new schema, and rebuild.
    ///
    /// When the new schema cannot be served the previous one is relaunched
    /// and neither the stored nor the in-memory schema changes.
    pub fn reset_logical_devices(&self, devices: Vec<LogicalDeviceSchema>) -> Result<()> {
        let mut lifecycle = self.lifecycle.write();
        let candidate = lifecycle.schema.with_devices(devices);
        let previous = lifecycle.live.take();
        if let Some(generation) = &previous {
            self.teardown(generation);
        }
        let result = self.launch(&candidate).and_then(|generation| {
            match self.store.save_atomic(&candidate) {
                Ok(()) => Ok(generation),
                Err(err) => {
                    self.teardown(&generation);
                    Err(anyhow::Error::new(err).context("failed to persist schema"))
                }
            }
        });
        self.observe("reset", &result);
        match result {
            Ok(generation) => {
                lifecycle.schema = candidate;
                lifecycle.live = Some(generation);
                info!(devices = lifecycle.schema.logical_devices.len(), "logical devices reset");
                Ok(())
            }
            Err(err) => {
                if previous.is_some() {
                    match self.launch(&lifecycle.schema) {
                        Ok(generation) => lifecycle.live = Some(generation),
                        Err(relaunch) => {
                            error!(error = %format!("{relaunch:#}"), "previous model could not be relaunched")
                        }
                    }
                }
                Err(err)
            }
        }
    }

    /// Apply point writes to the live generation.
    pub fn update(&self, values: &IndexMap<String, Value>) -> Result<UpdateOutcome> {
        let lifecycle = self.lifecycle.read();
        let generation = lifecycle
            .live
            .as_ref()
            .ok_or_else(|| anyhow!("server is not running"))?;
        let outcome = update::apply(generation, values);
        if let Some(metrics) = &self.metrics {
            metrics.record_point_updates(outcome.applied, outcome.rejected.len());
        }
        Ok(outcome)
    }

    pub fn read(&self, path: &str) -> Result<Value> {
        let lifecycle = self.lifecycle.read();
        let generation = lifecycle
            .live
            .as_ref()
            .ok_or_else(|| anyhow!("server is not running"))?;
        Ok(update::read(generation, path)?)
    }

    /// Leaf attribute paths of the live generation.
    pub fn paths(&self) -> Vec<String> {
        self.lifecycle
            .read()
            .live
            .as_ref()
            .map(|generation| {
                generation
                    .model()
                    .index()
                    .paths()
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn generation_id(&self) -> Option<Uuid> {
        self.lifecycle.read().live.as_ref().map(|generation| generation.id())
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle
            .read()
            .live
            .as_ref()
            .is_some_and(|generation| self.stack.is_running(generation.server()))
    }

    pub fn schema(&self) -> ModelSchema {
        self.lifecycle.read().schema.clone()
    }

    pub fn status(&self) -> RuntimeStatus {
        let lifecycle = self.lifecycle.read();
        let live = lifecycle.live.as_ref();
        RuntimeStatus {
            running: live.is_some_and(|generation| self.stack.is_running(generation.server())),
            generation: live.map(|generation| generation.id()),
            port: self.port,
            devices: lifecycle
                .schema
                .logical_devices
                .iter()
                .map(|device| device.name.clone())
                .collect(),
            paths: live.map_or(0, |generation| generation.model().index().len()),
        }
    }

    /// Build, bind handlers and start a server for `schema`.
    ///
    /// On failure every engine resource created here is released.
    fn launch(&self, schema: &ModelSchema) -> Result<Arc<Generation>> {
        let stack = self.stack.as_ref();
        let model = ModelBuilder::new(stack)
            .build(schema)
            .context("failed to build information model")?;
        let server = match stack.create_server(model.handle()) {
            Ok(server) => server,
            Err(err) => {
                stack.destroy_model(model.handle());
                return Err(anyhow::Error::new(err).context("failed to create server"));
            }
        };
        let generation = Generation::new(self.stack.clone(), model, server);
        let started = self
            .bind(&generation, None)
            .and_then(|()| stack.start_server(server, self.port))
            .and_then(|()| {
                if stack.is_running(server) {
                    Ok(())
                } else {
                    Err(ModelError::Startup(format!(
                        "server did not come up on port {}",
                        self.port
                    )))
                }
            });
        if let Err(err) = started {
            error!(port = self.port, error = %err, "server start failed");
            generation.teardown();
            let err = match err {
                ModelError::Startup(_) => err,
                other => ModelError::Startup(other.to_string()),
            };
            return Err(anyhow::Error::new(err).context("failed to start server"));
        }
        let model = generation.model();
        info!(
            port = self.port,
            generation = %model.id(),
            paths = model.index().len(),
            "server running"
        );
        self.record_paths(&model);
        drop(model);
        Ok(Arc::new(generation))
    }

    /// Install control and report handlers. With `device` set, only objects
    /// and reports of that device are bound.
    fn bind(&self, generation: &Generation, device: Option<&str>) -> ied_model::Result<()> {
        let model = generation.model();
        let prefix = device.map(|name| format!("{name}."));
        let selected = |path: &str| prefix.as_deref().map_or(true, |prefix| path.starts_with(prefix));
        for (path, object) in model.index().controllable_objects() {
            if !selected(path) {
                continue;
            }
            let Some(value_type) = object.control_type else {
                continue;
            };
            let route = ControlRoute::new(
                path,
                value_type,
                self.dispatcher.clone(),
                self.metrics.clone(),
            );
            generation
                .stack()
                .set_control_handler(generation.server(), object.handle, Arc::new(route))?;
            debug!(path, "control handler installed");
        }
        let device_prefix = device.map(|name| format!("{name}/"));
        for info in model.reports() {
            let wanted = device_prefix
                .as_deref()
                .map_or(true, |prefix| info.reference.starts_with(prefix));
            if wanted {
                self.bind_report(generation, info)?;
            }
        }
        Ok(())
    }

    fn bind_report(&self, generation: &Generation, info: &ReportInfo) -> ied_model::Result<()> {
        generation.stack().install_report_handler(
            generation.server(),
            &info.reference,
            Arc::new(self.reports.route(info)),
        )?;
        debug!(rcb = %info.reference, members = info.members.len(), "report handler installed");
        Ok(())
    }

    /// Build `device` into the live generation and bind its handlers. A device
    /// whose handlers cannot all be installed is taken out again.
    fn incorporate(&self, generation: &Generation, device: &LogicalDeviceSchema) -> ied_model::Result<()> {
        {
            let _guard = generation.lock();
            let mut model = generation.model_mut();
            ModelBuilder::new(generation.stack()).add_device(&mut model, device)?;
        }
        if let Err(err) = self.bind(generation, Some(&device.name)) {
            warn!(device = %device.name, error = %err, "handler installation failed");
            let _guard = generation.lock();
            let mut model = generation.model_mut();
            if let Err(cleanup) =
                ModelBuilder::new(generation.stack()).remove_device(&mut model, &device.name)
            {
                error!(device = %device.name, error = %cleanup, "rollback of logical device failed");
            }
            return Err(err);
        }
        info!(device = %device.name, generation = %generation.id(), "logical device added");
        Ok(())
    }

    fn teardown(&self, generation: &Generation) {
        generation.teardown();
        info!(generation = %generation.id(), "generation released");
        if let Some(metrics) = &self.metrics {
            metrics.set_model_paths(0);
        }
    }

    fn record_paths(&self, model: &IedModel) {
        if let Some(metrics) = &self.metrics {
            metrics.set_model_paths(model.index().len());
        }
    }

    fn observe<T>(&self, operation: &str, result: &Result<T>) {
        if let Some(metrics) = &self.metrics {
            metrics.record_lifecycle(operation, result.is_ok());
        }
        if let Err(err) = result {
            warn!(operation, error = %format!("{err:#}"), "lifecycle operation failed");
        }
    }
}

impl Drop for IedRuntime {
    fn drop(&mut self) {
        if let Some(generation) = self.lifecycle.get_mut().live.take() {
            generation.teardown();
        }
    }
}
