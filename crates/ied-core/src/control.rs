//! ---
//! ied_section: "01-core-functionality"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Field control operations forwarded to the backend."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
//! Control requests arrive on engine threads and must be confirmed without
//! waiting on the network. [`ControlRoute`] decodes the value and queues it on
//! a bounded channel; [`ControlWorker`] drains the queue on the async runtime
//! and performs the backend call. A full or closed queue is reported to the
//! field client as a failed operation.

use std::sync::Arc;
use std::time::Duration;

use ied_metrics::BridgeMetrics;
use ied_model::stack::{ControlAction, ControlHandler, ControlResult};
use ied_model::{decode, DataType, MmsValue};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::Backend;

/// A decoded operate request waiting for the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlCommand {
    /// Data-object path, `LD.LN.DO`.
    pub path: String,
    pub value: Value,
    pub ctl_num: u8,
    pub originator: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("control queue is full")]
    Full,
    #[error("control worker is not running")]
    Closed,
}

/// Sending half of the control queue. Cheap to clone; one per route.
#[derive(Clone, Debug)]
pub struct ControlDispatcher {
    tx: mpsc::Sender<ControlCommand>,
}

impl ControlDispatcher {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ControlCommand>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue without blocking the calling engine thread.
    pub fn try_dispatch(&self, command: ControlCommand) -> Result<(), DispatchError> {
        self.tx.try_send(command).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DispatchError::Full,
            mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
        })
    }
}

/// Control handler installed on one controllable data object.
pub struct ControlRoute {
    path: String,
    value_type: DataType,
    dispatcher: ControlDispatcher,
    metrics: Option<BridgeMetrics>,
}

impl ControlRoute {
    pub fn new(
        path: impl Into<String>,
        value_type: DataType,
        dispatcher: ControlDispatcher,
        metrics: Option<BridgeMetrics>,
    ) -> Self {
        Self {
            path: path.into(),
            value_type,
            dispatcher,
            metrics,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn record(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_control(outcome);
        }
    }
}

impl ControlHandler for ControlRoute {
    fn handle_control(&self, action: &ControlAction, value: &MmsValue) -> ControlResult {
        let decoded = match decode(Some(self.value_type), value) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(path = %self.path, error = %err, "control value rejected");
                self.record("rejected");
                return ControlResult::Failed;
            }
        };
        if action.test {
            info!(path = %self.path, value = %decoded, ctl_num = action.ctl_num, "test-mode control acknowledged");
            self.record("test");
            return ControlResult::Ok;
        }
        let command = ControlCommand {
            path: self.path.clone(),
            value: decoded,
            ctl_num: action.ctl_num,
            originator: action.originator.clone(),
        };
        match self.dispatcher.try_dispatch(command) {
            Ok(()) => {
                debug!(path = %self.path, ctl_num = action.ctl_num, "control queued");
                self.record("queued");
                ControlResult::Ok
            }
            Err(err) => {
                warn!(path = %self.path, error = %err, "control refused");
                self.record("refused");
                ControlResult::Failed
            }
        }
    }
}

/// How the backend handled a queued command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ControlStatus {
    Forwarded,
    Failed { error: String },
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlOutcome {
    pub path: String,
    pub value: Value,
    #[serde(flatten)]
    pub status: ControlStatus,
}

/// Task forwarding queued commands to the backend, one call per command.
///
/// Failed calls are not retried and the engine value is left as the client
/// set it; the failure is logged, counted and published as a [`ControlOutcome`].
pub struct ControlWorker {
    outcomes: broadcast::Sender<ControlOutcome>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ControlWorker {
    pub fn spawn(
        mut queue: mpsc::Receiver<ControlCommand>,
        backend: Arc<dyn Backend>,
        timeout: Option<Duration>,
        metrics: Option<BridgeMetrics>,
    ) -> Self {
        let (outcomes, _) = broadcast::channel(64);
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let publisher = outcomes.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    next = queue.recv() => {
                        let Some(command) = next else {
                            debug!("control queue closed");
                            return;
                        };
                        process(backend.as_ref(), command, timeout, metrics.as_ref(), &publisher)
                            .await;
                    }
                }
            }
            // Commands already confirmed to the field are still delivered.
            queue.close();
            let mut drained = 0usize;
            while let Some(command) = queue.recv().await {
                process(backend.as_ref(), command, timeout, metrics.as_ref(), &publisher).await;
                drained += 1;
            }
            debug!(drained, "control worker shutdown");
        });
        Self {
            outcomes,
            shutdown,
            task,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlOutcome> {
        self.outcomes.subscribe()
    }

    /// Stop accepting commands and forward those already queued.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            error!(error = %err, "control worker join error");
        }
    }
}

async fn process(
    backend: &dyn Backend,
    command: ControlCommand,
    timeout: Option<Duration>,
    metrics: Option<&BridgeMetrics>,
    publisher: &broadcast::Sender<ControlOutcome>,
) {
    let outcome = forward(backend, command, timeout).await;
    if let Some(metrics) = metrics {
        metrics.record_control(match outcome.status {
            ControlStatus::Forwarded => "forwarded",
            ControlStatus::Failed { .. } => "backend_error",
            ControlStatus::TimedOut => "timeout",
        });
    }
    let _ = publisher.send(outcome);
}

async fn forward(
    backend: &dyn Backend,
    command: ControlCommand,
    timeout: Option<Duration>,
) -> ControlOutcome {
    let mut values = IndexMap::with_capacity(1);
    values.insert(command.path.clone(), command.value.clone());
    let call = backend.update_point_values(values);
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result.map_err(Some),
            Err(_) => Err(None),
        },
        None => call.await.map_err(Some),
    };
    let status = match result {
        Ok(()) => {
            info!(path = %command.path, value = %command.value, ctl_num = command.ctl_num, "control forwarded");
            ControlStatus::Forwarded
        }
        Err(Some(err)) => {
            error!(path = %command.path, error = %format!("{err:#}"), "backend rejected control");
            ControlStatus::Failed {
                error: format!("{err:#}"),
            }
        }
        Err(None) => {
            error!(path = %command.path, timeout_ms = timeout.map_or(0, |limit| limit.as_millis() as u64), "backend call timed out");
            ControlStatus::TimedOut
        }
    };
    ControlOutcome {
        path: command.path,
        value: command.value,
        status,
    }
}
