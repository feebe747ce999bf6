//! ---
//! ied_section: "05-networking-external-interfaces"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Inbound gRPC service driving the proxy runtime."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use ied_core::IedRuntime;
use ied_model::LogicalDeviceSchema;
use indexmap::IndexMap;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tonic::transport::server::TcpIncoming;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

#[allow(missing_docs)]
pub mod proto {
    tonic::include_proto!("ied.proxy.v1");
}

use proto::ancillary_inputs_server::{AncillaryInputs, AncillaryInputsServer};

/// Configures and spawns the inbound gRPC server.
#[derive(Clone)]
pub struct GrpcServerBuilder {
    listen: SocketAddr,
    runtime: Arc<IedRuntime>,
    workers: usize,
}

impl GrpcServerBuilder {
    /// Serve `runtime` on `listen`, running at most `workers` operations at once.
    pub fn new(listen: SocketAddr, runtime: Arc<IedRuntime>, workers: usize) -> Self {
        Self {
            listen,
            runtime,
            workers: workers.max(1),
        }
    }

    /// Spawn the gRPC server and return a handle for coordinated shutdown.
    pub async fn spawn(self) -> anyhow::Result<GrpcServerHandle> {
        let listener = tokio::net::TcpListener::bind(self.listen).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, workers = self.workers, "grpc api listening");

        let service = InputsSvc {
            runtime: self.runtime,
            permits: Arc::new(Semaphore::new(self.workers)),
        };

        let incoming = TcpIncoming::from_listener(listener, true, None)
            .map_err(|err| anyhow::anyhow!("failed to build grpc incoming listener: {err}"))?;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let server = Server::builder()
                .add_service(AncillaryInputsServer::new(service))
                .serve_with_incoming_shutdown(incoming, async move {
                    let _ = shutdown_rx.changed().await;
                });
            if let Err(err) = server.await {
                warn!(error = %err, "grpc server exited with error");
            }
        });

        Ok(GrpcServerHandle {
            address: local_addr,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Handle returned when spawning the gRPC server.
pub struct GrpcServerHandle {
    address: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl GrpcServerHandle {
    /// Socket address the server bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(err) => Err(anyhow::anyhow!(err)),
        }
    }
}

struct InputsSvc {
    runtime: Arc<IedRuntime>,
    permits: Arc<Semaphore>,
}

impl InputsSvc {
    /// Run a runtime operation on the blocking pool, holding one worker permit.
    async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T, Status>
    where
        T: Send + 'static,
        F: FnOnce(&IedRuntime) -> T + Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Status::unavailable("worker pool closed"))?;
        let runtime = self.runtime.clone();
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f(&runtime)
        })
        .await
        .map_err(|err| {
            warn!(operation, error = %err, "rpc worker panicked");
            Status::internal(format!("{operation} failed"))
        })?;
        Ok(result)
    }
}

fn respond(result: anyhow::Result<String>) -> Response<proto::Response> {
    match result {
        Ok(message) => Response::new(proto::Response {
            success: true,
            message,
        }),
        Err(err) => Response::new(proto::Response {
            success: false,
            message: format!("{err:#}"),
        }),
    }
}

fn parse_devices(request: proto::LogicalDevices) -> Result<Vec<LogicalDeviceSchema>, Status> {
    request
        .devices
        .into_iter()
        .map(|device| {
            LogicalDeviceSchema::from_parts(device.name, &device.logical_nodes)
                .map_err(|err| Status::invalid_argument(err.to_string()))
        })
        .collect()
}

#[tonic::async_trait]
impl AncillaryInputs for InputsSvc {
    async fn update_point_values(
        &self,
        request: Request<proto::PointValues>,
    ) -> Result<Response<proto::Response>, Status> {
        let mut values = IndexMap::new();
        let mut malformed = Vec::new();
        for (path, raw) in request.into_inner().values {
            match serde_json::from_str(&raw) {
                Ok(value) => {
                    values.insert(path, value);
                }
                Err(err) => {
                    warn!(path = %path, error = %err, "point value is not valid json");
                    malformed.push(path);
                }
            }
        }
        debug!(points = values.len(), "update request received");
        let outcome = self
            .run("update", move |runtime| runtime.update(&values))
            .await?;
        Ok(respond(outcome.and_then(|outcome| {
            let rejected: Vec<_> = malformed
                .into_iter()
                .chain(outcome.rejected.into_iter().map(|(path, _)| path))
                .collect();
            if rejected.is_empty() {
                Ok(format!("{} points applied", outcome.applied))
            } else {
                Err(anyhow::anyhow!(
                    "{} points applied, rejected: {}",
                    outcome.applied,
                    rejected.join(", ")
                ))
            }
        })))
    }

    async fn add_logical_devices(
        &self,
        request: Request<proto::LogicalDevices>,
    ) -> Result<Response<proto::Response>, Status> {
        let devices = parse_devices(request.into_inner())?;
        let result = self
            .run("add", move |runtime| runtime.add_logical_devices(&devices))
            .await?;
        Ok(respond(result.map(|outcome| {
            format!(
                "added [{}], skipped [{}]",
                outcome.added.join(", "),
                outcome.skipped.join(", ")
            )
        })))
    }

    async fn reset_logical_devices(
        &self,
        request: Request<proto::LogicalDevices>,
    ) -> Result<Response<proto::Response>, Status> {
        let devices = parse_devices(request.into_inner())?;
        let count = devices.len();
        let result = self
            .run("reset", move |runtime| runtime.reset_logical_devices(devices))
            .await?;
        Ok(respond(result.map(|()| format!("{count} logical devices loaded"))))
    }

    async fn restart_ied_server(
        &self,
        _request: Request<proto::Empty>,
    ) -> Result<Response<proto::Response>, Status> {
        let result = self.run("restart", |runtime| runtime.restart()).await?;
        Ok(respond(result.map(|()| "server restarted".to_owned())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ied_core::{ControlDispatcher, ReportBridge};
    use ied_model::{LoopbackStack, MmsValue, ModelSchema};
    use ied_persistence::InMemoryStore;
    use proto::ancillary_inputs_client::AncillaryInputsClient;
    use tonic::transport::Channel;

    fn runtime(stack: Arc<LoopbackStack>) -> Arc<IedRuntime> {
        let device = LogicalDeviceSchema::from_parts(
            "SENSORS",
            r#"[{"name": "TTMP1", "data_objects": [
                {"name": "TmpSv", "cdc": "SAV",
                 "data_attributes": [{"name": "instMag.f", "data_type": "float"}]}
            ]}]"#,
        )
        .unwrap();
        let store = Arc::new(InMemoryStore::with_schema(
            ModelSchema::new("proxy").with_devices(vec![device]),
        ));
        let (dispatcher, _queue) = ControlDispatcher::channel(4);
        let runtime =
            IedRuntime::new(stack, store, 10102, dispatcher, ReportBridge::new(4, None)).unwrap();
        runtime.start().unwrap();
        Arc::new(runtime)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn inputs_service_drives_the_runtime() {
        let stack = Arc::new(LoopbackStack::new());
        let runtime = runtime(stack.clone());
        let handle = GrpcServerBuilder::new("127.0.0.1:0".parse().unwrap(), runtime.clone(), 2)
            .spawn()
            .await
            .unwrap();
        let channel = Channel::from_shared(format!("http://{}", handle.local_addr()))
            .unwrap()
            .connect()
            .await
            .unwrap();
        let mut client = AncillaryInputsClient::new(channel);

        let response = client
            .update_point_values(proto::PointValues {
                values: [("SENSORS.TTMP1.TmpSv.instMag.f".to_owned(), "21.5".to_owned())]
                    .into_iter()
                    .collect(),
            })
            .await
            .unwrap()
            .into_inner();
        assert!(response.success, "{}", response.message);
        assert_eq!(
            stack.read_path("SENSORS.TTMP1.TmpSv.instMag.f"),
            Some(MmsValue::Float(21.5))
        );

        let response = client
            .update_point_values(proto::PointValues {
                values: [("SENSORS.TTMP1.Nope.stVal".to_owned(), "1".to_owned())]
                    .into_iter()
                    .collect(),
            })
            .await
            .unwrap()
            .into_inner();
        assert!(!response.success);
        assert!(response.message.contains("SENSORS.TTMP1.Nope.stVal"));

        let generation = runtime.generation_id();
        let response = client
            .restart_ied_server(proto::Empty {})
            .await
            .unwrap()
            .into_inner();
        assert!(response.success);
        assert_ne!(runtime.generation_id(), generation);

        let err = client
            .add_logical_devices(proto::LogicalDevices {
                devices: vec![proto::LogicalDevice {
                    name: "CTRL".into(),
                    logical_nodes: "not json".into(),
                }],
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);

        handle.shutdown().await.unwrap();
    }
}
