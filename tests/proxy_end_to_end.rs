//! ---
//! ied_section: "15-testing-qa-runbook"
//! ied_subsection: "integration-tests"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "RPC in, field control out, and reconfiguration against a persisted schema."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ied_core::{ControlDispatcher, ControlStatus, ControlWorker, IedRuntime, ReportBridge};
use ied_model::stack::ControlResult;
use ied_model::{LoopbackStack, MmsValue, ModelSchema};
use ied_net::proto::ancillary_inputs_client::AncillaryInputsClient;
use ied_net::proto::ancillary_outputs_server::{AncillaryOutputs, AncillaryOutputsServer};
use ied_net::proto::{Empty, LogicalDevice, LogicalDevices, PointValues, Response as Ack};
use ied_net::{GrpcBackend, GrpcServerBuilder};
use ied_persistence::JsonFileStore;
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::timeout;
use tonic::transport::server::TcpIncoming;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
struct BackendRecorder {
    seen: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

#[tonic::async_trait]
impl AncillaryOutputs for BackendRecorder {
    async fn update_point_values(
        &self,
        request: Request<PointValues>,
    ) -> Result<Response<Ack>, Status> {
        self.seen.lock().push(request.into_inner().values);
        Ok(Response::new(Ack {
            success: true,
            message: String::new(),
        }))
    }
}

async fn spawn_backend(recorder: BackendRecorder) -> Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let incoming = TcpIncoming::from_listener(listener, true, None)
        .map_err(|err| anyhow::anyhow!("backend listener: {err}"))?;
    tokio::spawn(
        Server::builder()
            .add_service(AncillaryOutputsServer::new(recorder))
            .serve_with_incoming(incoming),
    );
    Ok(format!("http://{addr}"))
}

fn seed_schema(dir: &Path) -> Result<std::path::PathBuf> {
    let reference = Path::new(env!("CARGO_MANIFEST_DIR")).join("../config/points.json");
    let target = dir.join("points.json");
    fs::copy(reference, &target)?;
    Ok(target)
}

fn stored(path: &Path) -> Result<ModelSchema> {
    Ok(ModelSchema::from_json_str(&fs::read_to_string(path)?)?)
}

fn second_device() -> LogicalDevice {
    LogicalDevice {
        name: "ASG90002".into(),
        logical_nodes: json!([{
            "name": "GGIO1",
            "data_objects": [
                {"name": "SPCSO1", "cdc": "SPC", "controlOptions": ["direct_normal"],
                 "data_attributes": [{"name": "stVal", "data_type": "boolean"}]}
            ]
        }])
        .to_string(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn proxy_bridges_rpc_and_field_traffic() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let schema_path = seed_schema(dir.path())?;

    let recorder = BackendRecorder::default();
    let backend_uri = spawn_backend(recorder.clone()).await?;

    let stack = Arc::new(LoopbackStack::new());
    let (dispatcher, queue) = ControlDispatcher::channel(8);
    let worker = ControlWorker::spawn(
        queue,
        Arc::new(GrpcBackend::connect_lazy(&backend_uri)?),
        Some(WAIT),
        None,
    );
    let mut outcomes = worker.subscribe();
    let reports = ReportBridge::new(16, None);
    let mut report_rx = reports.subscribe();
    let runtime = Arc::new(IedRuntime::new(
        stack.clone(),
        Arc::new(JsonFileStore::new(&schema_path)),
        10102,
        dispatcher,
        reports,
    )?);
    runtime.start()?;

    let grpc = GrpcServerBuilder::new("127.0.0.1:0".parse()?, runtime.clone(), 4)
        .spawn()
        .await?;
    let mut client = AncillaryInputsClient::connect(format!("http://{}", grpc.local_addr())).await?;

    // Backend writes reach the model and fire the measurement report.
    let ack = client
        .update_point_values(PointValues {
            values: [("ASG90001.MMXU1.TotW.mag.f".to_owned(), "1250.5".to_owned())]
                .into_iter()
                .collect(),
        })
        .await?
        .into_inner();
    assert!(ack.success, "{}", ack.message);
    let report = timeout(WAIT, report_rx.recv()).await??;
    assert_eq!(report.rcb_reference, "ASG90001/MMXU1.RP.urcb01");
    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.entries[0].path, "ASG90001.MMXU1.TotW.mag.f");
    assert_eq!(report.entries[0].reason, "data_change");
    assert_eq!(report.entries[0].value, Some(json!(1250.5)));
    assert!(report.timestamp_ms.is_some());

    // Field control is forwarded to the backend keyed by object path.
    let field = stack.clone();
    let result = tokio::task::spawn_blocking(move || {
        field.operate("ASG90001.GGIO1.SPCSO1", MmsValue::Boolean(true), false)
    })
    .await??;
    assert_eq!(result, ControlResult::Ok);
    let outcome = timeout(WAIT, outcomes.recv()).await??;
    assert_eq!(outcome.status, ControlStatus::Forwarded);
    {
        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0].get("ASG90001.GGIO1.SPCSO1").map(String::as_str),
            Some("true")
        );
    }

    // Adding a device extends the live model and the stored schema.
    let generation = runtime.generation_id();
    let ack = client
        .add_logical_devices(LogicalDevices {
            devices: vec![second_device()],
        })
        .await?
        .into_inner();
    assert!(ack.success, "{}", ack.message);
    assert_eq!(runtime.generation_id(), generation);
    assert!(stack.has_control_handler("ASG90002.GGIO1.SPCSO1"));
    let on_disk = stored(&schema_path)?;
    assert_eq!(on_disk.logical_devices.len(), 2);
    assert!(on_disk.contains_device("ASG90002"));

    // Resetting replaces the device list and rebuilds.
    let ack = client
        .reset_logical_devices(LogicalDevices {
            devices: vec![second_device()],
        })
        .await?
        .into_inner();
    assert!(ack.success, "{}", ack.message);
    assert_ne!(runtime.generation_id(), generation);
    assert_eq!(runtime.paths(), vec!["ASG90002.GGIO1.SPCSO1.stVal"]);
    let on_disk = stored(&schema_path)?;
    assert_eq!(on_disk.logical_devices.len(), 1);
    assert_eq!(on_disk.name, "ASG9000");

    let before_restart = runtime.generation_id();
    let ack = client.restart_ied_server(Empty {}).await?.into_inner();
    assert!(ack.success, "{}", ack.message);
    assert_ne!(runtime.generation_id(), before_restart);
    assert_eq!(stack.running_servers(), 1);
    assert_eq!(stack.live_models(), 1);
    assert_eq!(stack.lock_balance(), 0);

    grpc.shutdown().await?;
    runtime.stop();
    worker.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_backend_does_not_block_field_control() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let schema_path = seed_schema(dir.path())?;

    let stack = Arc::new(LoopbackStack::new());
    let (dispatcher, queue) = ControlDispatcher::channel(8);
    // Nothing listens on port 9 of the loopback interface.
    let worker = ControlWorker::spawn(
        queue,
        Arc::new(GrpcBackend::connect_lazy("http://127.0.0.1:9")?),
        Some(Duration::from_millis(500)),
        None,
    );
    let mut outcomes = worker.subscribe();
    let runtime = IedRuntime::new(
        stack.clone(),
        Arc::new(JsonFileStore::new(&schema_path)),
        10102,
        dispatcher,
        ReportBridge::new(4, None),
    )?;
    runtime.start()?;

    let result = stack.operate("ASG90001.GGIO1.AnOut1", MmsValue::Float(12.5), false)?;
    assert_eq!(result, ControlResult::Ok);
    let outcome = timeout(WAIT, outcomes.recv()).await??;
    assert_eq!(outcome.path, "ASG90001.GGIO1.AnOut1");
    assert_ne!(outcome.status, ControlStatus::Forwarded);

    runtime.stop();
    worker.shutdown().await;
    Ok(())
}
