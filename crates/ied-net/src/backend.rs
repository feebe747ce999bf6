//! ---
//! ied_section: "05-networking-external-interfaces"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Outbound gRPC client delivering field control commands."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use ied_core::Backend;
use indexmap::IndexMap;
use serde_json::Value;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::proto::ancillary_outputs_client::AncillaryOutputsClient;
use crate::proto::PointValues;

/// Backend reached over the `AncillaryOutputs` service.
#[derive(Clone, Debug)]
pub struct GrpcBackend {
    client: AncillaryOutputsClient<Channel>,
}

impl GrpcBackend {
    /// Client for `endpoint`, e.g. `http://127.0.0.1:61851`. The connection
    /// is established on first use; must be called inside a tokio runtime.
    pub fn connect_lazy(endpoint: &str) -> Result<Self> {
        let channel = Endpoint::from_shared(endpoint.to_owned())
            .with_context(|| format!("invalid backend endpoint {endpoint}"))?
            .connect_lazy();
        Ok(Self {
            client: AncillaryOutputsClient::new(channel),
        })
    }
}

#[async_trait]
impl Backend for GrpcBackend {
    async fn update_point_values(&self, values: IndexMap<String, Value>) -> Result<()> {
        let values = values
            .into_iter()
            .map(|(path, value)| (path, value.to_string()))
            .collect();
        let response = self
            .client
            .clone()
            .update_point_values(PointValues { values })
            .await
            .context("backend UpdatePointValues call failed")?
            .into_inner();
        if !response.success {
            bail!("backend refused update: {}", response.message);
        }
        debug!("backend acknowledged update");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::ancillary_outputs_server::{AncillaryOutputs, AncillaryOutputsServer};
    use crate::proto::Response as Ack;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tonic::transport::server::TcpIncoming;
    use tonic::transport::Server;
    use tonic::{Request, Response, Status};

    #[derive(Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<PointValues>>>,
    }

    #[tonic::async_trait]
    impl AncillaryOutputs for Recorder {
        async fn update_point_values(
            &self,
            request: Request<PointValues>,
        ) -> Result<Response<Ack>, Status> {
            let request = request.into_inner();
            let success = !request.values.contains_key("REFUSE.ME.NOW");
            self.seen.lock().push(request);
            Ok(Response::new(Ack {
                success,
                message: String::new(),
            }))
        }
    }

    #[tokio::test]
    async fn values_are_sent_as_json_strings() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let incoming = TcpIncoming::from_listener(listener, true, None).unwrap();
        let recorder = Recorder::default();
        let seen = recorder.seen.clone();
        let server = tokio::spawn(
            Server::builder()
                .add_service(AncillaryOutputsServer::new(recorder))
                .serve_with_incoming(incoming),
        );

        let backend = GrpcBackend::connect_lazy(&format!("http://{addr}")).unwrap();
        let mut values = IndexMap::new();
        values.insert("CTRL.GGIO1.SPCSO1".to_owned(), Value::Bool(true));
        backend.update_point_values(values).await.unwrap();

        let mut refused = IndexMap::new();
        refused.insert("REFUSE.ME.NOW".to_owned(), serde_json::json!(1));
        assert!(backend.update_point_values(refused).await.is_err());

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[0].values.get("CTRL.GGIO1.SPCSO1").map(String::as_str),
            Some("true")
        );
        server.abort();
    }

    #[test]
    fn malformed_endpoints_are_rejected() {
        assert!(GrpcBackend::connect_lazy("not a uri").is_err());
    }
}
