//! ---
//! ied_section: "03-persistence-logging"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Metrics collection and export utilities."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let local_addr = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %local_addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: local_addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Bound address, with the real port when `:0` was requested.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "iedproxyd_starts_total",
            "Total number of times the proxy daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "iedproxyd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "iedproxyd_build_info",
                "Build metadata for the running daemon binary",
            ),
            &["version", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, profile])
            .set(1.0);
    }
}

/// Counters for the update, control, report and lifecycle paths.
#[derive(Clone, Debug)]
pub struct BridgeMetrics {
    registry: SharedRegistry,
    point_updates: IntCounterVec,
    control_commands: IntCounterVec,
    reports: IntCounter,
    lifecycle: IntCounterVec,
    model_paths: IntGauge,
}

impl BridgeMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let point_updates = IntCounterVec::new(
            Opts::new(
                "ied_point_updates_total",
                "Point writes received over RPC by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(point_updates.clone()))?;

        let control_commands = IntCounterVec::new(
            Opts::new(
                "ied_control_commands_total",
                "Field control operations by dispatch outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(control_commands.clone()))?;

        let reports = IntCounter::with_opts(Opts::new(
            "ied_reports_total",
            "Reports decoded and forwarded",
        ))?;
        registry.register(Box::new(reports.clone()))?;

        let lifecycle = IntCounterVec::new(
            Opts::new(
                "ied_lifecycle_operations_total",
                "Start, stop, restart, add and reset operations by outcome",
            ),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(lifecycle.clone()))?;

        let model_paths = IntGauge::with_opts(Opts::new(
            "ied_model_paths",
            "Attribute paths in the live model generation",
        ))?;
        registry.register(Box::new(model_paths.clone()))?;

        Ok(Self {
            registry,
            point_updates,
            control_commands,
            reports,
            lifecycle,
            model_paths,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_point_updates(&self, applied: usize, rejected: usize) {
        self.point_updates
            .with_label_values(&["applied"])
            .inc_by(applied as u64);
        self.point_updates
            .with_label_values(&["rejected"])
            .inc_by(rejected as u64);
    }

    pub fn record_control(&self, outcome: &str) {
        self.control_commands.with_label_values(&[outcome]).inc();
    }

    pub fn inc_reports(&self) {
        self.reports.inc();
    }

    pub fn record_lifecycle(&self, operation: &str, success: bool) {
        let outcome = if success { "ok" } else { "error" };
        self.lifecycle
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn set_model_paths(&self, count: usize) {
        self.model_paths.set(count as i64);
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn bridge_metrics_register_once_per_registry() {
        let registry = new_registry();
        let metrics = BridgeMetrics::new(registry.clone()).unwrap();
        metrics.record_point_updates(3, 1);
        metrics.record_lifecycle("restart", true);
        metrics.set_model_paths(12);
        assert!(BridgeMetrics::new(registry.clone()).is_err());

        let names: Vec<_> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_owned())
            .collect();
        assert!(names.contains(&"ied_point_updates_total".to_owned()));
        assert!(names.contains(&"ied_model_paths".to_owned()));
    }

    #[tokio::test]
    async fn exporter_serves_the_registry() {
        let registry = new_registry();
        let metrics = BridgeMetrics::new(registry.clone()).unwrap();
        metrics.inc_reports();
        let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap()).unwrap();

        let mut stream = tokio::net::TcpStream::connect(server.addr()).await.unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).await.unwrap();
        assert!(body.starts_with("HTTP/1.1 200"));
        assert!(body.contains("ied_reports_total 1"));

        server.shutdown().await.unwrap();
    }
}
