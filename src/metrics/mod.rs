//! Prometheus metrics for the monitor engine
//!
//! Exposes metrics via HTTP endpoint for Prometheus scraping.

use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};
use std::sync::OnceLock;

/// Global metrics registry
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get the global metrics instance
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// Monitor metrics collection
pub struct Metrics {
    /// Registry for all metrics
    pub registry: Registry,

    /// Completed ticks per monitor
    pub ticks_total: IntCounterVec,
    /// Probe outcomes by result
    pub probes_total: IntCounterVec,
    /// Detected state transitions by event
    pub state_changes_total: IntCounterVec,
    /// Reaction script runs by outcome
    pub scripts_total: IntCounterVec,
    /// Journal persistence attempts by result
    pub journal_writes_total: IntCounterVec,
    /// Running servers per monitor
    pub servers_running: IntGaugeVec,
}

impl Metrics {
    /// Create a new metrics collection
    pub fn new() -> Self {
        let registry = Registry::new();

        let ticks_total = IntCounterVec::new(
            Opts::new("argus_ticks_total", "Total number of completed monitor ticks"),
            &["monitor"],
        )
        .unwrap();

        let probes_total = IntCounterVec::new(
            Opts::new("argus_probes_total", "Total number of backend probes by result"),
            &["monitor", "result"], // existing_ok, new_ok, refused, timeout
        )
        .unwrap();

        let state_changes_total = IntCounterVec::new(
            Opts::new(
                "argus_state_changes_total",
                "Total number of detected server state transitions",
            ),
            &["monitor", "event"],
        )
        .unwrap();

        let scripts_total = IntCounterVec::new(
            Opts::new(
                "argus_scripts_total",
                "Total number of reaction script executions by outcome",
            ),
            &["monitor", "outcome"], // ok, exit_error, timeout, spawn_error
        )
        .unwrap();

        let journal_writes_total = IntCounterVec::new(
            Opts::new(
                "argus_journal_writes_total",
                "Total number of journal persistence attempts by result",
            ),
            &["monitor", "result"], // written, unchanged, error
        )
        .unwrap();

        let servers_running = IntGaugeVec::new(
            Opts::new("argus_servers_running", "Whether a monitored server is running"),
            &["monitor", "server"],
        )
        .unwrap();

        registry.register(Box::new(ticks_total.clone())).unwrap();
        registry.register(Box::new(probes_total.clone())).unwrap();
        registry
            .register(Box::new(state_changes_total.clone()))
            .unwrap();
        registry.register(Box::new(scripts_total.clone())).unwrap();
        registry
            .register(Box::new(journal_writes_total.clone()))
            .unwrap();
        registry
            .register(Box::new(servers_running.clone()))
            .unwrap();

        Self {
            registry,
            ticks_total,
            probes_total,
            state_changes_total,
            scripts_total,
            journal_writes_total,
            servers_running,
        }
    }

    /// Encode all metrics in Prometheus text format
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serve `/metrics` and `/health` over plain HTTP/1.
pub async fn start_metrics_server(addr: &str) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;
    use tracing::{error, info};

    async fn handle_request(
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        match req.uri().path() {
            "/metrics" => {
                let body = metrics().gather();
                Ok(Response::builder()
                    .status(StatusCode::OK)
                    .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                    .body(Full::new(Bytes::from(body)))
                    .unwrap())
            }
            "/health" => Ok(Response::builder()
                .status(StatusCode::OK)
                .body(Full::new(Bytes::from("OK")))
                .unwrap()),
            _ => Ok(Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::from("Not Found")))
                .unwrap()),
        }
    }

    let addr: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Metrics server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!(error = %e, "Metrics server connection error");
            }
        });
    }
}
