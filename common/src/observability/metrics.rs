//! Prometheus metrics (Rust `prometheus` crate).
//!
//! One `MetricsContext` is intended per process. The receive pipeline
//! reports into it through counter increments and histogram observations;
//! nothing in the hot path allocates or formats.

use anyhow::Result;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Configuration for the built-in Prometheus scrape endpoint.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    // ---
    /// Address to bind, e.g. `127.0.0.1:9100`.
    pub bind: SocketAddr,
}

impl MetricsServerConfig {
    // ---
    pub fn new(bind: SocketAddr) -> Self {
        // ---
        Self { bind }
    }
}

/// Prometheus metrics registry + handles for the receive pipeline.
#[derive(Clone)]
pub struct MetricsContext {
    // ---
    registry: Registry,

    // Packet counters
    pub packets_received_total: IntCounter,
    pub packets_lost_total: IntCounter,
    pub packets_late_total: IntCounter,
    pub packets_recovered_total: IntCounter,
    pub queue_overflows_total: IntCounter,

    // Session lifecycle
    pub sessions_created_total: IntCounter,
    pub sessions_destroyed_total: IntCounter,
    pub sessions_live: IntGauge,

    // Latency histograms (seconds)
    pub niq_latency_seconds: Histogram,
    pub e2e_latency_seconds: Histogram,
    pub read_duration_seconds: Histogram,
}

impl MetricsContext {
    // ---
    /// Create a new registry and register the standard metrics.
    ///
    /// `process_name` is applied as a constant label (`process=<name>`).
    pub fn new(process_name: &str) -> Result<Self> {
        // ---
        let registry = Registry::new_custom(
            Some("rtp_mix_receiver".into()),
            Some(prometheus::labels! { "process".to_string() => process_name.to_string() }),
        )?;

        let packets_received_total = IntCounter::with_opts(Opts::new(
            "packets_received_total",
            "Total packets accepted by the session router",
        ))?;
        let packets_lost_total = IntCounter::with_opts(Opts::new(
            "packets_lost_total",
            "Total packets detected as lost (gaps and unrecovered FEC holes)",
        ))?;
        let packets_late_total = IntCounter::with_opts(Opts::new(
            "packets_late_total",
            "Total packets that arrived behind the playout position",
        ))?;
        let packets_recovered_total = IntCounter::with_opts(Opts::new(
            "packets_recovered_total",
            "Total source packets reconstructed by the FEC reader",
        ))?;
        let queue_overflows_total = IntCounter::with_opts(Opts::new(
            "queue_overflows_total",
            "Total oldest-entry evictions from bounded per-session queues",
        ))?;

        let sessions_created_total = IntCounter::with_opts(Opts::new(
            "sessions_created_total",
            "Total receiver sessions created",
        ))?;
        let sessions_destroyed_total = IntCounter::with_opts(Opts::new(
            "sessions_destroyed_total",
            "Total receiver sessions destroyed",
        ))?;
        let sessions_live = IntGauge::with_opts(Opts::new(
            "sessions_live",
            "Currently live receiver sessions",
        ))?;

        let niq_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "niq_latency_seconds",
            "Network-in-queue latency per session update (seconds)",
        ))?;
        let e2e_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "e2e_latency_seconds",
            "Capture-to-consumption latency per frame (seconds)",
        ))?;
        let read_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "read_duration_seconds",
            "Wall time spent inside receiver read calls (seconds)",
        ))?;

        registry.register(Box::new(packets_received_total.clone()))?;
        registry.register(Box::new(packets_lost_total.clone()))?;
        registry.register(Box::new(packets_late_total.clone()))?;
        registry.register(Box::new(packets_recovered_total.clone()))?;
        registry.register(Box::new(queue_overflows_total.clone()))?;
        registry.register(Box::new(sessions_created_total.clone()))?;
        registry.register(Box::new(sessions_destroyed_total.clone()))?;
        registry.register(Box::new(sessions_live.clone()))?;
        registry.register(Box::new(niq_latency_seconds.clone()))?;
        registry.register(Box::new(e2e_latency_seconds.clone()))?;
        registry.register(Box::new(read_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            packets_received_total,
            packets_lost_total,
            packets_late_total,
            packets_recovered_total,
            queue_overflows_total,
            sessions_created_total,
            sessions_destroyed_total,
            sessions_live,
            niq_latency_seconds,
            e2e_latency_seconds,
            read_duration_seconds,
        })
    }

    /// Gather metric families from this registry.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        // ---
        self.registry.gather()
    }

    /// Spawns a minimal HTTP server that serves `GET /metrics`.
    ///
    /// Callers decide whether to run it; the pipeline never starts it.
    pub fn spawn_metrics_server(&self, cfg: MetricsServerConfig) -> JoinHandle<Result<()>> {
        // ---
        let registry = Arc::new(self.registry.clone());
        tokio::spawn(async move {
            // ---
            let make_svc = make_service_fn(move |_conn| {
                let registry = Arc::clone(&registry);
                async move {
                    Ok::<_, hyper::Error>(service_fn(move |req| {
                        let registry = Arc::clone(&registry);
                        async move { handle_metrics_request(req, registry).await }
                    }))
                }
            });

            let server = Server::bind(&cfg.bind).serve(make_svc);
            server.await.map_err(|e| anyhow::anyhow!(e))?;
            Ok(())
        })
    }
}

async fn handle_metrics_request(
    req: Request<Body>,
    registry: Arc<Registry>,
) -> Result<Response<Body>, hyper::Error> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let encoder = TextEncoder::new();
            let metric_families = registry.gather();
            let mut buffer = Vec::new();

            if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
                let mut resp = Response::new(Body::from(format!("encode error: {e}")));
                *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                return Ok(resp);
            }

            let mut resp = Response::new(Body::from(buffer));
            resp.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            Ok(resp)
        }
        _ => {
            let mut resp = Response::new(Body::from("not found"));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            Ok(resp)
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn metrics_context_gathers_something() {
        // ---
        let ctx = MetricsContext::new("test").expect("MetricsContext should init");
        let families = ctx.gather();
        assert!(!families.is_empty());
    }

    #[test]
    fn counters_accumulate() {
        // ---
        let ctx = MetricsContext::new("test").expect("MetricsContext should init");
        ctx.packets_received_total.inc_by(3);
        ctx.sessions_live.set(2);

        assert_eq!(ctx.packets_received_total.get(), 3);
        assert_eq!(ctx.sessions_live.get(), 2);
    }
}
