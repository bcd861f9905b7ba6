//! rolesync Telemetry
//!
//! Structured logging setup, the Prometheus metrics sink and the `/metrics`
//! exposition handler.

pub mod metrics;
pub mod tracer;

pub use metrics::{metrics_handler, DaemonMetrics, ProcFsProbe, PrometheusSink, METRICS};
pub use tracer::init_tracing;
