//! Prometheus metrics.
//!
//! - [`PrometheusSink`]: the engine's metrics sink. Each distinct
//!   `(series, metric tag, field)` becomes one gauge family whose labels are
//!   the sample's remaining tag keys. Per-guild label sets that a pass no
//!   longer reports are removed.
//! - [`DaemonMetrics`]: counters for the HTTP and gateway paths.
//! - [`metrics_handler`]: text exposition of the default registry.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use rolesync_core::{GuildId, MetricSample, MetricsError, MetricsSink, GUILD_TAG};
use rolesync_engine::{ProcessProbe, ProcessStats};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{ApiError, ApiResult};

const NAMESPACE: &str = "rolesync";

/// Global daemon counters - initialized once at startup
pub static METRICS: Lazy<ApiResult<DaemonMetrics>> = Lazy::new(DaemonMetrics::new);

// ============================================================================
// DAEMON COUNTERS
// ============================================================================

#[derive(Clone)]
pub struct DaemonMetrics {
    /// Platform events posted by the gateway bridge - labels: event
    pub events_ingested_total: IntCounterVec,

    /// Refresh submissions - labels: kind (one/all), status (accepted/rejected)
    pub refresh_requests_total: IntCounterVec,

    /// Gateway commands forwarded - labels: status (sent/failed/dropped)
    pub gateway_commands_total: IntCounterVec,
}

impl DaemonMetrics {
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            events_ingested_total: register_int_counter_vec!(
                "rolesync_events_ingested_total",
                "Platform events received from the gateway bridge",
                &["event"]
            )
            .map_err(|e| {
                ApiError::internal_error(format!("Failed to register events_ingested_total: {}", e))
            })?,

            refresh_requests_total: register_int_counter_vec!(
                "rolesync_refresh_requests_total",
                "Refresh requests received over HTTP",
                &["kind", "status"]
            )
            .map_err(|e| {
                ApiError::internal_error(format!(
                    "Failed to register refresh_requests_total: {}",
                    e
                ))
            })?,

            gateway_commands_total: register_int_counter_vec!(
                "rolesync_gateway_commands_total",
                "Gateway commands handed to the bridge",
                &["status"]
            )
            .map_err(|e| {
                ApiError::internal_error(format!(
                    "Failed to register gateway_commands_total: {}",
                    e
                ))
            })?,
        })
    }

    pub fn record_event(&self, event: &str) {
        self.events_ingested_total.with_label_values(&[event]).inc();
    }

    pub fn record_refresh(&self, kind: &str, accepted: bool) {
        let status = if accepted { "accepted" } else { "rejected" };
        self.refresh_requests_total
            .with_label_values(&[kind, status])
            .inc();
    }

    pub fn record_gateway_command(&self, status: &str) {
        self.gateway_commands_total.with_label_values(&[status]).inc();
    }
}

/// Run `f` against the global counters when they registered.
pub fn with_metrics(f: impl FnOnce(&DaemonMetrics)) {
    if let Ok(metrics) = METRICS.as_ref() {
        f(metrics);
    }
}

// ============================================================================
// PROMETHEUS SINK
// ============================================================================

struct Family {
    gauge: GaugeVec,
    labels: Vec<String>,
    /// Label values currently exported.
    exported: HashSet<Vec<String>>,
}

/// One exported gauge: family name plus label values.
type LabelSet = (String, Vec<String>);

/// Label sets of one `(series, guild)` scope.
#[derive(Default)]
struct Pass {
    /// Exported and not yet swept.
    live: HashSet<LabelSet>,
    /// Recorded since the last sweep.
    seen: HashSet<LabelSet>,
}

#[derive(Default)]
struct State {
    families: HashMap<String, Family>,
    passes: HashMap<(String, String), Pass>,
}

impl State {
    fn remove(&mut self, (name, values): &LabelSet) {
        let Some(family) = self.families.get_mut(name) else {
            return;
        };
        if !family.exported.remove(values) {
            return;
        }
        if let Err(e) = family.gauge.remove_label_values(values) {
            tracing::debug!(metric = %name, error = %e, "Gauge already gone");
        }
    }
}

/// [`MetricsSink`] that keeps the latest value of every sample as a gauge.
///
/// Per-guild samples are tracked by their `guild_id` tag so that a label set
/// the guild stops reporting (a game nobody plays any more, a status nobody
/// holds) is removed at the end of the next pass instead of exporting its
/// last value forever.
pub struct PrometheusSink {
    registry: Registry,
    state: Mutex<State>,
}

impl PrometheusSink {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            state: Mutex::new(State::default()),
        }
    }

    /// Sink over the process-wide default registry served by `/metrics`.
    pub fn global() -> Self {
        Self::new(prometheus::default_registry().clone())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Value of one gauge, if it exists.
    pub fn value(&self, name: &str, label_values: &[&str]) -> Option<f64> {
        let state = self.state();
        let family = state.families.get(name)?;
        let key: Vec<String> = label_values.iter().map(|v| v.to_string()).collect();
        // Looking up an unexported label set would create it.
        if !family.exported.contains(&key) {
            return None;
        }
        family
            .gauge
            .get_metric_with_label_values(label_values)
            .ok()
            .map(|g| g.get())
    }

    fn family_name(series: &str, metric: Option<&str>, field: &str) -> String {
        let raw = match metric {
            Some(metric) if metric != series => {
                format!("{}_{}_{}_{}", NAMESPACE, series, metric, field)
            }
            _ => format!("{}_{}_{}", NAMESPACE, series, field),
        };
        sanitize(&raw)
    }

    fn register(&self, name: &str, labels: &[String]) -> Result<GaugeVec, MetricsError> {
        let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
        let gauge = GaugeVec::new(Opts::new(name, name), &label_refs).map_err(|e| {
            MetricsError::Registration {
                name: name.to_string(),
                reason: e.to_string(),
            }
        })?;
        self.registry
            .register(Box::new(gauge.clone()))
            .map_err(|e| MetricsError::Registration {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(gauge)
    }
}

impl std::fmt::Debug for PrometheusSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("PrometheusSink")
            .field("families", &state.families.len())
            .field("passes", &state.passes.len())
            .finish()
    }
}

impl MetricsSink for PrometheusSink {
    fn record(&self, sample: &MetricSample) -> Result<(), MetricsError> {
        let metric = sample.tag_value("metric");
        let labels: Vec<String> = sample
            .tags
            .keys()
            .filter(|k| k.as_str() != "metric")
            .map(|k| sanitize(k))
            .collect();
        let values: Vec<&str> = sample
            .tags
            .iter()
            .filter(|(k, _)| k.as_str() != "metric")
            .map(|(_, v)| v.as_str())
            .collect();
        let scope = sample
            .tag_value(GUILD_TAG)
            .map(|guild| (sample.series.clone(), guild.to_string()));

        let mut state = self.state();
        for (field, value) in &sample.fields {
            let name = Self::family_name(&sample.series, metric, field);

            if !state.families.contains_key(&name) {
                let gauge = self.register(&name, &labels)?;
                state.families.insert(
                    name.clone(),
                    Family {
                        gauge,
                        labels: labels.clone(),
                        exported: HashSet::new(),
                    },
                );
            }
            let Some(family) = state.families.get_mut(&name) else {
                continue;
            };
            if family.labels != labels {
                return Err(MetricsError::LabelMismatch {
                    name,
                    reason: format!("expected {:?}, got {:?}", family.labels, labels),
                });
            }

            let gauge = family
                .gauge
                .get_metric_with_label_values(&values)
                .map_err(|e| MetricsError::LabelMismatch {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            gauge.set(*value);
            let owned: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            family.exported.insert(owned.clone());

            if let Some(scope) = &scope {
                let key = (name, owned);
                let pass = state.passes.entry(scope.clone()).or_default();
                pass.live.insert(key.clone());
                pass.seen.insert(key);
            }
        }
        Ok(())
    }

    fn end_pass(&self, series: &str, guild: &GuildId) {
        let mut state = self.state();
        let Some(pass) = state
            .passes
            .get_mut(&(series.to_string(), guild.to_string()))
        else {
            return;
        };
        let seen = std::mem::take(&mut pass.seen);
        let stale: Vec<LabelSet> = pass.live.difference(&seen).cloned().collect();
        pass.live = seen;
        for key in &stale {
            state.remove(key);
        }
        if !stale.is_empty() {
            tracing::debug!(
                guild_id = %guild,
                series = %series,
                removed = stale.len(),
                "Removed gauges not reported this pass"
            );
        }
    }

    fn retire(&self, series: &str, guild: &GuildId) {
        let mut state = self.state();
        let Some(pass) = state.passes.remove(&(series.to_string(), guild.to_string())) else {
            return;
        };
        for key in pass.live.union(&pass.seen) {
            state.remove(key);
        }
        tracing::debug!(guild_id = %guild, series = %series, "Retired guild gauges");
    }
}

/// Prometheus names allow `[a-zA-Z0-9_:]` only.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

// ============================================================================
// PROCESS PROBE
// ============================================================================

/// Reads process counters from `/proc/self`. Yields `None` off Linux.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcFsProbe;

impl ProcFsProbe {
    fn status_kb(status: &str, key: &str) -> Option<f64> {
        status
            .lines()
            .find_map(|line| line.strip_prefix(key))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|v| v.parse::<f64>().ok())
    }
}

impl ProcessProbe for ProcFsProbe {
    fn sample(&self) -> Option<ProcessStats> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        let open_fds = std::fs::read_dir("/proc/self/fd")
            .map(|dir| dir.count() as f64)
            .unwrap_or(0.0);

        Some(ProcessStats {
            resident_memory_bytes: Self::status_kb(&status, "VmRSS:").unwrap_or(0.0) * 1024.0,
            virtual_memory_bytes: Self::status_kb(&status, "VmSize:").unwrap_or(0.0) * 1024.0,
            open_fds,
            threads: Self::status_kb(&status, "Threads:").unwrap_or(0.0),
        })
    }
}

// ============================================================================
// HANDLER
// ============================================================================

/// GET /metrics
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rolesync_core::metrics::{field, tag};
    use rolesync_core::GUILD_SERIES;

    fn role_sample(role: &str, count: f64) -> MetricSample {
        MetricSample::new(GUILD_SERIES)
            .tag("metric", tag::ROLE)
            .tag("server", "Heroes Awaken")
            .tag("role", role)
            .field(field::TOTAL_MEMBERS, count)
    }

    #[test]
    fn test_metrics_creation() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        metrics.record_event("member_add");
        metrics.record_refresh("one", true);
        metrics.record_gateway_command("dropped");
        assert!(
            metrics
                .refresh_requests_total
                .with_label_values(&["one", "accepted"])
                .get()
                >= 1
        );
        Ok(())
    }

    #[test]
    fn test_sink_keeps_latest_value_per_label_set() -> Result<(), MetricsError> {
        let sink = PrometheusSink::new(Registry::new());
        sink.record(&role_sample("Testers", 2.0))?;
        sink.record(&role_sample("Staff", 1.0))?;
        sink.record(&role_sample("Testers", 5.0))?;

        let name = "rolesync_discord_metrics_role_members_total_members";
        assert_eq!(sink.value(name, &["Testers", "Heroes Awaken"]), Some(5.0));
        assert_eq!(sink.value(name, &["Staff", "Heroes Awaken"]), Some(1.0));
        assert_eq!(sink.registry().gather().len(), 1);
        Ok(())
    }

    #[test]
    fn test_sink_rejects_conflicting_labels() -> Result<(), MetricsError> {
        let sink = PrometheusSink::new(Registry::new());
        sink.record(&role_sample("Testers", 2.0))?;

        let odd = MetricSample::new(GUILD_SERIES)
            .tag("metric", tag::ROLE)
            .tag("server", "Heroes Awaken")
            .field(field::TOTAL_MEMBERS, 1.0);
        assert!(matches!(
            sink.record(&odd),
            Err(MetricsError::LabelMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_sink_one_family_per_field() -> Result<(), MetricsError> {
        let sink = PrometheusSink::new(Registry::new());
        let sample = MetricSample::new(GUILD_SERIES)
            .tag("metric", tag::TOTAL)
            .tag("server", "Heroes Awaken")
            .field(field::TOTAL_MEMBERS, 10.0)
            .field(field::ONLINE_MEMBERS, 4.0);
        sink.record(&sample)?;

        assert_eq!(sink.registry().gather().len(), 2);
        assert_eq!(
            sink.value(
                "rolesync_discord_metrics_total_members_online_members",
                &["Heroes Awaken"]
            ),
            Some(4.0)
        );
        Ok(())
    }

    fn status_sample(status: &str, count: f64) -> MetricSample {
        MetricSample::new(GUILD_SERIES)
            .tag("metric", tag::STATUS)
            .tag("server", "Heroes Awaken")
            .tag(GUILD_TAG, "g1")
            .tag("status", status)
            .field(field::MEMBERS, count)
    }

    fn game_sample(game: &str, count: f64) -> MetricSample {
        MetricSample::new(GUILD_SERIES)
            .tag("metric", tag::GAME)
            .tag("server", "Heroes Awaken")
            .tag(GUILD_TAG, "g1")
            .tag("game", game)
            .field(field::MEMBERS, count)
    }

    const STATUS: &str = "rolesync_discord_metrics_status_members_members";
    const GAME: &str = "rolesync_discord_metrics_game_members_members";

    #[test]
    fn test_end_pass_drops_label_sets_not_reported_again() -> Result<(), MetricsError> {
        let sink = PrometheusSink::new(Registry::new());
        let guild = GuildId::from("g1");

        sink.record(&status_sample("online", 3.0))?;
        sink.record(&game_sample("Heroes", 2.0))?;
        sink.end_pass(GUILD_SERIES, &guild);
        assert_eq!(sink.value(STATUS, &["g1", "Heroes Awaken", "online"]), Some(3.0));
        assert_eq!(sink.value(GAME, &["Heroes", "g1", "Heroes Awaken"]), Some(2.0));

        // Everyone went offline.
        sink.record(&status_sample("offline", 3.0))?;
        sink.end_pass(GUILD_SERIES, &guild);

        assert_eq!(sink.value(STATUS, &["g1", "Heroes Awaken", "offline"]), Some(3.0));
        assert_eq!(sink.value(STATUS, &["g1", "Heroes Awaken", "online"]), None);
        assert_eq!(sink.value(GAME, &["Heroes", "g1", "Heroes Awaken"]), None);

        let exposition = sink.registry().gather();
        let game_series: usize = exposition
            .iter()
            .filter(|mf| mf.get_name() == GAME)
            .map(|mf| mf.get_metric().len())
            .sum();
        assert_eq!(game_series, 0);
        Ok(())
    }

    #[test]
    fn test_end_pass_leaves_other_guilds_alone() -> Result<(), MetricsError> {
        let sink = PrometheusSink::new(Registry::new());
        let other = status_sample("online", 7.0).tag(GUILD_TAG, "g2");

        sink.record(&status_sample("online", 3.0))?;
        sink.record(&other)?;
        sink.end_pass(GUILD_SERIES, &GuildId::from("g1"));
        sink.end_pass(GUILD_SERIES, &GuildId::from("g1"));

        assert_eq!(sink.value(STATUS, &["g1", "Heroes Awaken", "online"]), None);
        assert_eq!(sink.value(STATUS, &["g2", "Heroes Awaken", "online"]), Some(7.0));
        Ok(())
    }

    #[test]
    fn test_retire_removes_every_guild_gauge() -> Result<(), MetricsError> {
        let sink = PrometheusSink::new(Registry::new());
        sink.record(&status_sample("idle", 1.0))?;
        sink.record(&game_sample("Heroes", 1.0))?;
        sink.record(&role_sample("Testers", 4.0))?;

        sink.retire(GUILD_SERIES, &GuildId::from("g1"));

        assert_eq!(sink.value(STATUS, &["g1", "Heroes Awaken", "idle"]), None);
        assert_eq!(sink.value(GAME, &["Heroes", "g1", "Heroes Awaken"]), None);
        // Samples without a guild tag are not scoped to a pass.
        assert_eq!(
            sink.value(
                "rolesync_discord_metrics_role_members_total_members",
                &["Testers", "Heroes Awaken"]
            ),
            Some(4.0)
        );
        Ok(())
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("discord-metrics.v2"), "discord_metrics_v2");
    }

    proptest::proptest! {
        #[test]
        fn prop_sanitized_names_are_valid(raw in ".{0,40}") {
            let name = sanitize(&raw);
            proptest::prop_assert_eq!(name.chars().count(), raw.chars().count());
            proptest::prop_assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        }
    }

    #[test]
    fn test_status_parsing() {
        let status = "Name:\trolesync\nVmSize:\t  2048 kB\nVmRSS:\t  512 kB\nThreads:\t9\n";
        assert_eq!(ProcFsProbe::status_kb(status, "VmRSS:"), Some(512.0));
        assert_eq!(ProcFsProbe::status_kb(status, "Threads:"), Some(9.0));
        assert_eq!(ProcFsProbe::status_kb(status, "VmSwap:"), None);
    }

    #[tokio::test]
    async fn test_metrics_handler_serves_text() {
        let response = metrics_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
