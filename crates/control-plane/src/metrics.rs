use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;

/// Outcome label for a KV-cache restore attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RestoreOutcome {
    Success,
    NotFound,
    Error,
}

impl RestoreOutcome {
    fn as_str(self) -> &'static str {
        match self {
            RestoreOutcome::Success => "success",
            RestoreOutcome::NotFound => "not_found",
            RestoreOutcome::Error => "error",
        }
    }
}

/// Error-kind label for a failed warmup attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WarmupErrorKind {
    Template,
    Completion,
    Save,
}

impl WarmupErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            WarmupErrorKind::Template => "template_error",
            WarmupErrorKind::Completion => "completion_failed",
            WarmupErrorKind::Save => "save_failed",
        }
    }
}

#[derive(Default)]
struct Counters {
    requests: BTreeMap<(String, u16), u64>,
    requests_count: u64,
    warmup_checks: u64,
    warmup_executions: BTreeMap<String, u64>,
    warmup_errors: BTreeMap<(String, &'static str), u64>,
    warmup_duration_total: BTreeMap<String, f64>,
    warmup_duration_count: BTreeMap<String, u64>,
    kv_cache_saves: BTreeMap<String, u64>,
    kv_cache_restores: BTreeMap<(String, &'static str), u64>,
    warmup_cancellations: BTreeMap<String, u64>,
}

/// Thread-safe counter/gauge registry with a Prometheus text-format
/// export. Counters are keyed on `BTreeMap`s so exposition order is
/// stable between scrapes.
pub struct Metrics {
    started: Instant,
    started_at: DateTime<Utc>,
    counters: Mutex<Counters>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn record_request(&self, endpoint: &str, status: u16) {
        let mut counters = self.counters.lock();
        *counters
            .requests
            .entry((endpoint.to_string(), status))
            .or_insert(0) += 1;
        counters.requests_count += 1;
    }

    pub fn record_warmup_check(&self) {
        self.counters.lock().warmup_checks += 1;
    }

    pub fn record_warmup_execution(&self, prefix: &str, duration_seconds: f64) {
        let mut counters = self.counters.lock();
        *counters
            .warmup_executions
            .entry(prefix.to_string())
            .or_insert(0) += 1;
        *counters
            .warmup_duration_total
            .entry(prefix.to_string())
            .or_insert(0.0) += duration_seconds;
        *counters
            .warmup_duration_count
            .entry(prefix.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_warmup_error(&self, prefix: &str, kind: WarmupErrorKind) {
        *self
            .counters
            .lock()
            .warmup_errors
            .entry((prefix.to_string(), kind.as_str()))
            .or_insert(0) += 1;
    }

    pub fn record_kv_cache_save(&self, prefix: &str) {
        *self
            .counters
            .lock()
            .kv_cache_saves
            .entry(prefix.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_kv_cache_restore(&self, prefix: &str, outcome: RestoreOutcome) {
        *self
            .counters
            .lock()
            .kv_cache_restores
            .entry((prefix.to_string(), outcome.as_str()))
            .or_insert(0) += 1;
    }

    pub fn record_warmup_cancellation(&self, prefix: &str) {
        *self
            .counters
            .lock()
            .warmup_cancellations
            .entry(prefix.to_string())
            .or_insert(0) += 1;
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn started_at_rfc3339(&self) -> String {
        self.started_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Renders the registry in Prometheus text format. Per-prefix
    /// sections are omitted while empty.
    pub fn render(&self) -> String {
        let counters = self.counters.lock();
        let mut out = String::new();

        let _ = writeln!(
            out,
            "# HELP bioproxy_requests_total Total number of requests by endpoint and status code"
        );
        let _ = writeln!(out, "# TYPE bioproxy_requests_total counter");
        for ((endpoint, status), count) in &counters.requests {
            let _ = writeln!(
                out,
                "bioproxy_requests_total{{endpoint=\"{endpoint}\",status=\"{status}\"}} {count}"
            );
        }
        out.push('\n');

        let _ = writeln!(out, "# HELP bioproxy_requests_count Total number of all requests");
        let _ = writeln!(out, "# TYPE bioproxy_requests_count counter");
        let _ = writeln!(out, "bioproxy_requests_count {}", counters.requests_count);
        out.push('\n');

        let _ = writeln!(
            out,
            "# HELP bioproxy_uptime_seconds Time since server started in seconds"
        );
        let _ = writeln!(out, "# TYPE bioproxy_uptime_seconds gauge");
        let _ = writeln!(out, "bioproxy_uptime_seconds {:.2}", self.uptime_seconds());
        out.push('\n');

        let _ = writeln!(
            out,
            "# HELP bioproxy_warmup_checks_total Total number of warmup check cycles performed"
        );
        let _ = writeln!(out, "# TYPE bioproxy_warmup_checks_total counter");
        let _ = writeln!(out, "bioproxy_warmup_checks_total {}", counters.warmup_checks);
        out.push('\n');

        if !counters.warmup_executions.is_empty() {
            let _ = writeln!(
                out,
                "# HELP bioproxy_warmup_executions_total Number of warmup executions per template"
            );
            let _ = writeln!(out, "# TYPE bioproxy_warmup_executions_total counter");
            for (prefix, count) in &counters.warmup_executions {
                let _ = writeln!(
                    out,
                    "bioproxy_warmup_executions_total{{prefix=\"{prefix}\"}} {count}"
                );
            }
            out.push('\n');
        }

        if !counters.warmup_errors.is_empty() {
            let _ = writeln!(
                out,
                "# HELP bioproxy_warmup_errors_total Number of warmup errors by template and error type"
            );
            let _ = writeln!(out, "# TYPE bioproxy_warmup_errors_total counter");
            for ((prefix, kind), count) in &counters.warmup_errors {
                let _ = writeln!(
                    out,
                    "bioproxy_warmup_errors_total{{prefix=\"{prefix}\",type=\"{kind}\"}} {count}"
                );
            }
            out.push('\n');
        }

        if !counters.warmup_duration_total.is_empty() {
            let _ = writeln!(
                out,
                "# HELP bioproxy_warmup_duration_seconds_total Total warmup duration in seconds per template"
            );
            let _ = writeln!(out, "# TYPE bioproxy_warmup_duration_seconds_total counter");
            for (prefix, total) in &counters.warmup_duration_total {
                let _ = writeln!(
                    out,
                    "bioproxy_warmup_duration_seconds_total{{prefix=\"{prefix}\"}} {total:.2}"
                );
            }
            out.push('\n');
        }

        if !counters.warmup_duration_count.is_empty() {
            let _ = writeln!(
                out,
                "# HELP bioproxy_warmup_duration_seconds_count Number of warmup duration measurements per template"
            );
            let _ = writeln!(out, "# TYPE bioproxy_warmup_duration_seconds_count counter");
            for (prefix, count) in &counters.warmup_duration_count {
                let _ = writeln!(
                    out,
                    "bioproxy_warmup_duration_seconds_count{{prefix=\"{prefix}\"}} {count}"
                );
            }
            out.push('\n');
        }

        if !counters.kv_cache_saves.is_empty() {
            let _ = writeln!(
                out,
                "# HELP bioproxy_kv_cache_saves_total Number of successful KV cache saves per template"
            );
            let _ = writeln!(out, "# TYPE bioproxy_kv_cache_saves_total counter");
            for (prefix, count) in &counters.kv_cache_saves {
                let _ = writeln!(
                    out,
                    "bioproxy_kv_cache_saves_total{{prefix=\"{prefix}\"}} {count}"
                );
            }
            out.push('\n');
        }

        if !counters.kv_cache_restores.is_empty() {
            let _ = writeln!(
                out,
                "# HELP bioproxy_kv_cache_restores_total Number of KV cache restore attempts per template and status"
            );
            let _ = writeln!(out, "# TYPE bioproxy_kv_cache_restores_total counter");
            for ((prefix, status), count) in &counters.kv_cache_restores {
                let _ = writeln!(
                    out,
                    "bioproxy_kv_cache_restores_total{{prefix=\"{prefix}\",status=\"{status}\"}} {count}"
                );
            }
            out.push('\n');
        }

        if !counters.warmup_cancellations.is_empty() {
            let _ = writeln!(
                out,
                "# HELP bioproxy_warmup_cancellations_total Number of warmup operations cancelled due to user requests"
            );
            let _ = writeln!(out, "# TYPE bioproxy_warmup_cancellations_total counter");
            for (prefix, count) in &counters.warmup_cancellations {
                let _ = writeln!(
                    out,
                    "bioproxy_warmup_cancellations_total{{prefix=\"{prefix}\"}} {count}"
                );
            }
            out.push('\n');
        }

        out
    }

    /// Point-in-time copy of a few counters, for tests and debugging.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.lock();
        MetricsSnapshot {
            requests: counters.requests.clone(),
            requests_count: counters.requests_count,
            warmup_checks: counters.warmup_checks,
            warmup_executions: counters.warmup_executions.clone(),
            warmup_errors: counters.warmup_errors.clone(),
            kv_cache_saves: counters.kv_cache_saves.clone(),
            kv_cache_restores: counters.kv_cache_restores.clone(),
            warmup_cancellations: counters.warmup_cancellations.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MetricsSnapshot {
    pub requests: BTreeMap<(String, u16), u64>,
    pub requests_count: u64,
    pub warmup_checks: u64,
    pub warmup_executions: BTreeMap<String, u64>,
    pub warmup_errors: BTreeMap<(String, &'static str), u64>,
    pub kv_cache_saves: BTreeMap<String, u64>,
    pub kv_cache_restores: BTreeMap<(String, &'static str), u64>,
    pub warmup_cancellations: BTreeMap<String, u64>,
}
