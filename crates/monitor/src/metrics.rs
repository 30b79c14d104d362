//! # Metrics
//!
//! Counter dan gauge atomic untuk seluruh pipeline monitor, dirender dalam
//! Prometheus exposition format oleh [`MonitorMetrics::to_prometheus`].
//!
//! ## Prinsip
//!
//! - Semua metrics thread-safe (atomic operations)
//! - Satu instance `MonitorMetrics` dibagi lewat `Arc` ke semua komponen
//! - Crate ini tidak meng-expose metrics lewat HTTP; itu tugas layer luar
//!
//! ## Metrics
//!
//! - `spectre_monitor_blue_score_polls_total{result}`: Poll blue score node
//! - `spectre_monitor_node_blue_score`: Blue score node terakhir
//! - `spectre_monitor_health_checks_total{verdict}`: Hasil health evaluation
//! - `spectre_monitor_db_lag`: Selisih blue score node vs mirror terakhir
//! - `spectre_monitor_hashrate_scans_total`: Siklus tracker yang selesai
//! - `spectre_monitor_hashrate_records_total`: Record max hashrate diganti
//! - `spectre_monitor_price_upstream_calls_total`: Request ke price feed
//! - `spectre_monitor_price_rate_limited_total`: Response 429 dari price feed
//! - `spectre_monitor_price_stale_serves_total`: Cache stale yang dikembalikan

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::health::Verdict;

// ════════════════════════════════════════════════════════════════════════════
// COUNTER
// ════════════════════════════════════════════════════════════════════════════

/// Thread-safe counter menggunakan atomic operations.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Membuat counter baru dengan nilai 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment counter by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::SeqCst);
    }

    /// Get current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// GAUGE
// ════════════════════════════════════════════════════════════════════════════

/// Thread-safe gauge untuk nilai yang bisa naik turun.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    /// Membuat gauge baru dengan nilai 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set gauge value.
    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::SeqCst);
    }

    /// Get current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MONITOR METRICS
// ════════════════════════════════════════════════════════════════════════════

/// Metrics untuk seluruh monitor.
#[derive(Debug, Default)]
pub struct MonitorMetrics {
    /// Poll blue score yang berhasil.
    pub blue_score_polls_ok: Counter,
    /// Poll blue score yang gagal.
    pub blue_score_polls_failed: Counter,
    /// Blue score node terakhir yang diketahui.
    pub node_blue_score: Gauge,
    /// Health check dengan verdict healthy.
    pub health_healthy: Counter,
    /// Health check dengan verdict degraded.
    pub health_degraded: Counter,
    /// Health check dengan verdict unavailable.
    pub health_unavailable: Counter,
    /// Selisih blue score node vs mirror pada check terakhir.
    pub db_lag: Gauge,
    /// Siklus tracker yang selesai tanpa error.
    pub hashrate_scans: Counter,
    /// Record max hashrate yang diganti.
    pub hashrate_records: Counter,
    /// Request ke price feed.
    pub price_upstream_calls: Counter,
    /// Response rate-limited dari price feed.
    pub price_rate_limited: Counter,
    /// Snapshot stale yang dikembalikan ke caller.
    pub price_stale_serves: Counter,
}

impl MonitorMetrics {
    /// Membuat metrics baru, semua nilai 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catat hasil health evaluation.
    pub fn record_verdict(&self, verdict: Verdict) {
        match verdict {
            Verdict::Healthy => self.health_healthy.inc(),
            Verdict::Degraded => self.health_degraded.inc(),
            Verdict::Unavailable => self.health_unavailable.inc(),
        }
    }

    /// Export dalam Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        let _ = writeln!(output, "# HELP spectre_monitor_blue_score_polls_total Node blue score polls by result");
        let _ = writeln!(output, "# TYPE spectre_monitor_blue_score_polls_total counter");
        let _ = writeln!(output, "spectre_monitor_blue_score_polls_total{{result=\"ok\"}} {}", self.blue_score_polls_ok.get());
        let _ = writeln!(output, "spectre_monitor_blue_score_polls_total{{result=\"error\"}} {}", self.blue_score_polls_failed.get());
        let _ = writeln!(output);

        let _ = writeln!(output, "# HELP spectre_monitor_node_blue_score Last known node blue score");
        let _ = writeln!(output, "# TYPE spectre_monitor_node_blue_score gauge");
        let _ = writeln!(output, "spectre_monitor_node_blue_score {}", self.node_blue_score.get());
        let _ = writeln!(output);

        let _ = writeln!(output, "# HELP spectre_monitor_health_checks_total Health evaluations by verdict");
        let _ = writeln!(output, "# TYPE spectre_monitor_health_checks_total counter");
        let _ = writeln!(output, "spectre_monitor_health_checks_total{{verdict=\"healthy\"}} {}", self.health_healthy.get());
        let _ = writeln!(output, "spectre_monitor_health_checks_total{{verdict=\"degraded\"}} {}", self.health_degraded.get());
        let _ = writeln!(output, "spectre_monitor_health_checks_total{{verdict=\"unavailable\"}} {}", self.health_unavailable.get());
        let _ = writeln!(output);

        let _ = writeln!(output, "# HELP spectre_monitor_db_lag Blue score difference between node and mirror");
        let _ = writeln!(output, "# TYPE spectre_monitor_db_lag gauge");
        let _ = writeln!(output, "spectre_monitor_db_lag {}", self.db_lag.get());
        let _ = writeln!(output);

        let _ = writeln!(output, "# HELP spectre_monitor_hashrate_scans_total Completed max hashrate scans");
        let _ = writeln!(output, "# TYPE spectre_monitor_hashrate_scans_total counter");
        let _ = writeln!(output, "spectre_monitor_hashrate_scans_total {}", self.hashrate_scans.get());
        let _ = writeln!(output);

        let _ = writeln!(output, "# HELP spectre_monitor_hashrate_records_total Max hashrate record replacements");
        let _ = writeln!(output, "# TYPE spectre_monitor_hashrate_records_total counter");
        let _ = writeln!(output, "spectre_monitor_hashrate_records_total {}", self.hashrate_records.get());
        let _ = writeln!(output);

        let _ = writeln!(output, "# HELP spectre_monitor_price_upstream_calls_total Requests sent to the price feed");
        let _ = writeln!(output, "# TYPE spectre_monitor_price_upstream_calls_total counter");
        let _ = writeln!(output, "spectre_monitor_price_upstream_calls_total {}", self.price_upstream_calls.get());
        let _ = writeln!(output);

        let _ = writeln!(output, "# HELP spectre_monitor_price_rate_limited_total Rate-limited price feed responses");
        let _ = writeln!(output, "# TYPE spectre_monitor_price_rate_limited_total counter");
        let _ = writeln!(output, "spectre_monitor_price_rate_limited_total {}", self.price_rate_limited.get());
        let _ = writeln!(output);

        let _ = writeln!(output, "# HELP spectre_monitor_price_stale_serves_total Stale price snapshots served");
        let _ = writeln!(output, "# TYPE spectre_monitor_price_stale_serves_total counter");
        let _ = writeln!(output, "spectre_monitor_price_stale_serves_total {}", self.price_stale_serves.get());

        output
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_and_gauge() {
        let c = Counter::new();
        c.inc();
        c.inc();
        assert_eq!(c.get(), 2);

        let g = Gauge::new();
        g.set(500);
        g.set(7);
        assert_eq!(g.get(), 7);
    }

    #[test]
    fn test_record_verdict() {
        let m = MonitorMetrics::new();
        m.record_verdict(Verdict::Healthy);
        m.record_verdict(Verdict::Degraded);
        m.record_verdict(Verdict::Degraded);
        assert_eq!(m.health_healthy.get(), 1);
        assert_eq!(m.health_degraded.get(), 2);
        assert_eq!(m.health_unavailable.get(), 0);
    }

    #[test]
    fn test_prometheus_format() {
        let m = MonitorMetrics::new();
        m.blue_score_polls_ok.inc();
        m.node_blue_score.set(101_065_625);
        m.price_rate_limited.inc();

        let out = m.to_prometheus();
        assert!(out.contains("# TYPE spectre_monitor_blue_score_polls_total counter"));
        assert!(out.contains("spectre_monitor_blue_score_polls_total{result=\"ok\"} 1"));
        assert!(out.contains("spectre_monitor_node_blue_score 101065625"));
        assert!(out.contains("spectre_monitor_price_rate_limited_total 1"));
        assert!(out.contains("spectre_monitor_health_checks_total{verdict=\"unavailable\"} 0"));
    }
}
