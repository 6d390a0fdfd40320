//! Reconciliation counters and duration histograms, one label set per
//! controller (§NEW "Metrics"). Registered into a `prometheus::Registry`
//! exposed by the `manager` subcommand's `/metrics` endpoint via
//! `actix-web`'s `Data<State>`, shared across all four controllers.

use std::time::Instant;

use prometheus::{HistogramVec, IntCounterVec, Registry};

#[derive(Clone)]
pub struct Metrics {
    runs: IntCounterVec,
    failures: IntCounterVec,
    duration: HistogramVec,
    snap_version: prometheus::IntGaugeVec,
    active_leases: prometheus::IntGaugeVec,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Self {
        let runs = IntCounterVec::new(
            prometheus::Opts::new("hcinfra_reconcile_runs_total", "reconciliations attempted"),
            &["controller"],
        )
        .expect("metric registration is infallible for a fixed opts/label shape");
        let failures = IntCounterVec::new(
            prometheus::Opts::new("hcinfra_reconcile_failures_total", "reconciliations that errored"),
            &["controller", "reason"],
        )
        .expect("metric registration is infallible for a fixed opts/label shape");
        let duration = HistogramVec::new(
            prometheus::HistogramOpts::new("hcinfra_reconcile_duration_seconds", "reconcile duration"),
            &["controller"],
        )
        .expect("metric registration is infallible for a fixed opts/label shape");
        let snap_version = prometheus::IntGaugeVec::new(
            prometheus::Opts::new("hcinfra_proxy_snap_version", "last published proxy snapshot version"),
            &["proxy"],
        )
        .expect("metric registration is infallible for a fixed opts/label shape");
        let active_leases = prometheus::IntGaugeVec::new(
            prometheus::Opts::new("hcinfra_dhcp_active_leases", "active DHCP leases"),
            &["dhcpserver"],
        )
        .expect("metric registration is infallible for a fixed opts/label shape");

        registry.register(Box::new(runs.clone())).ok();
        registry.register(Box::new(failures.clone())).ok();
        registry.register(Box::new(duration.clone())).ok();
        registry.register(Box::new(snap_version.clone())).ok();
        registry.register(Box::new(active_leases.clone())).ok();

        Metrics {
            runs,
            failures,
            duration,
            snap_version,
            active_leases,
        }
    }

    pub fn count_and_measure(&self, controller: &str) -> ReconcileMeasurer {
        self.runs.with_label_values(&[controller]).inc();
        ReconcileMeasurer {
            start: Instant::now(),
            controller: controller.to_owned(),
            duration: self.duration.clone(),
        }
    }

    pub fn record_failure(&self, controller: &str, reason: &str) {
        self.failures.with_label_values(&[controller, reason]).inc();
    }

    pub fn set_snap_version(&self, proxy: &str, version: u64) {
        self.snap_version.with_label_values(&[proxy]).set(version as i64);
    }

    pub fn set_active_leases(&self, dhcpserver: &str, count: i64) {
        self.active_leases.with_label_values(&[dhcpserver]).set(count);
    }
}

/// Relies on `Drop` to record the observation even on early return.
pub struct ReconcileMeasurer {
    start: Instant,
    controller: String,
    duration: HistogramVec,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed().as_secs_f64();
        self.duration.with_label_values(&[&self.controller]).observe(elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_without_panicking_and_records_observations() {
        let registry = Registry::new();
        let metrics = Metrics::new(&registry);
        {
            let _m = metrics.count_and_measure("infra");
        }
        metrics.record_failure("infra", "kube_error");
        metrics.set_snap_version("proxy1", 3);
        metrics.set_active_leases("dhcp1", 5);

        let families = registry.gather();
        assert!(!families.is_empty());
    }
}
