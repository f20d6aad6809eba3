//! Prometheus metrics exposition
//!
//! - `fortum_energy_consumption_total` (gauge): energy over the served window
//! - `fortum_cost_total` (gauge): cost over the served window
//! - `fortum_data_available` (gauge): 1 after a successful update, 0 after a failure
//! - `fortum_updates_total` (counter): label `outcome`
//!
//! `fortum_range_narrowed_total` and `fortum_auth_renewals_total` are
//! emitted by the library crates and rendered through the same recorder.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Record a successful update with the derived totals.
pub fn record_update(energy_total: f64, cost_total: f64) {
    metrics::gauge!("fortum_energy_consumption_total").set(energy_total);
    metrics::gauge!("fortum_cost_total").set(cost_total);
    metrics::gauge!("fortum_data_available").set(1.0);
    metrics::counter!("fortum_updates_total", "outcome" => "success").increment(1);
}

/// Record a failed update. Totals keep their last value.
pub fn record_update_failure() {
    metrics::gauge!("fortum_data_available").set(0.0);
    metrics::counter!("fortum_updates_total", "outcome" => "failure").increment(1);
}
