//! Fixed-interval consumption polling
//!
//! Each update fetches total consumption for every metering point and
//! derives two figures: energy total and cost total over the served window.
//! The latest outcome is kept in a shared `PollStatus` read by `/health`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fortum_api::{DataClient, totals};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Error as ServiceError;
use crate::metrics;

/// Derived figures of one successful update.
#[derive(Debug, Clone, Serialize)]
pub struct Readings {
    pub energy_total: f64,
    pub cost_total: f64,
    pub unit: String,
    pub records: usize,
    pub served_from: DateTime<Utc>,
    pub served_to: DateTime<Utc>,
    /// The backend served a shorter window than requested
    pub narrowed: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct PollStatus {
    pub last_readings: Option<Readings>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl PollStatus {
    /// The most recent update succeeded.
    pub fn is_healthy(&self) -> bool {
        self.last_readings.is_some() && self.last_error.is_none()
    }
}

pub type SharedStatus = Arc<RwLock<PollStatus>>;

/// Fetch total consumption once and derive the readings.
pub async fn poll_once(client: &DataClient) -> fortum_api::Result<Readings> {
    let served = client.total_consumption().await?;
    let (energy_total, cost_total) = totals(&served.data);
    let unit = served
        .data
        .first()
        .map(|r| r.unit.clone())
        .unwrap_or_else(|| String::from("kWh"));

    Ok(Readings {
        energy_total,
        cost_total,
        unit,
        records: served.data.len(),
        served_from: served.served.from,
        served_to: served.served.to,
        narrowed: served.is_narrowed(),
        updated_at: Utc::now(),
    })
}

/// Run one update and record its outcome in `status` and the metrics.
pub async fn update(client: &DataClient, status: &SharedStatus) -> fortum_api::Result<Readings> {
    match poll_once(client).await {
        Ok(readings) => {
            metrics::record_update(readings.energy_total, readings.cost_total);
            info!(
                energy_total = readings.energy_total,
                cost_total = readings.cost_total,
                records = readings.records,
                narrowed = readings.narrowed,
                "consumption updated"
            );
            let mut status = status.write().await;
            status.last_readings = Some(readings.clone());
            status.last_error = None;
            status.consecutive_failures = 0;
            Ok(readings)
        }
        Err(e) => {
            metrics::record_update_failure();
            let failure = ServiceError::update(&e);
            let mut status = status.write().await;
            status.last_error = Some(failure.to_string());
            status.consecutive_failures += 1;
            warn!(
                error = %failure,
                consecutive_failures = status.consecutive_failures,
                "consumption update failed"
            );
            Err(e)
        }
    }
}

/// Poll every `interval` until `cancel` fires.
///
/// The first tick is skipped: setup already ran the initial fetch.
pub fn spawn_poller(
    client: Arc<DataClient>,
    status: SharedStatus,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(interval_secs = interval.as_secs(), "poller started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let _ = update(&client, &status).await;
                }
            }
        }
        info!("poller stopped");
    })
}
