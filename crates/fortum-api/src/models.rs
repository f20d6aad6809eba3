//! Data returned by the portal
//!
//! Time series come from the batched RPC endpoint; customer details and
//! metering points come from the portal session document.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    Hour,
    Day,
    #[default]
    Month,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Hour => "HOUR",
            Resolution::Day => "DAY",
            Resolution::Month => "MONTH",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "HOUR" => Ok(Resolution::Hour),
            "DAY" => Ok(Resolution::Day),
            "MONTH" => Ok(Resolution::Month),
            other => Err(Error::Api(format!("unknown resolution: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnergyPoint {
    pub value: f64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CostPoint {
    pub total: f64,
    pub value: f64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub total: f64,
    pub value: f64,
    pub vat_amount: f64,
    pub vat_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TemperatureReading {
    pub temperature: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesPoint {
    #[serde(rename = "atUTC")]
    pub at_utc: DateTime<Utc>,
    #[serde(default)]
    pub energy: Vec<EnergyPoint>,
    pub cost: Option<Vec<CostPoint>>,
    pub price: Option<Price>,
    pub temperature_reading: Option<TemperatureReading>,
}

impl TimeSeriesPoint {
    /// Sum of `ENERGY` entries.
    pub fn total_energy(&self) -> f64 {
        self.energy
            .iter()
            .filter(|p| p.kind == "ENERGY")
            .map(|p| p.value)
            .sum()
    }

    pub fn total_cost(&self) -> f64 {
        self.cost
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|p| p.total)
            .sum()
    }

    pub fn has_consumption(&self) -> bool {
        self.energy.iter().any(|p| p.value > 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeries {
    #[serde(default)]
    pub delivery_site_category: String,
    #[serde(default)]
    pub measurement_unit: String,
    pub metering_point_no: String,
    #[serde(default)]
    pub price_unit: String,
    #[serde(default)]
    pub cost_unit: String,
    #[serde(default)]
    pub temperature_unit: String,
    #[serde(default)]
    pub series: Vec<TimeSeriesPoint>,
}

impl TimeSeries {
    /// Time series from an unwrapped RPC payload (one object or a list).
    pub fn list_from_payload(payload: Value) -> Result<Vec<TimeSeries>> {
        let parsed = match payload {
            Value::Array(_) => serde_json::from_value(payload),
            other => serde_json::from_value(other).map(|one| vec![one]),
        };
        parsed.map_err(|e| Error::InvalidResponse(format!("invalid time series response: {e}")))
    }

    pub fn total_energy(&self) -> f64 {
        self.series.iter().map(TimeSeriesPoint::total_energy).sum()
    }

    pub fn total_cost(&self) -> f64 {
        self.series.iter().map(TimeSeriesPoint::total_cost).sum()
    }

    /// Latest point with positive consumption.
    pub fn latest_point(&self) -> Option<&TimeSeriesPoint> {
        self.series.iter().rev().find(|p| p.has_consumption())
    }
}

/// One consumption reading handed to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsumptionRecord {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub unit: String,
    pub cost: Option<f64>,
}

impl ConsumptionRecord {
    /// Records for every point with positive consumption.
    pub fn from_time_series(series: &TimeSeries) -> Vec<ConsumptionRecord> {
        let unit = if series.measurement_unit.is_empty() {
            "kWh"
        } else {
            series.measurement_unit.as_str()
        };
        series
            .series
            .iter()
            .filter(|p| p.has_consumption())
            .map(|p| ConsumptionRecord {
                timestamp: p.at_utc,
                value: p.total_energy(),
                unit: unit.to_string(),
                cost: p.cost.as_ref().map(|_| p.total_cost()),
            })
            .collect()
    }
}

/// Energy and cost summed over records.
pub fn totals(records: &[ConsumptionRecord]) -> (f64, f64) {
    records.iter().fold((0.0, 0.0), |(energy, cost), r| {
        (energy + r.value, cost + r.cost.unwrap_or(0.0))
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomerDetails {
    pub customer_id: String,
    pub postal_address: String,
    pub post_office: String,
    pub name: Option<String>,
}

impl CustomerDetails {
    /// From the session document (`{"user": {...}}`) or a bare customer object.
    pub fn from_session(document: &Value) -> Result<Self> {
        let user = document.get("user").unwrap_or(document);
        let customer_id = user
            .get("customerId")
            .and_then(value_to_string)
            .ok_or_else(|| Error::InvalidResponse("customer details without customerId".into()))?;
        let text = |field: &str| {
            user.get(field)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Ok(Self {
            customer_id,
            postal_address: text("postalAddress"),
            post_office: text("postOffice"),
            name: user.get("name").and_then(Value::as_str).map(str::to_string),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeteringPoint {
    pub metering_point_no: String,
    pub address: Option<String>,
}

impl MeteringPoint {
    /// Delivery sites from the session document; none when absent.
    pub fn list_from_session(document: &Value) -> Result<Vec<MeteringPoint>> {
        match document.pointer("/user/deliverySites") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(sites) => serde_json::from_value(sites.clone()).map_err(|e| {
                Error::InvalidResponse(format!("invalid metering points response: {e}"))
            }),
        }
    }
}

/// Strings as-is, numbers rendered; customer ids show up as both.
pub(crate) fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
