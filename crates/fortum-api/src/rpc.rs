//! Batched RPC envelope used by the portal's logged-in API
//!
//! Requests carry their input as percent-encoded JSON in the query string
//! (`?batch=1&input={"0":{"json":{...}}}`). Responses are a one-element
//! array holding either `{result:{data:{json:X}}}` or
//! `{error:{json:{message,code}}}`.

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::models::Resolution;

/// Message the backend uses when a window is too expensive to compute.
pub const RANGE_TOO_LARGE: &str = "INTERNAL_SERVER_ERROR";

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Unwrap an RPC response into its payload.
///
/// A plain JSON object passes through unchanged so non-batched endpoints
/// share this path.
pub fn parse_envelope(body: &Value) -> Result<Value> {
    match body {
        Value::Array(items) => {
            let first = items
                .first()
                .ok_or_else(|| Error::InvalidResponse("empty RPC batch response".into()))?;
            if let Some(error) = first.get("error") {
                return Err(envelope_error(error));
            }
            match first.get("result") {
                Some(result) => result
                    .pointer("/data/json")
                    .cloned()
                    .ok_or_else(|| Error::InvalidResponse("RPC result without data.json".into())),
                None => Ok(first.clone()),
            }
        }
        Value::Object(_) => Ok(body.clone()),
        other => Err(Error::InvalidResponse(format!(
            "unexpected RPC response type: {}",
            type_name(other)
        ))),
    }
}

/// Parse a raw response body and unwrap its envelope.
pub fn parse_envelope_str(body: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| Error::InvalidResponse(format!("malformed RPC response: {e}")))?;
    parse_envelope(&value)
}

/// The range error carried by an error response body, if any.
pub fn range_error(body: &str) -> Option<Error> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.as_array()?.first()?.get("error")?;
    match envelope_error(error) {
        err @ Error::ReduceDateRange { .. } => Some(err),
        _ => None,
    }
}

fn envelope_error(error: &Value) -> Error {
    let message = error
        .pointer("/json/message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    let code = match error.pointer("/json/code") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::from("UNKNOWN"),
        Some(other) => other.to_string(),
    };

    if message.contains(RANGE_TOO_LARGE) {
        Error::ReduceDateRange { message, code }
    } else {
        Error::Api(format!("{code}: {message}"))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Build the batched time series URL.
pub fn time_series_url(
    base: &str,
    metering_points: &[String],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    resolution: Resolution,
) -> Result<String> {
    let input = json!({
        "0": {
            "json": {
                "meteringPointNo": metering_points,
                "fromDate": from.format(DATE_FORMAT).to_string(),
                "toDate": to.format(DATE_FORMAT).to_string(),
                "resolution": resolution.as_str(),
            }
        }
    });

    let mut url = Url::parse(base)
        .map_err(|e| Error::Api(format!("invalid time series URL {base}: {e}")))?;
    url.query_pairs_mut()
        .append_pair("batch", "1")
        .append_pair("input", &input.to_string());
    Ok(url.into())
}
