//! Fortum portal data client
//!
//! Fetches consumption time series from the logged-in portal API on top of
//! a `fortum_auth::Authenticator`.
//!
//! Request lifecycle:
//! 1. Take a valid session snapshot (login or refresh first if needed)
//! 2. Attach cookies, and a bearer token where the endpoint accepts one
//! 3. On 401, renew the session and retry up to the ceiling
//! 4. Unwrap the RPC envelope
//! 5. On a range error, retry over a narrower window and report it

pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod range;
pub mod rpc;

pub use client::DataClient;
pub use config::ApiConfig;
pub use error::{Error, Result};
pub use models::{ConsumptionRecord, CustomerDetails, MeteringPoint, Resolution, TimeSeries, totals};
pub use range::{DateRange, Served};
pub use rpc::parse_envelope;
