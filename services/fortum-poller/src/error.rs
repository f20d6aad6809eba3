//! Service-specific error types

use thiserror::Error;

/// Setup and update failures as reported to the operator.
#[derive(Error, Debug)]
pub enum Error {
    /// The portal rejected the configured credentials
    #[error("invalid authentication: {0}")]
    InvalidAuth(String),

    #[error("cannot connect to Fortum: {0}")]
    CannotConnect(String),

    #[error("update failed: {0}")]
    UpdateFailed(String),
}

impl Error {
    /// Classify a failure of the initial login or customer lookup.
    pub fn setup(err: &fortum_api::Error) -> Self {
        match err {
            fortum_api::Error::Auth(auth) if auth.is_credential_rejection() => {
                Error::InvalidAuth(err.to_string())
            }
            fortum_api::Error::Forbidden(_) => Error::InvalidAuth(err.to_string()),
            _ => Error::CannotConnect(err.to_string()),
        }
    }

    pub fn update(err: &fortum_api::Error) -> Self {
        Error::UpdateFailed(err.to_string())
    }
}
