//! Error types for data client operations

/// Errors from data client operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] fortum_auth::Error),

    #[error("HTTP request failed: {0}")]
    Http(String),

    /// 401 from the API after the retry ceiling was reached
    #[error("token expired, retry required")]
    TokenExpired,

    #[error("access forbidden, re-authentication may be required: {0}")]
    Forbidden(String),

    #[error("unexpected status code {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The backend failed on the requested window; a narrower one may work.
    #[error("API error {code}: {message}, reduce date range and retry")]
    ReduceDateRange { message: String, code: String },

    #[error("API error: {0}")]
    Api(String),
}

impl Error {
    /// Authentication failed or the session could not be renewed.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Error::Auth(_) | Error::TokenExpired | Error::Forbidden(_))
    }

    /// The session looked expired; usually clears once the new session
    /// has propagated on the portal side.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Error::TokenExpired)
    }
}

/// Result alias for data client operations.
pub type Result<T> = std::result::Result<T, Error>;
