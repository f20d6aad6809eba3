//! Error types for SSO login and token renewal

use std::fmt;

/// Step of the login sequence, carried by `Error::OAuth2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStep {
    Discover,
    SignIn,
    OpenAuthorization,
    InitAuthentication,
    SubmitCredentials,
    Complete,
    VerifySession,
    Exchange,
}

impl LoginStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginStep::Discover => "discover",
            LoginStep::SignIn => "sign_in",
            LoginStep::OpenAuthorization => "open_authorization",
            LoginStep::InitAuthentication => "init_authentication",
            LoginStep::SubmitCredentials => "submit_credentials",
            LoginStep::Complete => "complete",
            LoginStep::VerifySession => "verify_session",
            LoginStep::Exchange => "exchange",
        }
    }
}

impl fmt::Display for LoginStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from authentication operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// A login step rejected the response (status, missing field, bad JSON).
    #[error("OAuth2 {step} failed: {message}")]
    OAuth2 { step: LoginStep, message: String },

    /// The login sequence as a whole failed; the cause is kept as source.
    #[error("authentication failed: {source}")]
    Authentication {
        #[source]
        source: Box<Error>,
    },

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("not authenticated")]
    NotAuthenticated,
}

impl Error {
    pub(crate) fn oauth2(step: LoginStep, message: impl Into<String>) -> Self {
        Error::OAuth2 {
            step,
            message: message.into(),
        }
    }

    /// Wrap a login failure, leaving already-wrapped errors alone.
    pub fn into_authentication(self) -> Self {
        match self {
            Error::Authentication { .. } => self,
            other => Error::Authentication {
                source: Box::new(other),
            },
        }
    }

    /// True when the identity provider rejected the user or the refresh token,
    /// as opposed to a transport or vendor failure.
    pub fn is_credential_rejection(&self) -> bool {
        match self {
            Error::InvalidCredentials(_) => true,
            Error::OAuth2 {
                step: LoginStep::SubmitCredentials,
                ..
            } => true,
            Error::Authentication { source } => source.is_credential_rejection(),
            _ => false,
        }
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
