//! Token sets and the two token endpoint grants
//!
//! 1. Authorization code exchange (completion of the PKCE flow)
//! 2. Refresh grant (renewal of non-session tokens)
//!
//! Session-based logins never reach the token endpoint; their token set
//! carries `SESSION_BASED_TOKEN` as refresh token.

use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::constants::{BEARER, FIXED_TOKEN_LIFETIME, MAX_TOKEN_LIFETIME, SESSION_BASED_TOKEN};
use crate::error::{Error, LoginStep, Result};

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN: u64 = 3600;

/// One complete set of credentials. Replaced wholesale, never mutated.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Seconds of validity counted from install time
    pub expires_in: u64,
}

fn default_token_type() -> String {
    BEARER.to_string()
}

impl TokenSet {
    /// Token set for a session-cookie login with the fixed lifetime.
    pub fn session_based(access_token: impl Into<String>, id_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: SESSION_BASED_TOKEN.to_string(),
            id_token,
            token_type: default_token_type(),
            expires_in: FIXED_TOKEN_LIFETIME.as_secs(),
        }
    }

    pub fn is_session_based(&self) -> bool {
        self.refresh_token == SESSION_BASED_TOKEN
    }

    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.expires_in)
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("session_based", &self.is_session_based())
            .field("has_id_token", &self.id_token.is_some())
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Raw token endpoint response for both grants.
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl TokenResponse {
    /// Convert into a token set, keeping `previous` values the server omitted.
    pub fn into_token_set(self, previous: Option<&TokenSet>) -> Result<TokenSet> {
        let refresh_token = match (self.refresh_token, previous) {
            (Some(rt), _) => rt,
            (None, Some(prev)) if !prev.is_session_based() => prev.refresh_token.clone(),
            (None, _) => {
                return Err(Error::TokenExchange(
                    "token response carries no refresh_token".into(),
                ));
            }
        };
        Ok(TokenSet {
            access_token: self.access_token,
            refresh_token,
            id_token: self
                .id_token
                .or_else(|| previous.and_then(|p| p.id_token.clone())),
            token_type: self.token_type.unwrap_or_else(default_token_type),
            expires_in: clamp_expires_in(self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN)),
        })
    }
}

fn clamp_expires_in(claimed: u64) -> u64 {
    let ceiling = MAX_TOKEN_LIFETIME.as_secs();
    if claimed > ceiling {
        warn!(claimed, ceiling, "token endpoint claimed an implausible lifetime, clamping");
        return ceiling;
    }
    claimed
}

/// Exchange an authorization code for tokens.
pub async fn exchange_code(
    client: &reqwest::Client,
    config: &AuthConfig,
    code: &str,
    verifier: &str,
) -> Result<TokenSet> {
    let response = client
        .post(&config.token_url)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", verifier),
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::oauth2(
            LoginStep::Exchange,
            format!("token endpoint returned {status}: {body}"),
        ));
    }

    let token = response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::oauth2(LoginStep::Exchange, format!("invalid token response: {e}")))?;
    debug!(expires_in = ?token.expires_in, "authorization code exchanged");
    token.into_token_set(None)
}

/// Renew `current` with the refresh grant.
///
/// 401/403 means the refresh token is revoked or invalid.
pub async fn refresh_token(
    client: &reqwest::Client,
    config: &AuthConfig,
    current: &TokenSet,
) -> Result<TokenSet> {
    if current.is_session_based() {
        return Err(Error::TokenExchange(
            "session-based tokens cannot use the refresh grant".into(),
        ));
    }

    let response = client
        .post(&config.token_url)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", current.refresh_token.as_str()),
            ("client_id", config.client_id.as_str()),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "token refresh returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))?
        .into_token_set(Some(current))
}

/// Decode the claims of a JWT without verifying its signature.
///
/// Only used to read informational claims (customer id) from an id token
/// we received directly from the identity provider.
pub fn decode_unverified_claims(jwt: &str) -> Result<serde_json::Value> {
    let payload = jwt
        .split('.')
        .nth(1)
        .ok_or_else(|| Error::InvalidResponse("token is not a JWT".into()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::InvalidResponse(format!("invalid JWT payload encoding: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::InvalidResponse(format!("invalid JWT payload: {e}")))
}
