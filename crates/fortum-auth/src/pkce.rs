//! PKCE (Proof Key for Code Exchange) per RFC 7636
//!
//! Used by the authorization-code flow. The verifier stays with the login
//! attempt and is sent at code exchange; the challenge goes into the
//! authorization URL.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use reqwest::Url;
use sha2::{Digest, Sha256};

use crate::config::AuthConfig;
use crate::error::{Error, Result};

/// Generate a random PKCE code verifier.
///
/// 64 random bytes encoded as URL-safe base64 without padding (86 chars,
/// inside the 43-128 range RFC 7636 allows).
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 64];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Opaque anti-CSRF `state` value.
pub fn generate_state() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Build the authorization URL on top of the discovered endpoint.
pub fn build_authorization_url(
    authorization_endpoint: &str,
    config: &AuthConfig,
    state: &str,
    challenge: &str,
) -> Result<String> {
    let mut url = Url::parse(authorization_endpoint).map_err(|e| {
        Error::Configuration(format!(
            "invalid authorization endpoint {authorization_endpoint}: {e}"
        ))
    })?;
    url.query_pairs_mut()
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", &config.redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", &config.scope)
        .append_pair("state", state)
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("acr_values", &config.acr_values)
        .append_pair("acr", &config.acr_values)
        .append_pair("locale", &config.locale)
        .append_pair("ui_locales", &config.locale)
        .append_pair("response_mode", "query");
    Ok(url.into())
}
