//! Vendor endpoints and field names for the login sequence
//!
//! Everything the portal or the identity provider could rename lives here
//! with defaults matching the Swedish consumer portal. The poller reads this
//! struct from the `[auth]` table of its TOML file.

use std::time::Duration;

use serde::Deserialize;

use crate::constants::*;
use crate::error::{Error, Result};

/// How the login sequence obtains its tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginFlow {
    /// Portal sign-in (CSRF + provider sign-in). Tokens come from the portal
    /// session endpoint unless the redirect chain hands us a code.
    #[default]
    Session,
    /// Direct OAuth2 authorization-code flow with PKCE against the identity
    /// provider's discovery document.
    AuthorizationCode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub flow: LoginFlow,

    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub acr_values: String,

    pub providers_url: String,
    pub csrf_url: String,
    pub signin_url: String,
    /// Page the portal sends the browser to after sign-in
    pub callback_url: String,
    pub session_url: String,

    pub discovery_url: String,
    pub authenticate_url: String,
    pub token_url: String,

    pub auth_index_value: String,
    pub locale: String,
    pub accept_api_version: String,

    /// Callback input name carrying the username
    pub username_field: String,
    /// Callback input name carrying the password
    pub password_field: String,

    pub max_redirects: usize,
    /// Pause between session verification and the follow-up validation
    pub session_propagation_delay_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            flow: LoginFlow::default(),
            client_id: CLIENT_ID.into(),
            redirect_uri: REDIRECT_URI.into(),
            scope: SCOPES.into(),
            acr_values: ACR_VALUES.into(),
            providers_url: PROVIDERS_URL.into(),
            csrf_url: CSRF_URL.into(),
            signin_url: SIGNIN_URL.into(),
            callback_url: POST_LOGIN_URL.into(),
            session_url: SESSION_URL.into(),
            discovery_url: DISCOVERY_URL.into(),
            authenticate_url: AUTHENTICATE_URL.into(),
            token_url: TOKEN_ENDPOINT.into(),
            auth_index_value: AUTH_INDEX_VALUE.into(),
            locale: LOCALE.into(),
            accept_api_version: ACCEPT_API_VERSION.into(),
            username_field: "IDToken1".into(),
            password_field: "IDToken2".into(),
            max_redirects: 10,
            session_propagation_delay_ms: 3_000,
        }
    }
}

impl AuthConfig {
    /// Default paths rooted at other hosts, e.g. a mock server or a proxy.
    ///
    /// `portal` replaces `https://www.fortum.com`, `sso` replaces
    /// `https://sso.fortum.com`.
    pub fn with_base_urls(portal: &str, sso: &str) -> Self {
        let portal = portal.trim_end_matches('/');
        let sso = sso.trim_end_matches('/');
        let rebase = |url: &str, from: &str, to: &str| url.replacen(from, to, 1);
        let defaults = Self::default();
        Self {
            redirect_uri: rebase(&defaults.redirect_uri, "https://www.fortum.com", portal),
            providers_url: rebase(&defaults.providers_url, "https://www.fortum.com", portal),
            csrf_url: rebase(&defaults.csrf_url, "https://www.fortum.com", portal),
            signin_url: rebase(&defaults.signin_url, "https://www.fortum.com", portal),
            callback_url: rebase(&defaults.callback_url, "https://www.fortum.com", portal),
            session_url: rebase(&defaults.session_url, "https://www.fortum.com", portal),
            discovery_url: rebase(&defaults.discovery_url, "https://sso.fortum.com", sso),
            authenticate_url: rebase(&defaults.authenticate_url, "https://sso.fortum.com", sso),
            token_url: rebase(&defaults.token_url, "https://sso.fortum.com", sso),
            ..defaults
        }
    }

    pub fn session_propagation_delay(&self) -> Duration {
        Duration::from_millis(self.session_propagation_delay_ms)
    }

    /// Reject endpoints that are not http(s) and empty callback field names.
    pub fn validate(&self) -> Result<()> {
        let urls = [
            ("redirect_uri", &self.redirect_uri),
            ("providers_url", &self.providers_url),
            ("csrf_url", &self.csrf_url),
            ("signin_url", &self.signin_url),
            ("callback_url", &self.callback_url),
            ("session_url", &self.session_url),
            ("discovery_url", &self.discovery_url),
            ("authenticate_url", &self.authenticate_url),
            ("token_url", &self.token_url),
        ];
        for (name, url) in urls {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::Configuration(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }
        if self.username_field.is_empty() || self.password_field.is_empty() {
            return Err(Error::Configuration(
                "callback field names must not be empty".into(),
            ));
        }
        if self.client_id.is_empty() {
            return Err(Error::Configuration("client_id must not be empty".into()));
        }
        if self.max_redirects == 0 {
            return Err(Error::Configuration(
                "max_redirects must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
