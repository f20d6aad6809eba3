//! Data client configuration

use std::time::Duration;

use serde::Deserialize;

use crate::classify::DEFAULT_SESSION_PATTERNS;

pub const TIME_SERIES_URL: &str =
    "https://www.fortum.com/se/el/api/trpc/loggedIn.timeSeries.listTimeSeries";
pub const SESSION_URL: &str = "https://www.fortum.com/se/el/api/auth/session";
pub const REFERER: &str = "https://www.fortum.com/se/el/inloggad/el";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub time_series_url: String,
    pub session_url: String,
    pub referer: String,
    /// URL fragments of cookie-authenticated endpoints
    pub session_patterns: Vec<String>,

    /// 401 retries for OAuth tokens
    pub token_retries: u32,
    /// 401 retries for session-based tokens (each one is a full login)
    pub session_retries: u32,
    /// Delay before each session-based retry; the last entry repeats
    pub session_backoff_ms: Vec<u64>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            time_series_url: TIME_SERIES_URL.into(),
            session_url: SESSION_URL.into(),
            referer: REFERER.into(),
            session_patterns: DEFAULT_SESSION_PATTERNS.iter().map(|p| p.to_string()).collect(),
            token_retries: 1,
            session_retries: 3,
            session_backoff_ms: vec![500, 1000, 2000],
        }
    }
}

impl ApiConfig {
    /// Defaults with the portal origin replaced by `portal`.
    pub fn with_base_url(portal: &str) -> Self {
        let portal = portal.trim_end_matches('/');
        let defaults = Self::default();
        let rebase = |url: &str| url.replacen("https://www.fortum.com", portal, 1);
        Self {
            time_series_url: rebase(&defaults.time_series_url),
            session_url: rebase(&defaults.session_url),
            referer: rebase(&defaults.referer),
            ..defaults
        }
    }

    /// Retry ceiling for 401s.
    pub fn retry_ceiling(&self, session_based: bool) -> u32 {
        if session_based {
            self.session_retries
        } else {
            self.token_retries
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn retry_delay(&self, session_based: bool, attempt: u32) -> Duration {
        if !session_based {
            return Duration::ZERO;
        }
        let index = (attempt as usize).min(self.session_backoff_ms.len().saturating_sub(1));
        Duration::from_millis(self.session_backoff_ms.get(index).copied().unwrap_or(0))
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, url) in [
            ("time_series_url", &self.time_series_url),
            ("session_url", &self.session_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(format!("{name} must be an http(s) URL, got {url:?}"));
            }
        }
        if self.session_patterns.iter().any(|p| p.is_empty()) {
            return Err("session_patterns must not contain empty entries".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_ceilings_differ_by_token_kind() {
        let config = ApiConfig::default();
        assert_eq!(config.retry_ceiling(false), 1);
        assert_eq!(config.retry_ceiling(true), 3);
    }

    #[test]
    fn session_backoff_grows_and_saturates() {
        let config = ApiConfig::default();
        assert_eq!(config.retry_delay(true, 0), Duration::from_millis(500));
        assert_eq!(config.retry_delay(true, 1), Duration::from_secs(1));
        assert_eq!(config.retry_delay(true, 2), Duration::from_secs(2));
        assert_eq!(config.retry_delay(true, 7), Duration::from_secs(2));
        assert_eq!(config.retry_delay(false, 0), Duration::ZERO);

        let none = ApiConfig {
            session_backoff_ms: Vec::new(),
            ..ApiConfig::default()
        };
        assert_eq!(none.retry_delay(true, 0), Duration::ZERO);
    }

    #[test]
    fn base_url_rebases_portal_endpoints() {
        let config = ApiConfig::with_base_url("http://127.0.0.1:8080/");
        assert_eq!(
            config.time_series_url,
            "http://127.0.0.1:8080/se/el/api/trpc/loggedIn.timeSeries.listTimeSeries"
        );
        assert_eq!(config.session_url, "http://127.0.0.1:8080/se/el/api/auth/session");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_relative_urls() {
        let config = ApiConfig {
            session_url: "/se/el/api/auth/session".into(),
            ..ApiConfig::default()
        };
        assert!(config.validate().unwrap_err().contains("session_url"));
    }
}
