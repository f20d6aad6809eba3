//! reqwest-backed client factory with static default headers.
//!
//! Configured headers are injected into every request a built client sends.
//! `Authorization` and `Cookie` are owned by the session layer and are never
//! injected from configuration.

use std::str::FromStr;
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::{DEFAULT_TIMEOUT, DEFAULT_USER_AGENT, HttpClientFactory, ProviderError, Result};

/// Header injection rule (name + value pair from config).
#[derive(Debug, Clone)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

impl HeaderInjection {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Standard factory: browser user agent, JSON accept header, no redirects.
#[derive(Debug, Clone)]
pub struct ReqwestClientFactory {
    timeout: Duration,
    user_agent: String,
    headers: Vec<HeaderInjection>,
}

impl Default for ReqwestClientFactory {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl ReqwestClientFactory {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: vec![
                HeaderInjection::new("accept", "application/json"),
                HeaderInjection::new("accept-language", "sv-SE,sv;q=0.9,en;q=0.8"),
            ],
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Add (or replace) a default header.
    pub fn with_header(mut self, injection: HeaderInjection) -> Self {
        self.headers
            .retain(|h| !h.name.eq_ignore_ascii_case(&injection.name));
        self.headers.push(injection);
        self
    }

    /// Resolve configured injections into a header map, skipping invalid
    /// entries and the session-owned headers.
    fn default_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for injection in &self.headers {
            let name = match HeaderName::from_str(&injection.name) {
                Ok(n) => n,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header name");
                    continue;
                }
            };
            if name == header::AUTHORIZATION || name == header::COOKIE {
                warn!(header = %injection.name, "refusing to inject session-owned header");
                continue;
            }
            let value = match HeaderValue::from_str(&injection.value) {
                Ok(v) => v,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header value");
                    continue;
                }
            };
            headers.insert(name, value);
        }
        headers
    }
}

impl HttpClientFactory for ReqwestClientFactory {
    fn id(&self) -> &str {
        "reqwest"
    }

    fn build_client(&self) -> Result<reqwest::Client> {
        let user_agent = HeaderValue::from_str(&self.user_agent).map_err(|e| {
            ProviderError::InvalidHeader {
                name: "user-agent".into(),
                reason: e.to_string(),
            }
        })?;
        debug!(timeout_secs = self.timeout.as_secs(), "building HTTP client");
        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(user_agent)
            .default_headers(self.default_headers())
            .redirect(reqwest::redirect::Policy::none())
            .cookie_store(true)
            .build()
            .map_err(|e| ProviderError::Build(e.to_string()))
    }

    fn request_timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn default_headers_include_json_accept() {
        let factory = ReqwestClientFactory::default();
        let headers = factory.default_headers();
        assert_eq!(headers.get("accept").unwrap(), "application/json");
    }

    #[test]
    fn session_owned_headers_are_never_injected() {
        let factory = ReqwestClientFactory::default()
            .with_header(HeaderInjection::new("authorization", "Bearer injected"))
            .with_header(HeaderInjection::new("cookie", "sid=injected"))
            .with_header(HeaderInjection::new("referer", "https://www.fortum.com/se/el"));

        let headers = factory.default_headers();
        assert!(headers.get("authorization").is_none());
        assert!(headers.get("cookie").is_none());
        assert_eq!(headers.get("referer").unwrap(), "https://www.fortum.com/se/el");
    }

    #[test]
    fn invalid_header_names_are_skipped() {
        let factory = ReqwestClientFactory::default()
            .with_header(HeaderInjection::new("bad header", "x"))
            .with_header(HeaderInjection::new("x-ok", "yes"));

        let headers = factory.default_headers();
        assert_eq!(headers.get("x-ok").unwrap(), "yes");
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn with_header_replaces_case_insensitively() {
        let factory =
            ReqwestClientFactory::default().with_header(HeaderInjection::new("Accept", "text/html"));
        assert_eq!(factory.default_headers().get("accept").unwrap(), "text/html");
    }

    #[tokio::test]
    async fn built_client_does_not_follow_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/start"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "/elsewhere"),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/elsewhere"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = ReqwestClientFactory::new(Duration::from_secs(5))
            .build_client()
            .unwrap();
        let response = client
            .get(format!("{}/start", server.uri()))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 302);
        assert_eq!(response.headers().get("location").unwrap(), "/elsewhere");
    }

    #[tokio::test]
    async fn built_client_sends_user_agent_and_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .and(header("user-agent", "fortum-test"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let factory = ReqwestClientFactory::new(Duration::from_secs(5)).with_user_agent("fortum-test");
        assert_eq!(factory.request_timeout(), Duration::from_secs(5));
        let client = factory.build_client().unwrap();
        let response = client
            .get(format!("{}/ping", server.uri()))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
    }
}
