//! Authenticated data client
//!
//! Every request starts from a valid session snapshot (login or refresh
//! first when needed). A 401 triggers a renewal and a retry, bounded by the
//! ceiling for the token kind: one retry for OAuth tokens, a few spaced
//! retries for session-based tokens whose renewal is a full login.

use std::sync::Arc;

use chrono::Utc;
use fortum_auth::{Authenticator, SESSION_BASED_TOKEN, SessionSnapshot, decode_unverified_claims};
use provider::HttpClientFactory;
use reqwest::header::{CONTENT_TYPE, COOKIE, REFERER};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::classify::{bearer_token, check_response};
use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::models::{ConsumptionRecord, CustomerDetails, MeteringPoint, Resolution, TimeSeries, value_to_string};
use crate::range::{DateRange, Served};
use crate::rpc::{parse_envelope_str, time_series_url};

pub struct DataClient {
    auth: Arc<Authenticator>,
    client: reqwest::Client,
    config: ApiConfig,
}

impl DataClient {
    pub fn new(
        auth: Arc<Authenticator>,
        factory: &dyn HttpClientFactory,
        config: ApiConfig,
    ) -> Result<Self> {
        config.validate().map_err(Error::Api)?;
        let client = factory
            .build_client()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            auth,
            client,
            config,
        })
    }

    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.auth
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Customer id from the session document, else from the id token claims.
    pub async fn customer_id(&self) -> Result<String> {
        let session = self.auth.ensure_valid().await?;
        if let Some(id) = session
            .session_payload
            .as_ref()
            .and_then(|p| p.pointer("/user/customerId"))
            .and_then(value_to_string)
        {
            return Ok(id);
        }

        let id_token = match session.id_token.as_deref() {
            None => return Err(Error::Api("no ID token or session data available".into())),
            Some(SESSION_BASED_TOKEN) => {
                return Err(Error::Api("customer ID not found in session data".into()));
            }
            Some(token) => token,
        };
        let claims = decode_unverified_claims(id_token)?;
        claims
            .pointer("/customerid/0/crmid")
            .and_then(value_to_string)
            .ok_or_else(|| Error::Api("failed to extract customer ID from ID token".into()))
    }

    pub async fn customer_details(&self) -> Result<CustomerDetails> {
        let document = self.get_json(&self.config.session_url).await?;
        CustomerDetails::from_session(&document)
    }

    pub async fn metering_points(&self) -> Result<Vec<MeteringPoint>> {
        let document = self.get_json(&self.config.session_url).await?;
        MeteringPoint::list_from_session(&document)
    }

    /// Fetch time series, narrowing the window when the backend asks for it.
    pub async fn time_series(
        &self,
        metering_points: &[String],
        range: DateRange,
        resolution: Resolution,
    ) -> Result<Served<Vec<TimeSeries>>> {
        let ladder = range.ladder();
        let last = ladder.len() - 1;

        for (step, window) in ladder.into_iter().enumerate() {
            let url = time_series_url(
                &self.config.time_series_url,
                metering_points,
                window.from,
                window.to,
                resolution,
            )?;

            let result = async {
                let body = self.get(&url).await?;
                let payload = parse_envelope_str(&body)?;
                TimeSeries::list_from_payload(payload)
            }
            .await;

            match result {
                Ok(series) => {
                    if step > 0 {
                        metrics::counter!("fortum_range_narrowed_total").increment(1);
                        info!(
                            requested_days = range.duration().num_days(),
                            served_days = window.duration().num_days(),
                            "served a narrower date range"
                        );
                    }
                    return Ok(Served {
                        data: series,
                        requested: range,
                        served: window,
                    });
                }
                Err(e @ Error::ReduceDateRange { .. }) if step < last => {
                    warn!(
                        error = %e,
                        window_days = window.duration().num_days(),
                        "date range too large, narrowing"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Api("no date range left to try".into()))
    }

    /// Consumption records for `metering_points`, or for every metering
    /// point of the customer when `None`.
    pub async fn consumption(
        &self,
        metering_points: Option<Vec<String>>,
        range: DateRange,
        resolution: Resolution,
    ) -> Result<Served<Vec<ConsumptionRecord>>> {
        let metering_points = match metering_points {
            Some(points) if !points.is_empty() => points,
            _ => {
                let points = self.metering_points().await?;
                if points.is_empty() {
                    return Err(Error::Api("no metering points found for customer".into()));
                }
                points.into_iter().map(|p| p.metering_point_no).collect()
            }
        };

        let served = self.time_series(&metering_points, range, resolution).await?;
        Ok(served.map(|series| {
            series
                .iter()
                .flat_map(ConsumptionRecord::from_time_series)
                .collect()
        }))
    }

    /// Monthly consumption for all metering points over the default window.
    pub async fn total_consumption(&self) -> Result<Served<Vec<ConsumptionRecord>>> {
        self.consumption(None, DateRange::default_until(Utc::now()), Resolution::Month)
            .await
    }

    /// Authenticated GET returning parsed JSON.
    pub async fn get_json(&self, url: &str) -> Result<Value> {
        let body = self.get(url).await?;
        serde_json::from_str(&body)
            .map_err(|e| Error::InvalidResponse(format!("malformed JSON from {url}: {e}")))
    }

    /// Authenticated GET with bounded 401 recovery.
    pub async fn get(&self, url: &str) -> Result<String> {
        let mut session = self.auth.ensure_valid().await?;
        let mut retries = 0;

        loop {
            match self.send(url, &session).await {
                Err(Error::TokenExpired) => {
                    let ceiling = self.config.retry_ceiling(session.session_based);
                    if retries >= ceiling {
                        warn!(url, retries, "still unauthorized after renewing, giving up");
                        return Err(Error::TokenExpired);
                    }

                    info!(
                        url,
                        attempt = retries + 1,
                        ceiling,
                        session_based = session.session_based,
                        "unauthorized, renewing session"
                    );
                    let delay = self.config.retry_delay(session.session_based, retries);
                    session = self.auth.refresh_if_current(session.generation).await?;
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    retries += 1;
                }
                other => return other,
            }
        }
    }

    async fn send(&self, url: &str, session: &SessionSnapshot) -> Result<String> {
        let mut request = self
            .client
            .get(url)
            .header(CONTENT_TYPE, "application/json")
            .header(REFERER, &self.config.referer);

        if let Some(token) = bearer_token(url, &self.config.session_patterns, session) {
            request = request.bearer_auth(token);
        }
        if let Some(cookies) = session.cookies.header_value() {
            debug!(count = session.cookies.len(), "attaching session cookies");
            request = request.header(COOKIE, cookies);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Http(format!("GET {url} failed: {e}")))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Http(format!("reading response from {url} failed: {e}")))?;
        debug!(url, status, "API response");

        check_response(status, body)
    }
}

impl std::fmt::Debug for DataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataClient")
            .field("auth", &self.auth)
            .field("time_series_url", &self.config.time_series_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::sample_series;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use fortum_auth::{AuthConfig, CapturedCookie, LoginCredentials, TokenSet, merge_prioritized};
    use provider::ReqwestClientFactory;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    const DATA_PATH: &str = "/customer/data";
    const TRPC_PATH: &str = "/se/el/api/trpc/loggedIn.timeSeries.listTimeSeries";
    const SESSION_PATH: &str = "/se/el/api/auth/session";
    const SIGNIN_PATH: &str = "/se/el/api/auth/signin/ciamprod";
    const TOKEN_PATH: &str = "/am/oauth2/access_token";

    struct Harness {
        server: MockServer,
        auth: Arc<Authenticator>,
        client: DataClient,
    }

    impl Harness {
        async fn new() -> Self {
            let server = MockServer::start().await;
            let uri = server.uri();
            let factory = ReqwestClientFactory::new(Duration::from_secs(5));
            let auth = Authenticator::builder(LoginCredentials::new("user@example.com", "pw"))
                .config(AuthConfig {
                    session_propagation_delay_ms: 0,
                    ..AuthConfig::with_base_urls(&uri, &uri)
                })
                .factory(Arc::new(factory.clone()))
                .background_renewal(false)
                .build()
                .unwrap();
            let config = ApiConfig {
                session_backoff_ms: vec![1, 2, 3],
                ..ApiConfig::with_base_url(&uri)
            };
            let client = DataClient::new(auth.clone(), &factory, config).unwrap();
            Self {
                server,
                auth,
                client,
            }
        }

        fn url(&self, p: &str) -> String {
            format!("{}{p}", self.server.uri())
        }

        async fn resume_oauth(&self, access: &str) {
            let tokens = TokenSet {
                access_token: access.into(),
                refresh_token: "rt-1".into(),
                id_token: None,
                token_type: "Bearer".into(),
                expires_in: 3600,
            };
            self.auth.resume(tokens, cookies(), None).await;
        }

        async fn resume_session(&self, payload: Option<Value>) {
            self.auth
                .resume(TokenSet::session_based("S", Some("I".into())), cookies(), payload)
                .await;
        }

        async fn requests_to(&self, p: &str) -> Vec<Request> {
            self.server
                .received_requests()
                .await
                .unwrap()
                .into_iter()
                .filter(|r| r.url.path() == p)
                .collect()
        }

        /// Portal login that skips the credential callbacks.
        async fn mount_quick_login(&self) {
            let uri = self.server.uri();
            let authorize = format!("{uri}/am/oauth2/authorize?client_id=globalwebprod");
            Mock::given(method("GET"))
                .and(path("/se/el/api/auth/providers"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
                .mount(&self.server)
                .await;
            Mock::given(method("GET"))
                .and(path("/se/el/api/auth/csrf"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({"csrfToken": "c"})))
                .mount(&self.server)
                .await;
            Mock::given(method("POST"))
                .and(path(SIGNIN_PATH))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({"url": authorize})))
                .mount(&self.server)
                .await;
            Mock::given(method("GET"))
                .and(path("/am/oauth2/authorize"))
                .respond_with(ResponseTemplate::new(200))
                .mount(&self.server)
                .await;
            Mock::given(method("POST"))
                .and(path_regex("/authenticate$"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!({"successUrl": format!("{uri}/se/el/inloggad/oversikt")})),
                )
                .mount(&self.server)
                .await;
            Mock::given(method("GET"))
                .and(path("/se/el/inloggad/oversikt"))
                .respond_with(ResponseTemplate::new(200))
                .mount(&self.server)
                .await;
            Mock::given(method("GET"))
                .and(path(SESSION_PATH))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "user": {"accessToken": "S2", "customerId": "1234567"}
                })))
                .mount(&self.server)
                .await;
        }
    }

    fn cookies() -> fortum_auth::SessionCookies {
        merge_prioritized([CapturedCookie::new("session-token", "abc", Some("fortum.com"))])
    }

    fn ok_json() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"ok": true}))
    }

    fn range() -> DateRange {
        let to = Utc::now();
        DateRange::new(to - chrono::Duration::days(365), to).unwrap()
    }

    #[tokio::test]
    async fn bearer_only_on_plain_endpoints_and_cookies_everywhere() {
        let h = Harness::new().await;
        h.resume_oauth("A").await;
        for p in [DATA_PATH, TRPC_PATH, SESSION_PATH] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(ok_json())
                .mount(&h.server)
                .await;
            h.client.get_json(&h.url(p)).await.unwrap();
        }

        let data = &h.requests_to(DATA_PATH).await[0];
        assert_eq!(data.headers.get("authorization").unwrap(), "Bearer A");
        for p in [TRPC_PATH, SESSION_PATH] {
            let request = &h.requests_to(p).await[0];
            assert!(request.headers.get("authorization").is_none(), "{p}");
        }
        for p in [DATA_PATH, TRPC_PATH, SESSION_PATH] {
            let request = &h.requests_to(p).await[0];
            assert_eq!(request.headers.get("cookie").unwrap(), "session-token=abc", "{p}");
        }
    }

    #[tokio::test]
    async fn session_based_tokens_are_never_sent_as_bearer() {
        let h = Harness::new().await;
        h.resume_session(None).await;
        Mock::given(method("GET"))
            .and(path(DATA_PATH))
            .respond_with(ok_json())
            .mount(&h.server)
            .await;

        h.client.get_json(&h.url(DATA_PATH)).await.unwrap();
        let request = &h.requests_to(DATA_PATH).await[0];
        assert!(request.headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn single_unauthorized_response_is_retried_once() {
        let h = Harness::new().await;
        h.resume_oauth("A").await;
        Mock::given(method("GET"))
            .and(path(DATA_PATH))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&h.server)
            .await;
        Mock::given(method("GET"))
            .and(path(DATA_PATH))
            .respond_with(ok_json())
            .mount(&h.server)
            .await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": "B", "expires_in": 3600})),
            )
            .expect(1)
            .mount(&h.server)
            .await;

        let value = h.client.get_json(&h.url(DATA_PATH)).await.unwrap();
        assert_eq!(value, json!({"ok": true}));

        let requests = h.requests_to(DATA_PATH).await;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].headers.get("authorization").unwrap(), "Bearer B");
    }

    #[tokio::test]
    async fn persistent_unauthorized_stops_at_oauth_ceiling() {
        let h = Harness::new().await;
        h.resume_oauth("A").await;
        Mock::given(method("GET"))
            .and(path(DATA_PATH))
            .respond_with(ResponseTemplate::new(401))
            .mount(&h.server)
            .await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": "B", "expires_in": 3600})),
            )
            .expect(1)
            .mount(&h.server)
            .await;

        let err = h.client.get(&h.url(DATA_PATH)).await.unwrap_err();
        assert!(matches!(err, Error::TokenExpired), "got: {err:?}");
        assert_eq!(h.requests_to(DATA_PATH).await.len(), 2);
    }

    #[tokio::test]
    async fn persistent_unauthorized_stops_at_session_ceiling() {
        let h = Harness::new().await;
        h.mount_quick_login().await;
        h.resume_session(None).await;
        Mock::given(method("GET"))
            .and(path(DATA_PATH))
            .respond_with(ResponseTemplate::new(401))
            .mount(&h.server)
            .await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&h.server)
            .await;

        let err = h.client.get(&h.url(DATA_PATH)).await.unwrap_err();
        assert!(matches!(err, Error::TokenExpired), "got: {err:?}");
        assert_eq!(h.requests_to(DATA_PATH).await.len(), 4);
        assert_eq!(h.requests_to(SIGNIN_PATH).await.len(), 3);
    }

    #[tokio::test]
    async fn error_statuses_are_typed() {
        let h = Harness::new().await;
        h.resume_oauth("A").await;
        for (p, status, body) in [
            ("/forbidden", 403, "nope"),
            ("/broken", 500, "Internal Server Error"),
            ("/empty", 200, ""),
        ] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(ResponseTemplate::new(status).set_body_string(body))
                .mount(&h.server)
                .await;
        }

        assert!(matches!(h.client.get(&h.url("/forbidden")).await, Err(Error::Forbidden(_))));
        assert!(matches!(
            h.client.get(&h.url("/broken")).await,
            Err(Error::UnexpectedStatus { status: 500, .. })
        ));
        assert!(matches!(h.client.get(&h.url("/empty")).await, Err(Error::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn time_series_narrows_range_until_served() {
        let h = Harness::new().await;
        h.resume_session(None).await;
        let range_error = json!([{"error": {"json": {"message": "INTERNAL_SERVER_ERROR", "code": "X"}}}]);
        Mock::given(method("GET"))
            .and(path(TRPC_PATH))
            .respond_with(ResponseTemplate::new(500).set_body_json(range_error))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&h.server)
            .await;
        Mock::given(method("GET"))
            .and(path(TRPC_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"result": {"data": {"json": [sample_series()]}}}])),
            )
            .mount(&h.server)
            .await;

        let requested = range();
        let served = h
            .client
            .time_series(&["735999100000000001".into()], requested, Resolution::Month)
            .await
            .unwrap();

        assert!(served.is_narrowed());
        assert_eq!(served.requested, requested);
        assert_eq!(served.served.duration(), chrono::Duration::days(7));
        assert_eq!(served.data.len(), 1);
        assert_eq!(h.requests_to(TRPC_PATH).await.len(), 3);
    }

    #[tokio::test]
    async fn exhausted_ladder_surfaces_range_error() {
        let h = Harness::new().await;
        h.resume_session(None).await;
        Mock::given(method("GET"))
            .and(path(TRPC_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"error": {"json": {"message": "INTERNAL_SERVER_ERROR", "code": "X"}}}
            ])))
            .mount(&h.server)
            .await;

        let err = h
            .client
            .time_series(&["1".into()], range(), Resolution::Day)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReduceDateRange { .. }), "got: {err:?}");
        assert_eq!(h.requests_to(TRPC_PATH).await.len(), 3);
    }

    #[tokio::test]
    async fn total_consumption_uses_session_metering_points() {
        let h = Harness::new().await;
        h.resume_session(None).await;
        Mock::given(method("GET"))
            .and(path(SESSION_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "user": {"customerId": "1234567", "deliverySites": [{"meteringPointNo": "735999100000000001"}]}
            })))
            .mount(&h.server)
            .await;
        Mock::given(method("GET"))
            .and(path(TRPC_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"result": {"data": {"json": sample_series()}}}])),
            )
            .mount(&h.server)
            .await;

        let served = h.client.total_consumption().await.unwrap();
        assert!(!served.is_narrowed());
        assert_eq!(served.data.len(), 2);
        assert_eq!(served.data[0].value, 120.5);

        let request = &h.requests_to(TRPC_PATH).await[0];
        let input = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "input")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let input: Value = serde_json::from_str(&input).unwrap();
        assert_eq!(input["0"]["json"]["meteringPointNo"], json!(["735999100000000001"]));
        assert_eq!(input["0"]["json"]["resolution"], "MONTH");
    }

    #[tokio::test]
    async fn consumption_without_metering_points_fails() {
        let h = Harness::new().await;
        h.resume_session(None).await;
        Mock::given(method("GET"))
            .and(path(SESSION_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user": {}})))
            .mount(&h.server)
            .await;

        let err = h.client.total_consumption().await.unwrap_err();
        assert!(matches!(&err, Error::Api(m) if m.contains("no metering points")), "got: {err:?}");
    }

    #[tokio::test]
    async fn customer_id_prefers_session_payload() {
        let h = Harness::new().await;
        h.resume_session(Some(json!({"user": {"customerId": "1234567"}})))
            .await;
        assert_eq!(h.client.customer_id().await.unwrap(), "1234567");
    }

    #[tokio::test]
    async fn customer_id_falls_back_to_id_token_claims() {
        let h = Harness::new().await;
        let claims = URL_SAFE_NO_PAD.encode(r#"{"customerid":[{"crmid":"7654321"}]}"#);
        let id_token = format!("eyJhbGciOiJub25lIn0.{claims}.sig");
        let tokens = TokenSet {
            access_token: "A".into(),
            refresh_token: "rt".into(),
            id_token: Some(id_token),
            token_type: "Bearer".into(),
            expires_in: 3600,
        };
        h.auth.resume(tokens, cookies(), None).await;
        assert_eq!(h.client.customer_id().await.unwrap(), "7654321");
    }

    #[tokio::test]
    async fn customer_id_without_claims_source_fails() {
        let h = Harness::new().await;
        h.auth
            .resume(
                TokenSet::session_based("S", Some(SESSION_BASED_TOKEN.into())),
                cookies(),
                None,
            )
            .await;
        let err = h.client.customer_id().await.unwrap_err();
        assert!(matches!(&err, Error::Api(m) if m.contains("session data")), "got: {err:?}");
    }

    #[tokio::test]
    async fn customer_details_read_from_session_endpoint() {
        let h = Harness::new().await;
        h.resume_session(None).await;
        Mock::given(method("GET"))
            .and(path(SESSION_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "user": {"customerId": "1234567", "postalAddress": "Storgatan 1", "postOffice": "Stockholm"}
            })))
            .mount(&h.server)
            .await;

        let details = h.client.customer_details().await.unwrap();
        assert_eq!(details.customer_id, "1234567");
        assert_eq!(details.post_office, "Stockholm");
    }
}
