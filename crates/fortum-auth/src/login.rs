//! SSO login sequencer
//!
//! Emulates the browser sign-in against the portal and the ForgeRock
//! identity provider:
//! 1. Discover: portal providers + CSRF token (or the OpenID discovery
//!    document in authorization-code flow)
//! 2. Sign in: portal returns the identity provider authorization URL
//!    (or we build it with PKCE)
//! 3. Open the authorization URL, then start the authentication tree
//! 4. Answer the username/password callbacks
//! 5. Walk the redirect chain, capturing an authorization code if one is
//!    addressed to our client
//! 6. Exchange the code, or read tokens from the portal session endpoint
//! 7. Hand back tokens together with every cookie seen on the way
//!
//! Each step fails on its own with `Error::OAuth2` naming the step.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use provider::HttpClientFactory;
use reqwest::header::LOCATION;
use reqwest::{Response, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::callbacks::{AuthStep, AuthSubmission, CallbackFillers, LoginCredentials};
use crate::config::{AuthConfig, LoginFlow};
use crate::constants::SESSION_BASED_TOKEN;
use crate::cookies::{CookieRecorder, SessionCookies};
use crate::error::{Error, LoginStep, Result};
use crate::pkce::{build_authorization_url, compute_challenge, generate_state, generate_verifier};
use crate::token::{TokenSet, exchange_code};

/// Everything a successful login installs into the token store.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub tokens: TokenSet,
    pub cookies: SessionCookies,
    pub session_payload: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CsrfResponse {
    csrf_token: String,
}

#[derive(Deserialize)]
struct SignInResponse {
    url: String,
}

#[derive(Deserialize)]
struct OpenIdConfiguration {
    authorization_endpoint: String,
}

pub struct LoginSequencer {
    config: Arc<AuthConfig>,
    factory: Arc<dyn HttpClientFactory>,
    fillers: CallbackFillers,
}

impl LoginSequencer {
    pub fn new(config: Arc<AuthConfig>, factory: Arc<dyn HttpClientFactory>) -> Self {
        let fillers = CallbackFillers::standard(&config.username_field, &config.password_field);
        Self {
            config,
            factory,
            fillers,
        }
    }

    pub fn with_fillers(mut self, fillers: CallbackFillers) -> Self {
        self.fillers = fillers;
        self
    }

    /// Run the full sequence with a fresh HTTP client and cookie jar.
    pub async fn run(&self, credentials: &LoginCredentials) -> Result<LoginOutcome> {
        let client = self
            .factory
            .build_client()
            .map_err(|e| Error::Http(e.to_string()))?;
        let mut attempt = LoginAttempt {
            client,
            config: &self.config,
            recorder: CookieRecorder::new(),
        };
        info!(flow = ?self.config.flow, provider = self.factory.id(), "starting SSO login");

        let (authorize_url, pkce) = match self.config.flow {
            LoginFlow::Session => {
                let csrf = attempt.discover_portal().await?;
                (attempt.sign_in(&csrf).await?, None)
            }
            LoginFlow::AuthorizationCode => {
                let endpoint = attempt.discover_identity_provider().await?;
                let verifier = generate_verifier();
                let state = generate_state();
                let url = build_authorization_url(
                    &endpoint,
                    &self.config,
                    &state,
                    &compute_challenge(&verifier),
                )?;
                (url, Some((verifier, state)))
            }
        };

        attempt.open_authorization(&authorize_url).await?;
        let step = attempt.init_authentication(&authorize_url).await?;

        let continue_url = if step.auth_id.is_some() {
            attempt
                .submit_credentials(step, &authorize_url, &self.fillers, credentials)
                .await?
                .unwrap_or_else(|| authorize_url.clone())
        } else {
            step.success_url.ok_or_else(|| {
                Error::oauth2(
                    LoginStep::InitAuthentication,
                    "response carries neither authId nor successUrl",
                )
            })?
        };

        let code = attempt
            .follow_redirects(&continue_url, pkce.as_ref().map(|(_, state)| state.as_str()))
            .await?;

        let (tokens, session_payload) = match (code, pkce) {
            (Some(code), Some((verifier, _))) => {
                debug!("authorization code captured, exchanging");
                let tokens = exchange_code(&attempt.client, &self.config, &code, &verifier).await?;
                (tokens, attempt.optional_session().await)
            }
            _ => {
                let (tokens, payload) = attempt.verify_session().await?;
                attempt.revalidate_session().await;
                (tokens, Some(payload))
            }
        };

        let cookies = attempt.recorder.finish();
        info!(
            session_based = tokens.is_session_based(),
            expires_in = tokens.expires_in,
            cookies = cookies.len(),
            "SSO login completed"
        );
        Ok(LoginOutcome {
            tokens,
            cookies,
            session_payload,
        })
    }
}

/// State of one login attempt: the client (with its in-flow cookie jar)
/// and the cookies recorded so far.
struct LoginAttempt<'a> {
    client: reqwest::Client,
    config: &'a AuthConfig,
    recorder: CookieRecorder,
}

impl LoginAttempt<'_> {
    async fn send(&mut self, request: reqwest::RequestBuilder, step: LoginStep) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Http(format!("{step} request failed: {e}")))?;
        self.recorder.record(&response);
        Ok(response)
    }

    async fn discover_portal(&mut self) -> Result<String> {
        let step = LoginStep::Discover;
        let response = self.send(self.client.get(&self.config.providers_url), step).await?;
        ensure_success(response, step).await?;

        let response = self.send(self.client.get(&self.config.csrf_url), step).await?;
        let csrf: CsrfResponse = read_json(ensure_success(response, step).await?, step).await?;
        if csrf.csrf_token.is_empty() {
            return Err(Error::oauth2(step, "empty csrfToken"));
        }
        debug!("obtained CSRF token");
        Ok(csrf.csrf_token)
    }

    async fn discover_identity_provider(&mut self) -> Result<String> {
        let step = LoginStep::Discover;
        let response = self.send(self.client.get(&self.config.discovery_url), step).await?;
        let discovery: OpenIdConfiguration =
            read_json(ensure_success(response, step).await?, step).await?;
        debug!(endpoint = %discovery.authorization_endpoint, "discovered authorization endpoint");
        Ok(discovery.authorization_endpoint)
    }

    async fn sign_in(&mut self, csrf_token: &str) -> Result<String> {
        let step = LoginStep::SignIn;
        let body = json!({
            "csrfToken": csrf_token,
            "callbackUrl": self.config.callback_url,
            "json": "true",
        });
        let response = self
            .send(self.client.post(&self.config.signin_url).json(&body), step)
            .await?;
        let signin: SignInResponse = read_json(ensure_success(response, step).await?, step).await?;
        Url::parse(&signin.url)
            .map_err(|e| Error::oauth2(step, format!("invalid authorization url: {e}")))?;
        debug!("portal returned authorization url");
        Ok(signin.url)
    }

    /// Load the authorization URL so the identity provider sets its
    /// session cookies. Redirects are expected here and not followed.
    async fn open_authorization(&mut self, url: &str) -> Result<()> {
        let step = LoginStep::OpenAuthorization;
        let response = self.send(self.client.get(url), step).await?;
        let status = response.status();
        if !status.is_success() && !status.is_redirection() {
            return Err(Error::oauth2(step, format!("{status}")));
        }
        Ok(())
    }

    fn authenticate_url(&self, goto: &str) -> Result<Url> {
        let mut url = Url::parse(&self.config.authenticate_url)
            .map_err(|e| Error::Configuration(format!("invalid authenticate_url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("locale", &self.config.locale)
            .append_pair("authIndexType", "service")
            .append_pair("authIndexValue", &self.config.auth_index_value)
            .append_pair("goto", goto);
        Ok(url)
    }

    async fn init_authentication(&mut self, goto: &str) -> Result<AuthStep> {
        let step = LoginStep::InitAuthentication;
        let request = self
            .client
            .post(self.authenticate_url(goto)?)
            .header("accept-api-version", &self.config.accept_api_version)
            .json(&json!({}));
        let response = self.send(request, step).await?;
        let auth: AuthStep = read_json(ensure_success(response, step).await?, step).await?;
        debug!(
            has_auth_id = auth.auth_id.is_some(),
            callbacks = auth.callbacks.len(),
            "authentication tree started"
        );
        Ok(auth)
    }

    /// Returns the `successUrl` of the final step, if any.
    async fn submit_credentials(
        &mut self,
        mut challenge: AuthStep,
        goto: &str,
        fillers: &CallbackFillers,
        credentials: &LoginCredentials,
    ) -> Result<Option<String>> {
        let step = LoginStep::SubmitCredentials;
        let auth_id = challenge
            .auth_id
            .take()
            .ok_or_else(|| Error::oauth2(step, "missing authId"))?;
        fillers.fill(&mut challenge.callbacks, credentials)?;

        let submission = AuthSubmission {
            auth_id: &auth_id,
            callbacks: &challenge.callbacks,
        };
        let request = self
            .client
            .post(self.authenticate_url(goto)?)
            .header("accept-api-version", &self.config.accept_api_version)
            .json(&submission);
        let response = self.send(request, step).await?;
        let result: AuthStep = read_json(ensure_success(response, step).await?, step).await?;

        if result.token_id.is_none() && result.auth_id.is_some() {
            return Err(Error::oauth2(
                step,
                "identity provider asked for another authentication stage",
            ));
        }
        info!(realm = result.realm.as_deref().unwrap_or(""), "credentials accepted");
        Ok(result.success_url)
    }

    /// Follow redirects from `start` until a 2xx page.
    ///
    /// With `expected_state`, a redirect to our `redirect_uri` carrying `code`
    /// ends the walk and yields the code. Its `state` must match.
    async fn follow_redirects(
        &mut self,
        start: &str,
        expected_state: Option<&str>,
    ) -> Result<Option<String>> {
        let step = LoginStep::Complete;
        let mut current = Url::parse(start)
            .map_err(|e| Error::oauth2(step, format!("invalid continuation url: {e}")))?;

        for hop in 0..self.config.max_redirects {
            let response = self.send(self.client.get(current.clone()), step).await?;
            let status = response.status();

            if status.is_success() {
                debug!(hops = hop, "redirect chain completed");
                return Ok(None);
            }
            if !status.is_redirection() {
                return Err(Error::oauth2(step, format!("{} returned {status}", current.path())));
            }

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| Error::oauth2(step, format!("{status} without Location")))?;
            let next = current
                .join(location)
                .map_err(|e| Error::oauth2(step, format!("invalid Location {location}: {e}")))?;

            if next.as_str().starts_with(&self.config.redirect_uri) {
                if let Some(error) = query_param(&next, "error") {
                    return Err(Error::oauth2(
                        step,
                        format!("identity provider returned error: {error}"),
                    ));
                }
                if let Some(expected) = expected_state
                    && let Some(code) = query_param(&next, "code")
                {
                    if query_param(&next, "state").as_deref() != Some(expected) {
                        return Err(Error::oauth2(
                            step,
                            "state mismatch on authorization redirect",
                        ));
                    }
                    debug!(hops = hop + 1, "authorization code addressed to client");
                    return Ok(Some(code));
                }
            }
            debug!(hop, status = status.as_u16(), path = next.path(), "following redirect");
            current = next;
        }

        Err(Error::oauth2(
            step,
            format!("more than {} redirects", self.config.max_redirects),
        ))
    }

    async fn fetch_session(&mut self, step: LoginStep) -> Result<Value> {
        let response = self.send(self.client.get(&self.config.session_url), step).await?;
        read_json(ensure_success(response, step).await?, step).await
    }

    /// Read tokens from the portal session; lifetime is fixed.
    async fn verify_session(&mut self) -> Result<(TokenSet, Value)> {
        let step = LoginStep::VerifySession;
        let payload = self.fetch_session(step).await?;
        let user = payload
            .get("user")
            .filter(|u| u.is_object())
            .ok_or_else(|| Error::oauth2(step, "session has no user"))?;

        let access_token = user
            .get("accessToken")
            .and_then(Value::as_str)
            .unwrap_or(SESSION_BASED_TOKEN)
            .to_string();
        let id_token = user
            .get("idToken")
            .and_then(Value::as_str)
            .map(str::to_string);

        if let Some(claimed) = user.get("expires").and_then(Value::as_str) {
            match claimed.parse::<DateTime<Utc>>() {
                Ok(at) => debug!(
                    claimed_expiry = %at,
                    claimed_secs = (at - Utc::now()).num_seconds(),
                    "ignoring server-claimed session expiry"
                ),
                Err(e) => debug!(claimed, error = %e, "unparseable session expiry"),
            }
        }

        Ok((TokenSet::session_based(access_token, id_token), payload))
    }

    /// Give the portal time to propagate the new session, then check it
    /// again. Failures are logged only.
    async fn revalidate_session(&mut self) {
        let delay = self.config.session_propagation_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.fetch_session(LoginStep::VerifySession).await {
            Ok(payload) if payload.get("user").is_some_and(Value::is_object) => {
                debug!("session confirmed after propagation delay");
            }
            Ok(_) => warn!("session lost its user after propagation delay"),
            Err(e) => warn!(error = %e, "session revalidation failed"),
        }
    }

    /// Session document after a code exchange; informational only.
    async fn optional_session(&mut self) -> Option<Value> {
        match self.fetch_session(LoginStep::VerifySession).await {
            Ok(payload) if payload.get("user").is_some() => Some(payload),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "no portal session after code exchange");
                None
            }
        }
    }
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

async fn ensure_success(response: Response, step: LoginStep) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));
    Err(Error::oauth2(step, format!("{status}: {}", truncate(&body, 200))))
}

async fn read_json<T: DeserializeOwned>(response: Response, step: LoginStep) -> Result<T> {
    let body = response
        .text()
        .await
        .map_err(|e| Error::Http(format!("{step} body read failed: {e}")))?;
    serde_json::from_str(&body)
        .map_err(|e| Error::oauth2(step, format!("malformed JSON: {e}")))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
