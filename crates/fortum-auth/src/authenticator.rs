//! Token store and refresher
//!
//! `Authenticator` owns the session state for one portal account. Login and
//! refresh are serialized behind a gate: callers record the generation they
//! saw, and if a concurrent caller installed a fresh token while they waited
//! they reuse it instead of hitting the network again.
//!
//! Session-based tokens (refresh token `"session_based"`) cannot use the
//! refresh grant, so renewing them re-runs the whole login sequence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use provider::{DEFAULT_TIMEOUT, HttpClientFactory, ReqwestClientFactory};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::callbacks::{CallbackFillers, LoginCredentials};
use crate::clock::{Clock, TokioClock};
use crate::config::AuthConfig;
use crate::cookies::SessionCookies;
use crate::error::{Error, Result};
use crate::login::LoginSequencer;
use crate::monitor::{BoxFuture, MonitorHandle, RenewalPolicy, RenewalTarget, spawn_renewal_monitor};
use crate::session::{SessionSnapshot, SessionState};
use crate::token::{self, TokenSet};

fn record_renewal(kind: &'static str, outcome: &'static str) {
    metrics::counter!("fortum_auth_renewals_total", "kind" => kind, "outcome" => outcome)
        .increment(1);
}

pub struct AuthenticatorBuilder {
    credentials: LoginCredentials,
    config: AuthConfig,
    factory: Option<Arc<dyn HttpClientFactory>>,
    clock: Arc<dyn Clock>,
    policy: RenewalPolicy,
    fillers: Option<CallbackFillers>,
    background_renewal: bool,
}

impl AuthenticatorBuilder {
    pub fn config(mut self, config: AuthConfig) -> Self {
        self.config = config;
        self
    }

    pub fn factory(mut self, factory: Arc<dyn HttpClientFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(mut self, policy: RenewalPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the standard username/password callback fillers.
    pub fn fillers(mut self, fillers: CallbackFillers) -> Self {
        self.fillers = Some(fillers);
        self
    }

    /// Spawn the renewal monitor after the first successful login (default on).
    pub fn background_renewal(mut self, enabled: bool) -> Self {
        self.background_renewal = enabled;
        self
    }

    pub fn build(self) -> Result<Arc<Authenticator>> {
        self.config.validate()?;
        if self.credentials.username.trim().is_empty() {
            return Err(Error::Configuration("username must not be empty".into()));
        }

        let config = Arc::new(self.config);
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(ReqwestClientFactory::new(DEFAULT_TIMEOUT)));
        let mut sequencer = LoginSequencer::new(config.clone(), factory.clone());
        if let Some(fillers) = self.fillers {
            sequencer = sequencer.with_fillers(fillers);
        }

        Ok(Arc::new_cyclic(|me| Authenticator {
            me: me.clone(),
            credentials: self.credentials,
            config,
            factory,
            sequencer,
            clock: self.clock,
            policy: self.policy,
            background_renewal: self.background_renewal,
            state: RwLock::new(SessionState::default()),
            refresh_gate: Mutex::new(()),
            monitor: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct Authenticator {
    me: Weak<Authenticator>,
    credentials: LoginCredentials,
    config: Arc<AuthConfig>,
    factory: Arc<dyn HttpClientFactory>,
    sequencer: LoginSequencer,
    clock: Arc<dyn Clock>,
    policy: RenewalPolicy,
    background_renewal: bool,
    state: RwLock<SessionState>,
    /// Serializes login and refresh
    refresh_gate: Mutex<()>,
    monitor: Mutex<Option<MonitorHandle>>,
    /// Set by `shutdown`; the monitor is never restarted afterwards
    closed: AtomicBool,
}

impl Authenticator {
    pub fn builder(credentials: LoginCredentials) -> AuthenticatorBuilder {
        AuthenticatorBuilder {
            credentials,
            config: AuthConfig::default(),
            factory: None,
            clock: Arc::new(TokioClock),
            policy: RenewalPolicy::default(),
            fillers: None,
            background_renewal: true,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    /// Run the full login sequence and install the resulting session.
    ///
    /// Returns the already installed session if a concurrent caller
    /// logged in while this one waited for the gate.
    pub async fn authenticate(&self) -> Result<SessionSnapshot> {
        let observed = self.state.read().await.generation;
        let gate = self.refresh_gate.lock().await;
        if let Some(fresh) = self.fresh_since(observed).await {
            return Ok(fresh);
        }

        let snapshot = self.login_locked().await?;
        drop(gate);
        self.start_monitoring().await;
        Ok(snapshot)
    }

    /// Renew the current token.
    pub async fn refresh(&self) -> Result<SessionSnapshot> {
        let observed = self.state.read().await.generation;
        self.refresh_if_current(observed).await
    }

    /// Renew the token unless the session moved past `generation` already.
    ///
    /// The data client passes the generation of the snapshot that got a
    /// 401, so concurrent 401s result in a single renewal.
    pub async fn refresh_if_current(&self, generation: u64) -> Result<SessionSnapshot> {
        let snapshot = self.refresh_session(generation).await?;
        self.start_monitoring().await;
        Ok(snapshot)
    }

    /// Snapshot of a session that is valid right now, logging in or
    /// refreshing first when needed.
    pub async fn ensure_valid(&self) -> Result<SessionSnapshot> {
        let (has_token, expired, generation) = {
            let state = self.state.read().await;
            (
                state.token_set.is_some(),
                state.is_expired(self.clock.now(), Duration::ZERO),
                state.generation,
            )
        };

        if !has_token {
            debug!("no session installed, logging in");
            return self.authenticate().await;
        }
        if expired {
            debug!("session expired, renewing");
            return self.refresh_if_current(generation).await;
        }
        Ok(self.snapshot().await)
    }

    /// Install an existing token set without logging in.
    pub async fn resume(
        &self,
        tokens: TokenSet,
        cookies: SessionCookies,
        session_payload: Option<Value>,
    ) -> SessionSnapshot {
        let snapshot = {
            let _gate = self.refresh_gate.lock().await;
            self.install(tokens, cookies, session_payload).await
        };
        self.start_monitoring().await;
        snapshot
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.read().await.snapshot()
    }

    pub async fn is_token_expired(&self, buffer: Duration) -> bool {
        self.state.read().await.is_expired(self.clock.now(), buffer)
    }

    /// Remaining token lifetime, `None` while no token is installed.
    pub async fn time_until_expiry(&self) -> Option<Duration> {
        self.state.read().await.remaining(self.clock.now())
    }

    pub async fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the renewal monitor, wait for it, and clear the session.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let handle = self.monitor.lock().await.take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }

        let mut state = self.state.write().await;
        *state = SessionState {
            generation: state.generation,
            ..SessionState::default()
        };
        info!(username = %self.credentials.username, "authenticator shut down");
    }

    /// Session installed after `observed` that is still valid.
    async fn fresh_since(&self, observed: u64) -> Option<SessionSnapshot> {
        let state = self.state.read().await;
        if state.generation != observed && !state.is_expired(self.clock.now(), Duration::ZERO) {
            debug!(
                generation = state.generation,
                "session renewed concurrently, reusing it"
            );
            return Some(state.snapshot());
        }
        None
    }

    async fn refresh_session(&self, observed: u64) -> Result<SessionSnapshot> {
        let _gate = self.refresh_gate.lock().await;
        if let Some(fresh) = self.fresh_since(observed).await {
            return Ok(fresh);
        }

        let current = self
            .state
            .read()
            .await
            .token_set
            .clone()
            .ok_or(Error::NotAuthenticated)?;

        if current.is_session_based() {
            debug!("session-based token, renewing with a full login");
            return self.login_locked().await;
        }

        let client = self
            .factory
            .build_client()
            .map_err(|e| Error::Http(e.to_string()))?;

        match token::refresh_token(&client, &self.config, &current).await {
            Ok(tokens) => {
                record_renewal("refresh", "success");
                let (cookies, payload) = {
                    let state = self.state.read().await;
                    (state.cookies.clone(), state.session_payload.clone())
                };
                let snapshot = self.install(tokens, cookies, payload).await;
                info!(generation = snapshot.generation, "token refreshed");
                Ok(snapshot)
            }
            Err(e) => {
                record_renewal("refresh", "failure");
                warn!(error = %e, "token refresh failed");
                Err(e)
            }
        }
    }

    /// Run the login sequence. Caller holds the gate.
    async fn login_locked(&self) -> Result<SessionSnapshot> {
        info!(username = %self.credentials.username, "logging in");
        match self.sequencer.run(&self.credentials).await {
            Ok(outcome) => {
                record_renewal("login", "success");
                let snapshot = self
                    .install(outcome.tokens, outcome.cookies, outcome.session_payload)
                    .await;
                info!(
                    generation = snapshot.generation,
                    session_based = snapshot.session_based,
                    cookies = snapshot.cookies.len(),
                    "login succeeded"
                );
                Ok(snapshot)
            }
            Err(e) => {
                record_renewal("login", "failure");
                warn!(error = %e, "login failed");
                Err(e.into_authentication())
            }
        }
    }

    async fn install(
        &self,
        tokens: TokenSet,
        cookies: SessionCookies,
        session_payload: Option<Value>,
    ) -> SessionSnapshot {
        let mut state = self.state.write().await;
        let next = state.install(tokens, cookies, session_payload, self.clock.now());
        *state = next;
        state.snapshot()
    }

    /// Spawn the monitor if it is not running, otherwise wake it so it
    /// re-reads the new expiry.
    async fn start_monitoring(&self) {
        if !self.background_renewal {
            return;
        }
        let mut slot = self.monitor.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        match slot.as_ref() {
            Some(handle) if !handle.is_finished() => handle.wake(),
            _ => {
                debug!("starting token renewal monitor");
                *slot = Some(spawn_renewal_monitor(self.me.clone(), self.policy));
            }
        }
    }
}

impl RenewalTarget for Authenticator {
    fn time_until_expiry(&self) -> BoxFuture<'_, Option<Duration>> {
        Box::pin(async move { self.state.read().await.remaining(self.clock.now()) })
    }

    fn renew(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let observed = self.state.read().await.generation;
            self.refresh_session(observed).await.map(|_| ())
        })
    }
}

impl Drop for Authenticator {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor.get_mut().take() {
            handle.cancel();
        }
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("username", &self.credentials.username)
            .field("flow", &self.config.flow)
            .field("provider", &self.factory.id())
            .finish_non_exhaustive()
    }
}
