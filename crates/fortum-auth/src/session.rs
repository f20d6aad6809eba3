//! Token store state
//!
//! `SessionState` values are immutable snapshots. Login and refresh build a
//! complete successor with `SessionState::install` and the authenticator
//! swaps it in under one write lock, so readers never observe a token set
//! paired with another token set's expiry or cookies.

use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::constants::FIXED_TOKEN_LIFETIME;
use crate::cookies::SessionCookies;
use crate::token::TokenSet;

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub token_set: Option<TokenSet>,
    /// Derived from `token_set.expires_in` at install time
    pub expiry: Option<Instant>,
    pub cookies: SessionCookies,
    /// Portal session document (`user.customerId`, `user.deliverySites`, ...)
    pub session_payload: Option<Value>,
    /// Bumped on every install; used to detect concurrent renewals
    pub generation: u64,
}

impl SessionState {
    /// Successor state holding `tokens`, valid from `now`.
    pub fn install(
        &self,
        tokens: TokenSet,
        cookies: SessionCookies,
        session_payload: Option<Value>,
        now: Instant,
    ) -> SessionState {
        let expiry = now
            .checked_add(tokens.lifetime())
            .or_else(|| now.checked_add(FIXED_TOKEN_LIFETIME));
        SessionState {
            expiry,
            token_set: Some(tokens),
            cookies,
            session_payload,
            generation: self.generation + 1,
        }
    }

    /// `now >= expiry - buffer`. Without a token the state is always expired.
    pub fn is_expired(&self, now: Instant, buffer: Duration) -> bool {
        match self.expiry {
            Some(expiry) => now.checked_add(buffer).is_none_or(|edge| edge >= expiry),
            None => true,
        }
    }

    /// Remaining lifetime, zero once expired, `None` without a token.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expiry.map(|expiry| expiry.saturating_duration_since(now))
    }

    pub fn is_session_based(&self) -> bool {
        self.token_set
            .as_ref()
            .is_some_and(TokenSet::is_session_based)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            access_token: self.token_set.as_ref().map(|t| t.access_token.clone()),
            id_token: self.token_set.as_ref().and_then(|t| t.id_token.clone()),
            session_based: self.is_session_based(),
            cookies: self.cookies.clone(),
            session_payload: self.session_payload.clone(),
            generation: self.generation,
        }
    }
}

/// What the data client needs from the token store for one request.
#[derive(Clone)]
pub struct SessionSnapshot {
    pub access_token: Option<String>,
    pub id_token: Option<String>,
    pub session_based: bool,
    pub cookies: SessionCookies,
    pub session_payload: Option<Value>,
    pub generation: u64,
}

impl std::fmt::Debug for SessionSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSnapshot")
            .field("has_access_token", &self.access_token.is_some())
            .field("session_based", &self.session_based)
            .field("cookies", &self.cookies)
            .field("generation", &self.generation)
            .finish()
    }
}
