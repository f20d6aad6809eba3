//! Set-Cookie capture and domain-priority merge
//!
//! The login sequence records every `Set-Cookie` header it sees. Portal
//! responses set the same cookie name both host-only and with an explicit
//! `Domain`; the domain-bound copy is the one the data API accepts, so it
//! wins over a domain-less copy regardless of arrival order.

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use reqwest::cookie::Cookie;
use tracing::debug;

/// One captured `Set-Cookie` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedCookie {
    pub name: String,
    pub value: String,
    /// `Domain` attribute without leading dot, `None` for host-only cookies
    pub domain: Option<String>,
    pub path: Option<String>,
    /// The server deletes the cookie (`Max-Age=0` or `Expires` in the past)
    pub removed: bool,
}

impl CapturedCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: Option<&str>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.map(str::to_string),
            path: None,
            removed: false,
        }
    }

    /// Capture a cookie as parsed by reqwest. `Max-Age` takes precedence
    /// over `Expires`.
    pub fn from_response_cookie(cookie: &Cookie<'_>, now: SystemTime) -> Self {
        let removed = match cookie.max_age() {
            Some(age) => age.is_zero(),
            None => cookie.expires().is_some_and(|at| at <= now),
        };
        Self {
            name: cookie.name().to_string(),
            value: cookie.value().trim_matches('"').to_string(),
            domain: cookie
                .domain()
                .map(|d| d.trim_start_matches('.').to_ascii_lowercase())
                .filter(|d| !d.is_empty()),
            path: cookie.path().map(str::to_string),
            removed,
        }
    }

    fn has_domain(&self) -> bool {
        self.domain.is_some()
    }
}

/// Merge cookies in arrival order: domain-bound beats host-only, later
/// beats earlier among equals.
pub fn merge_prioritized(cookies: impl IntoIterator<Item = CapturedCookie>) -> SessionCookies {
    let mut merged: BTreeMap<String, (bool, String)> = BTreeMap::new();
    for cookie in cookies {
        let existing_has_domain = merged.get(&cookie.name).map(|(d, _)| *d);
        if existing_has_domain == Some(true) && !cookie.has_domain() {
            continue;
        }
        if cookie.removed {
            merged.remove(&cookie.name);
            continue;
        }
        merged.insert(cookie.name.clone(), (cookie.has_domain(), cookie.value));
    }
    SessionCookies(
        merged
            .into_iter()
            .map(|(name, (_, value))| (name, value))
            .collect(),
    )
}

/// Name to value map sent as the `Cookie` header on data requests.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SessionCookies(BTreeMap<String, String>);

impl SessionCookies {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `a=1; b=2`, or `None` when empty.
    pub fn header_value(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        Some(
            self.0
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

impl FromIterator<(String, String)> for SessionCookies {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Debug for SessionCookies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

/// Collects `Set-Cookie` headers over one login sequence.
#[derive(Debug, Default)]
pub struct CookieRecorder {
    seen: Vec<CapturedCookie>,
}

impl CookieRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, response: &reqwest::Response) {
        let now = SystemTime::now();
        for cookie in response.cookies() {
            let cookie = CapturedCookie::from_response_cookie(&cookie, now);
            debug!(
                cookie = %cookie.name,
                domain = cookie.domain.as_deref().unwrap_or(""),
                removed = cookie.removed,
                "captured cookie"
            );
            self.seen.push(cookie);
        }
    }

    pub fn finish(self) -> SessionCookies {
        merge_prioritized(self.seen)
    }
}
