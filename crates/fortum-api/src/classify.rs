//! Response classification for portal API calls
//!
//! Decides which requests carry a bearer token and maps HTTP status plus
//! body to a result. Session and RPC endpoints authenticate with cookies
//! only; sending them an `Authorization` header breaks the portal.

use fortum_auth::SessionSnapshot;

use crate::error::{Error, Result};
use crate::rpc;

/// URL fragments of endpoints that authenticate by session cookie.
pub const DEFAULT_SESSION_PATTERNS: &[&str] = &["/api/trpc/", "/api/auth/session"];

const MAX_BODY_IN_ERROR: usize = 500;

pub fn is_session_endpoint(url: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| url.contains(p.as_str()))
}

/// Access token to send as bearer, if any.
///
/// Never for session endpoints, never for session-based tokens.
pub fn bearer_token<'a>(
    url: &str,
    patterns: &[String],
    session: &'a SessionSnapshot,
) -> Option<&'a str> {
    if is_session_endpoint(url, patterns) || session.session_based {
        return None;
    }
    session.access_token.as_deref().filter(|t| !t.is_empty())
}

/// Map a response to its body or a typed error.
pub fn check_response(status: u16, body: String) -> Result<String> {
    match status {
        200..=299 if body.trim().is_empty() => {
            Err(Error::InvalidResponse("empty response from API".into()))
        }
        200..=299 => Ok(body),
        401 => Err(Error::TokenExpired),
        403 => Err(Error::Forbidden(truncate(&body))),
        500..=599 => Err(rpc::range_error(&body).unwrap_or_else(|| Error::UnexpectedStatus {
            status,
            body: truncate(&body),
        })),
        _ => Err(Error::UnexpectedStatus {
            status,
            body: truncate(&body),
        }),
    }
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_BODY_IN_ERROR) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
