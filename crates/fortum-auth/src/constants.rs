//! Fortum SSO constants
//!
//! Public client configuration of the Fortum web portal. None of these are
//! secrets; every endpoint can be overridden through `AuthConfig`.

use std::time::Duration;

/// Public OAuth client of the Swedish Fortum web portal
pub const CLIENT_ID: &str = "globalwebprod";

/// Portal callback registered for `CLIENT_ID`
pub const REDIRECT_URI: &str = "https://www.fortum.com/se/el/api/auth/callback/ciamprod";

pub const SCOPES: &str = "openid profile crmdata";

/// ACR value selecting the consumer web login journey
pub const ACR_VALUES: &str = "seb2cogwlogin";

pub const PORTAL_BASE: &str = "https://www.fortum.com/se/el";
pub const PROVIDERS_URL: &str = "https://www.fortum.com/se/el/api/auth/providers";
pub const CSRF_URL: &str = "https://www.fortum.com/se/el/api/auth/csrf";
pub const SIGNIN_URL: &str = "https://www.fortum.com/se/el/api/auth/signin/ciamprod";
pub const SESSION_URL: &str = "https://www.fortum.com/se/el/api/auth/session";
pub const POST_LOGIN_URL: &str = "https://www.fortum.com/se/el/inloggad/oversikt";

pub const DISCOVERY_URL: &str = "https://sso.fortum.com/.well-known/openid-configuration";
pub const AUTHENTICATE_URL: &str = "https://sso.fortum.com/am/json/realms/root/realms/alpha/authenticate";
pub const TOKEN_ENDPOINT: &str = "https://sso.fortum.com/am/oauth2/access_token";

/// Authentication tree used by the consumer portal
pub const AUTH_INDEX_VALUE: &str = "SeB2COGWLogin";
pub const LOCALE: &str = "sv";

/// Header value the ForgeRock authenticate endpoint expects
pub const ACCEPT_API_VERSION: &str = "protocol=1.0,resource=2.1";

/// Refresh-token sentinel marking a session-cookie login.
///
/// A token set carrying this value cannot be renewed with the refresh grant;
/// renewal re-runs the whole login sequence.
pub const SESSION_BASED_TOKEN: &str = "session_based";

/// Lifetime assumed for session-based tokens.
///
/// The portal reports session expiry hours ahead while the underlying access
/// token dies after 15 minutes, so the claimed value is ignored.
pub const FIXED_TOKEN_LIFETIME: Duration = Duration::from_secs(900);

/// Ceiling for a token endpoint's `expires_in`; longer claims are clamped.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

pub const BEARER: &str = "Bearer";
