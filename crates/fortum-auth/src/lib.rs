//! Fortum portal authentication library
//!
//! Logs in to the Fortum customer portal through its ForgeRock SSO, keeps
//! the resulting session valid, and hands consistent session snapshots to
//! the data client. No dependency on the poller binary; the HTTP client
//! comes from an injected `provider::HttpClientFactory`.
//!
//! Session flow:
//! 1. `Authenticator::authenticate()` runs `login::LoginSequencer`
//! 2. The sequencer walks portal sign-in, the callback tree and the
//!    redirect chain, collecting cookies on the way
//! 3. Tokens come from the portal session endpoint (session-based, fixed
//!    900 s lifetime) or from an authorization code exchange
//! 4. The new `session::SessionState` is swapped in whole
//! 5. `monitor` renews shortly before expiry in the background
//! 6. `Authenticator::refresh()` renews on demand: refresh grant for OAuth
//!    tokens, a full login for session-based ones

pub mod authenticator;
pub mod callbacks;
pub mod clock;
pub mod config;
pub mod constants;
pub mod cookies;
pub mod error;
pub mod login;
pub mod monitor;
pub mod pkce;
pub mod session;
pub mod token;

pub use authenticator::{Authenticator, AuthenticatorBuilder};
pub use callbacks::{CallbackFillers, CallbackRole, LoginCredentials};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{AuthConfig, LoginFlow};
pub use constants::*;
pub use cookies::{CapturedCookie, SessionCookies, merge_prioritized};
pub use error::{Error, LoginStep, Result};
pub use login::{LoginOutcome, LoginSequencer};
pub use monitor::{RenewalDecision, RenewalPolicy};
pub use session::{SessionSnapshot, SessionState};
pub use token::{TokenSet, decode_unverified_claims};
