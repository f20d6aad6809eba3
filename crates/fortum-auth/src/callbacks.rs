//! ForgeRock authentication-tree challenge/response
//!
//! The authenticate endpoint answers with an `authId` and a list of typed
//! callbacks. We fill the ones we know through a registry keyed by callback
//! `type` and echo the rest untouched.

use std::collections::HashMap;
use std::fmt;

use common::Secret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, LoginStep, Result};

/// Username and password for the portal account.
#[derive(Clone)]
pub struct LoginCredentials {
    pub username: String,
    pub password: Secret<String>,
}

impl LoginCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Secret::new(password.into()),
        }
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &self.password)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackField {
    pub name: String,
    pub value: Value,
}

impl CallbackField {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One callback of an authentication step. Filled inputs hold the password,
/// so filled callbacks are serialized but never logged.
#[derive(Clone, Serialize, Deserialize)]
pub struct Callback {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub output: Vec<CallbackField>,
    #[serde(default)]
    pub input: Vec<CallbackField>,
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Response of the authenticate endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStep {
    #[serde(default)]
    pub auth_id: Option<String>,
    #[serde(default)]
    pub callbacks: Vec<Callback>,
    #[serde(default)]
    pub success_url: Option<String>,
    #[serde(default)]
    pub token_id: Option<String>,
    #[serde(default)]
    pub realm: Option<String>,
}

/// Request body answering an `AuthStep`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSubmission<'a> {
    pub auth_id: &'a str,
    pub callbacks: &'a [Callback],
}

/// What a filler puts into its callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackRole {
    Username,
    Password,
}

type FillFn = dyn Fn(&mut Callback, &LoginCredentials) + Send + Sync;

struct Filler {
    role: CallbackRole,
    fill: Box<FillFn>,
}

/// Registry of callback fillers keyed by callback `type`.
pub struct CallbackFillers {
    fillers: HashMap<String, Filler>,
}

impl fmt::Debug for CallbackFillers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.fillers.keys()).finish()
    }
}

impl CallbackFillers {
    pub fn empty() -> Self {
        Self {
            fillers: HashMap::new(),
        }
    }

    /// Fillers for the consumer login tree with configurable input names.
    pub fn standard(username_field: &str, password_field: &str) -> Self {
        let mut registry = Self::empty();

        let field = username_field.to_string();
        registry.register("StringAttributeInputCallback", CallbackRole::Username, move |cb, creds| {
            cb.input = vec![
                CallbackField::new(field.clone(), creds.username.clone()),
                CallbackField::new(format!("{field}validateOnly"), false),
            ];
        });

        let field = username_field.to_string();
        registry.register("NameCallback", CallbackRole::Username, move |cb, creds| {
            cb.input = vec![CallbackField::new(field.clone(), creds.username.clone())];
        });

        let field = password_field.to_string();
        registry.register("PasswordCallback", CallbackRole::Password, move |cb, creds| {
            cb.input = vec![CallbackField::new(
                field.clone(),
                creds.password.expose().clone(),
            )];
        });

        registry
    }

    /// Add or replace the filler for a callback type.
    pub fn register<F>(&mut self, kind: impl Into<String>, role: CallbackRole, fill: F)
    where
        F: Fn(&mut Callback, &LoginCredentials) + Send + Sync + 'static,
    {
        self.fillers.insert(
            kind.into(),
            Filler {
                role,
                fill: Box::new(fill),
            },
        );
    }

    pub fn knows(&self, kind: &str) -> bool {
        self.fillers.contains_key(kind)
    }

    /// Fill every known callback in place.
    ///
    /// The step must offer at least one username and one password callback;
    /// unknown callback types are left as received.
    pub fn fill(&self, callbacks: &mut [Callback], credentials: &LoginCredentials) -> Result<()> {
        let mut filled_username = false;
        let mut filled_password = false;

        for callback in callbacks.iter_mut() {
            match self.fillers.get(&callback.kind) {
                Some(filler) => {
                    (filler.fill)(callback, credentials);
                    match filler.role {
                        CallbackRole::Username => filled_username = true,
                        CallbackRole::Password => filled_password = true,
                    }
                    debug!(callback = %callback.kind, role = ?filler.role, "filled callback");
                }
                None => debug!(callback = %callback.kind, "leaving unknown callback untouched"),
            }
        }

        if !filled_username {
            return Err(Error::oauth2(
                LoginStep::InitAuthentication,
                "authentication step offers no username callback",
            ));
        }
        if !filled_password {
            return Err(Error::oauth2(
                LoginStep::InitAuthentication,
                "authentication step offers no password callback",
            ));
        }
        Ok(())
    }
}
