//! Protocol sessions: login state, lockout and authorization level.

mod auth;
pub mod password;


pub use auth::{Authenticator, Credentials, NewRegistrar, create_registrar};

use crate::error::{FlowError, FlowResult};
use crate::model::new_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthorizationLevel {
    #[default]
    None,
    Registrar,
    Superuser,
}

/// How the connection reached the registry. Superuser rights come only from
/// the administrative path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessPath {
    #[default]
    Registrar,
    Administrative,
}

/// Per-connection state. Owned by the connection task; never shared.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    client_id: Option<String>,
    authorization_level: AuthorizationLevel,
    failed_login_count: u32,
    protocol_version: Option<String>,
    language: Option<String>,
    access_path: AccessPath,
}

impl Session {
    pub fn new(access_path: AccessPath) -> Self {
        Self {
            id: new_id(),
            client_id: None,
            authorization_level: AuthorizationLevel::None,
            failed_login_count: 0,
            protocol_version: None,
            language: None,
            access_path,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub const fn is_logged_in(&self) -> bool {
        self.client_id.is_some()
    }

    pub fn current_client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// The logged-in client id, or `NotLoggedIn`.
    pub fn require_client_id(&self) -> FlowResult<&str> {
        self.current_client_id().ok_or(FlowError::NotLoggedIn)
    }

    pub const fn authorization_level(&self) -> AuthorizationLevel {
        self.authorization_level
    }

    pub fn is_superuser(&self) -> bool {
        self.authorization_level == AuthorizationLevel::Superuser
    }

    pub const fn failed_login_count(&self) -> u32 {
        self.failed_login_count
    }

    pub const fn access_path(&self) -> AccessPath {
        self.access_path
    }

    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn logout(&mut self) -> FlowResult<()> {
        if self.client_id.take().is_none() {
            return Err(FlowError::NotLoggedIn);
        }
        self.authorization_level = AuthorizationLevel::None;
        Ok(())
    }

    fn record_failed_login(&mut self) {
        self.failed_login_count = self.failed_login_count.saturating_add(1);
    }

    fn complete_login(&mut self, client_id: &str, version: &str, language: &str) {
        self.failed_login_count = 0;
        self.client_id = Some(client_id.to_string());
        self.protocol_version = Some(version.to_string());
        self.language = Some(language.to_string());
        self.authorization_level = match self.access_path {
            AccessPath::Administrative => AuthorizationLevel::Superuser,
            AccessPath::Registrar => AuthorizationLevel::Registrar,
        };
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(AccessPath::Registrar)
    }
}
