//! Registrar login and account administration.

use std::collections::BTreeSet;

use registry_core::config::SessionConfig;
use tracing::{info, instrument, warn};

use super::Session;
use super::password;
use crate::error::{FlowError, FlowResult};
use crate::model::{Registrar, RegistrarState};
use crate::storage::{NewRegistrarParams, RegistryDatabase};

/// What a registrar presents at login.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub client_id: String,
    pub password: String,
    pub new_password: Option<String>,
    /// Object service URIs the client intends to use.
    pub object_services: Vec<String>,
    pub extensions: Vec<String>,
}

pub struct Authenticator {
    db: RegistryDatabase,
    settings: SessionConfig,
}

impl Authenticator {
    pub const fn new(db: RegistryDatabase, settings: SessionConfig) -> Self {
        Self { db, settings }
    }

    /// Log `session` in.
    ///
    /// Checks run in a fixed order: session state, protocol negotiation,
    /// lockout, account, password. Only a password mismatch counts towards
    /// the lockout.
    #[instrument(skip(self, session, credentials), fields(session = %session.id(), client_id = %credentials.client_id))]
    pub async fn login(
        &self,
        session: &mut Session,
        credentials: &Credentials,
        version: &str,
        language: &str,
    ) -> FlowResult<()> {
        if session.is_logged_in() {
            return Err(FlowError::AlreadyLoggedIn);
        }
        self.negotiate(credentials, version, language)?;

        if session.failed_login_count() >= self.settings.max_failed_logins {
            warn!(
                failed = session.failed_login_count(),
                "Login refused after repeated failures"
            );
            return Err(FlowError::TooManyFailedLogins);
        }

        let registrar = self
            .db
            .find_registrar(&credentials.client_id)
            .await?
            .ok_or_else(|| FlowError::UnknownRegistrar(credentials.client_id.clone()))?;
        if registrar.state != RegistrarState::Active {
            return Err(FlowError::RegistrarNotActive(registrar.client_id));
        }

        if !password::verify_password(&credentials.password, &registrar.password_hash)? {
            session.record_failed_login();
            warn!(failed = session.failed_login_count(), "Bad registrar password");
            return Err(FlowError::BadPassword);
        }

        session.complete_login(&registrar.client_id, version, language);
        info!(level = ?session.authorization_level(), "Registrar logged in");
        Ok(())
    }

    fn negotiate(&self, credentials: &Credentials, version: &str, language: &str) -> FlowResult<()> {
        if !self.settings.supported_versions.iter().any(|v| v == version) {
            return Err(FlowError::UnsupportedVersion(version.to_string()));
        }
        if !self.settings.supported_languages.iter().any(|l| l == language) {
            return Err(FlowError::UnsupportedLanguage(language.to_string()));
        }
        if let Some(service) = credentials
            .object_services
            .iter()
            .find(|s| !self.settings.object_services.contains(s))
        {
            return Err(FlowError::UnimplementedObjectService(service.clone()));
        }
        if let Some(extension) = credentials
            .extensions
            .iter()
            .find(|e| !self.settings.extensions.contains(e))
        {
            return Err(FlowError::UnimplementedExtension(extension.clone()));
        }
        if credentials.new_password.is_some() {
            return Err(FlowError::PasswordChangesNotSupported);
        }
        Ok(())
    }
}

/// A registrar account to create.
pub struct NewRegistrar<'a> {
    pub client_id: &'a str,
    pub password: &'a str,
    pub state: RegistrarState,
    pub iana_id: Option<i64>,
    pub allowed_tlds: BTreeSet<String>,
}

/// Create a registrar, storing an argon2id hash of its password.
pub async fn create_registrar(
    db: &RegistryDatabase,
    registrar: &NewRegistrar<'_>,
    now: i64,
) -> FlowResult<Registrar> {
    if db.find_registrar(registrar.client_id).await?.is_some() {
        return Err(FlowError::MalformedCommand(format!(
            "registrar {} already exists",
            registrar.client_id
        )));
    }
    let hash = password::hash_password(registrar.password)?;
    let created = db
        .create_registrar(&NewRegistrarParams {
            client_id: registrar.client_id,
            password_hash: &hash,
            state: registrar.state,
            iana_id: registrar.iana_id,
            allowed_tlds: &registrar.allowed_tlds,
            now,
        })
        .await?;
    info!(client_id = %created.client_id, state = %created.state, "Registrar created");
    Ok(created)
}
