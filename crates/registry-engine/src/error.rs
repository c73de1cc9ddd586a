//! Flow errors surfaced to registrars.

use registry_core::db::DatabaseError;
use thiserror::Error;

use crate::model::{GracePeriodType, ResourceKind, StatusValue};

pub type FlowResult<T> = Result<T, FlowError>;

/// How an error should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad session state or unsupported request shape. Never retried.
    Protocol,
    /// Credential or ownership failure. Never retried.
    Authorization,
    /// Client-correctable object state.
    Precondition,
    /// Contention or timeout; retried locally before surfacing.
    Transient,
    /// Broken invariant or storage fault. Logged, transaction aborted.
    Internal,
}

impl ErrorClass {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Protocol => "protocol",
            Self::Authorization => "authorization",
            Self::Precondition => "precondition",
            Self::Transient => "transient",
            Self::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum FlowError {
    // Protocol
    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Already logged in")]
    AlreadyLoggedIn,

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Unimplemented object service: {0}")]
    UnimplementedObjectService(String),

    #[error("Unimplemented extension: {0}")]
    UnimplementedExtension(String),

    #[error("Password changes are not supported")]
    PasswordChangesNotSupported,

    #[error("Unimplemented command: {verb} on {object_type}")]
    UnimplementedCommand { object_type: String, verb: String },

    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    // Authentication and authorization
    #[error("Unknown registrar: {0}")]
    UnknownRegistrar(String),

    #[error("Registrar account is not active: {0}")]
    RegistrarNotActive(String),

    #[error("Registrar password is incorrect")]
    BadPassword,

    #[error("Registrar login failed too many times")]
    TooManyFailedLogins,

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Registrar is not authorized to act on this transfer")]
    UnauthorizedTransferAction,

    #[error("Registrar is not authorized for TLD {0}")]
    NotAuthorizedForTld(String),

    // Preconditions
    #[error("{kind} {id} not found")]
    NotFound { kind: ResourceKind, id: String },

    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: ResourceKind, id: String },

    #[error("Linked {kind} {id} does not exist")]
    LinkedResourceNotFound { kind: ResourceKind, id: String },

    #[error("Message {0} not found")]
    MessageNotFound(String),

    #[error("Resource is in use: {0}")]
    ResourceInUse(String),

    #[error("Resource is not eligible for transfer: {0}")]
    NotEligibleForTransfer(String),

    #[error("A transfer is already pending")]
    AlreadyPendingTransfer,

    #[error("No transfer is pending")]
    NotPendingTransfer,

    #[error("Resource has no transfer history")]
    NoTransferHistory,

    #[error("Registrar already sponsors this resource")]
    AlreadySponsored,

    #[error("Authorization information is incorrect")]
    BadAuthInfo,

    #[error("Grace period {0} has expired")]
    GracePeriodExpired(GracePeriodType),

    #[error("No {0} grace period on this resource")]
    NoGracePeriod(GracePeriodType),

    #[error("Status {0} prohibits this operation")]
    StatusProhibitsOperation(StatusValue),

    #[error("TLD is not served by this registry: {0}")]
    TldNotAllowed(String),

    #[error("Current expiration date is incorrect")]
    IncorrectCurrentExpirationDate,

    #[error("Registration period exceeds the maximum of 10 years")]
    ExceedsMaxRegistrationYears,

    #[error("Superordinate domain does not exist: {0}")]
    SuperordinateDomainNotFound(String),

    #[error("Host addresses do not match host type: {0}")]
    HostAddressMismatch(String),

    // Transient
    #[error("Transient storage failure: {0}")]
    Transient(DatabaseError),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    // Internal
    #[error("Storage failure: {0}")]
    Storage(DatabaseError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlowError {
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::NotLoggedIn
            | Self::AlreadyLoggedIn
            | Self::UnsupportedVersion(_)
            | Self::UnsupportedLanguage(_)
            | Self::UnimplementedObjectService(_)
            | Self::UnimplementedExtension(_)
            | Self::PasswordChangesNotSupported
            | Self::UnimplementedCommand { .. }
            | Self::MalformedCommand(_) => ErrorClass::Protocol,

            Self::UnknownRegistrar(_)
            | Self::RegistrarNotActive(_)
            | Self::BadPassword
            | Self::TooManyFailedLogins
            | Self::NotAuthorized(_)
            | Self::UnauthorizedTransferAction
            | Self::NotAuthorizedForTld(_) => ErrorClass::Authorization,

            Self::NotFound { .. }
            | Self::AlreadyExists { .. }
            | Self::LinkedResourceNotFound { .. }
            | Self::MessageNotFound(_)
            | Self::ResourceInUse(_)
            | Self::NotEligibleForTransfer(_)
            | Self::AlreadyPendingTransfer
            | Self::NotPendingTransfer
            | Self::NoTransferHistory
            | Self::AlreadySponsored
            | Self::BadAuthInfo
            | Self::GracePeriodExpired(_)
            | Self::NoGracePeriod(_)
            | Self::StatusProhibitsOperation(_)
            | Self::TldNotAllowed(_)
            | Self::IncorrectCurrentExpirationDate
            | Self::ExceedsMaxRegistrationYears
            | Self::SuperordinateDomainNotFound(_)
            | Self::HostAddressMismatch(_) => ErrorClass::Precondition,

            Self::Transient(_) | Self::ServiceUnavailable(_) => ErrorClass::Transient,

            Self::Storage(_) | Self::Internal(_) => ErrorClass::Internal,
        }
    }

    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Stored data contradicted a storage invariant.
    pub const fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::Storage(DatabaseError::Invariant(_)))
    }

    /// A transient error that outlived its retries becomes
    /// `ServiceUnavailable`; anything else passes through.
    #[must_use]
    pub fn exhausted(self) -> Self {
        if self.is_transient() {
            Self::ServiceUnavailable(self.to_string())
        } else {
            self
        }
    }

    pub fn not_found(kind: ResourceKind, id: &str) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<DatabaseError> for FlowError {
    fn from(e: DatabaseError) -> Self {
        if e.is_transient() {
            Self::Transient(e)
        } else {
            Self::Storage(e)
        }
    }
}

impl From<registry_core::Error> for FlowError {
    fn from(e: registry_core::Error) -> Self {
        Self::Internal(e.to_string())
    }
}
