//! Error types for uos-linker.

use serde::Serialize;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Role admin error: {0}")]
    RoleAdmin(#[from] RoleAdminError),

    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("Server error: {0}")]
    Server(String),
}

/// Failure classes surfaced to callers at the command and HTTP boundaries.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    UpstreamUnavailable,
    VerificationFailed,
    PermissionDenied,
    InvalidInput,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::VerificationFailed => "verification_failed",
            Self::PermissionDenied => "permission_denied",
            Self::InvalidInput => "invalid_input",
            Self::Internal => "internal",
        }
    }

    /// Whether the failure is an expected domain outcome rather than a fault.
    pub fn is_domain(self) -> bool {
        !matches!(self, Self::Internal)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::Server(_) => ErrorKind::Internal,
            Self::Database(e) => e.kind(),
            Self::Chain(e) => e.kind(),
            Self::Platform(e) => e.kind(),
            Self::Link(e) => e.kind(),
            Self::RoleAdmin(e) => e.kind(),
            Self::Reconcile(e) => e.kind(),
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[cfg(feature = "libsql")]
    #[error("LibSQL error: {0}")]
    LibSql(#[from] libsql::Error),
}

impl DatabaseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Constraint(_) => ErrorKind::Conflict,
            _ => ErrorKind::Internal,
        }
    }
}

/// Errors talking to blockchain read endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("No chain endpoints configured")]
    NoEndpoints,

    #[error("Request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    #[error("Endpoint {endpoint} answered HTTP {status}: {body}")]
    HttpStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Failed to decode chain response: {0}")]
    Decode(String),

    #[error("Pagination of {table} stalled at key {key}")]
    PaginationStalled { table: String, key: String },

    #[error("All {attempts} chain endpoints failed, last error: {last}")]
    Exhausted { attempts: usize, last: Box<ChainError> },
}

impl ChainError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::UpstreamUnavailable
    }
}

/// Errors from the chat platform capability.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("Permission denied changing role {role_id}: {reason}")]
    PermissionDenied { role_id: String, reason: String },

    #[error("Rate limited by platform, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Unexpected platform response HTTP {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

impl PlatformError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::RateLimited { .. } | Self::UnexpectedStatus { .. } | Self::Http(_) => {
                ErrorKind::UpstreamUnavailable
            }
        }
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(e: reqwest::Error) -> Self {
        PlatformError::Http(e.to_string())
    }
}

/// Errors from the account linking flow.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Signature failed to validate correctly, obtain a new url through Discord.")]
    VerificationFailed,

    #[error("{0}")]
    InvalidInput(String),

    #[error("Failed to make internal request for blockchain accounts.")]
    Upstream(#[source] ChainError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
}

impl LinkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::VerificationFailed => ErrorKind::VerificationFailed,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Upstream(_) => ErrorKind::UpstreamUnavailable,
            Self::Database(e) => e.kind(),
            Self::Platform(e) => e.kind(),
        }
    }
}

/// Errors from role rule administration.
#[derive(Debug, thiserror::Error)]
pub enum RoleAdminError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("Failed to look up factory on chain: {0}")]
    Upstream(#[source] ChainError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl RoleAdminError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Upstream(_) => ErrorKind::UpstreamUnavailable,
            Self::Database(e) => e.kind(),
        }
    }
}

/// Errors that abort one user's reconciliation cycle before any role changes.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Failed to read {what} for {blockchain_id}: {source}")]
    Snapshot {
        what: &'static str,
        blockchain_id: String,
        #[source]
        source: ChainError,
    },

    #[error("Failed to load role rules: {0}")]
    Rules(#[source] DatabaseError),

    #[error("Failed to load member roles: {0}")]
    Member(#[source] PlatformError),
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Snapshot { .. } => ErrorKind::UpstreamUnavailable,
            Self::Rules(e) => e.kind(),
            Self::Member(e) => e.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
