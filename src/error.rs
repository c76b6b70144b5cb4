//! Error taxonomy for the sync engine.
//!
//! Provider failures are recovered close to where they happen (the step or
//! window is skipped and the next tick retries). Catalog and connection
//! failures travel up to the task.

use sea_orm::DbErr;

/// Failure talking to an external data provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("transport error from {provider}: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} rate limited the request")]
    RateLimited { provider: &'static str },
    #[error("{provider} API error {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("failed to decode {provider} response: {message}")]
    Decode {
        provider: &'static str,
        message: String,
    },
}

impl ProviderError {
    pub fn transport(provider: &'static str, source: reqwest::Error) -> Self {
        Self::Transport { provider, source }
    }

    pub fn decode(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Decode {
            provider,
            message: message.into(),
        }
    }
}

/// Failure reported by the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// The store is unreachable; the whole task iteration is abandoned.
    #[error("database connection error: {0}")]
    Connection(String),
    /// A single statement failed; callers may continue with the next batch.
    #[error("database query error: {0}")]
    Query(String),
}

impl RepoError {
    pub fn is_connection(&self) -> bool {
        matches!(self, RepoError::Connection(_))
    }
}

impl From<DbErr> for RepoError {
    fn from(err: DbErr) -> Self {
        match err {
            DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => RepoError::Connection(err.to_string()),
            other => RepoError::Query(other.to_string()),
        }
    }
}

/// Invalid or missing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Error surfaced by a sync task iteration.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Repository(#[from] RepoError),
    #[error("failed to build entity resolver: {0}")]
    Resolver(#[source] RepoError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SyncError {
    /// Whether the next step of the same tick may still run.
    pub fn is_recoverable(&self) -> bool {
        match self {
            SyncError::Provider(_) => true,
            SyncError::Repository(e) => !e.is_connection(),
            SyncError::Resolver(_) | SyncError::Config(_) => false,
        }
    }
}
