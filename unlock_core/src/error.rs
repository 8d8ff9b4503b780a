use std::error::Error as StdError;
use uuid::Uuid;

/// Common error type for `unlock_core`.
///
/// Every variant except `Backend`/`BackendMessage` is a recoverable, caller-facing
/// condition. Backend implementations (Postgres, S3, filesystem) should preserve the
/// underlying error chain via `Error::backend`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wrong id, wrong tenant, or soft-deleted. Cross-tenant lookups land here too.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// A compare-and-swap write matched zero rows. Re-read and retry.
    #[error("concurrency conflict: {entity} {id} was modified after version {expected_version}")]
    ConcurrencyConflict {
        entity: &'static str,
        id: Uuid,
        expected_version: i64,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown budget dimension: platform='{platform}', dimension='{dimension}'")]
    UnknownBudgetDimension { platform: String, dimension: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("backend error: {0}")]
    BackendMessage(String),
}

impl Error {
    #[tracing::instrument(level = "debug", name = "unlock.error.backend", skip(source))]
    pub fn backend(
        context: impl Into<String> + std::fmt::Debug,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub fn invalid_transition(
        entity: &'static str,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn conflict_at(entity: &'static str, id: Uuid, expected_version: i64) -> Self {
        Self::ConcurrencyConflict {
            entity,
            id,
            expected_version,
        }
    }

    /// True when the caller should re-read current state and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
