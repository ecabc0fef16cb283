use crate::env::FetchEnv;
use crate::identity::SourceIdentity;
use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum FetchError {
    /// An error raised by the caller via `Plan::fail`, surfaced unchanged.
    #[error(transparent)]
    User(#[from] anyhow::Error),

    /// A source's response omitted identities the engine asked for.
    ///
    /// Fatal for the run. The environment captures the state at the point of
    /// failure, including the round that detected the omission.
    #[error("source '{source_name}' returned no value for {} requested identities", .identities.len())]
    MissingIdentity {
        /// Name of the source whose response was incomplete
        source_name: String,
        /// The identities that could not be resolved
        identities: Vec<SourceIdentity>,
        /// Environment at the point of failure, for diagnostics
        env: Box<FetchEnv>,
    },

    /// The fetch effect of a source failed outright.
    #[error("data source '{source_name}' failed: {error}")]
    Source {
        /// Name of the failing source
        source_name: String,
        /// The underlying error
        error: anyhow::Error,
    },

    /// Type confusion at a type-erased boundary. Indicates a defect, not a
    /// user error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, FetchError>;

impl FetchError {
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error reports identities a source failed to resolve
    pub fn is_missing_identity(&self) -> bool {
        matches!(self, FetchError::MissingIdentity { .. })
    }

    /// Name of the source involved in the failure, if any
    pub fn source_name(&self) -> Option<&str> {
        match self {
            Self::MissingIdentity { source_name, .. } | Self::Source { source_name, .. } => {
                Some(source_name.as_str())
            }
            _ => None,
        }
    }

    /// The diagnostic environment captured at the point of failure, if any
    pub fn env(&self) -> Option<&FetchEnv> {
        match self {
            Self::MissingIdentity { env, .. } => Some(env),
            _ => None,
        }
    }
}
