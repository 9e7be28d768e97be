use thiserror::Error;

/// Quarry error type with actionable variants.
#[derive(Debug, Error)]
pub enum QuarryError {
    /// The schema has no model with this name.
    #[error("model `{0}` not found in schema")]
    ModelNotFound(String),
    /// The schema description violates an invariant.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    /// A write was attempted without a condition (or without values).
    #[error("refusing {0} without a condition")]
    EmptyCondition(&'static str),
    /// An operator string outside the supported set.
    #[error("unsupported operator `{0}`")]
    InvalidOperator(String),
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
    /// Underlying sqlx error.
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    /// Failure reported by a non-sqlx execute function.
    #[error("execution failed: {0}")]
    Execution(String),
    /// Schema description could not be parsed.
    #[error("schema parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QuarryError {
    /// Returns true for errors raised by the database rather than by Quarry itself.
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Sqlx(_) | Self::Execution(_))
    }
}

/// Result alias for Quarry operations.
pub type QuarryResult<T> = Result<T, QuarryError>;
