use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("Upstream client is closed")]
    ClientClosed,

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl CoreError {
    /// True when the error represents a missing entity rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::NotFound(_) | CoreError::Database(sqlx::Error::RowNotFound)
        )
    }
}
