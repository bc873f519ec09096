use sea_orm::DbErr;
use thiserror::Error;

/// Errors that can occur while reading or writing the cache.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from sea-orm.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// Invalid input data.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl StoreError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Whether retrying the same write may succeed (locked, busy, dropped connection).
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Database(db_err) => is_retryable_db_error(db_err),
            StoreError::InvalidInput { .. } => false,
        }
    }
}

pub(crate) fn is_retryable_db_error(err: &DbErr) -> bool {
    match err {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => true,
        DbErr::Exec(_) | DbErr::Query(_) => {
            let err_str = err.to_string().to_lowercase();
            // SQLite: database is locked, busy
            // PostgreSQL: connection refused, too many connections
            err_str.contains("locked")
                || err_str.contains("busy")
                || err_str.contains("timeout")
                || err_str.contains("connection")
                || err_str.contains("temporarily unavailable")
        }
        _ => false,
    }
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::RuntimeErr;

    #[test]
    fn locked_database_is_retryable() {
        let err = StoreError::from(DbErr::Exec(RuntimeErr::Internal(
            "database is locked".to_string(),
        )));
        assert!(err.is_retryable());
    }

    #[test]
    fn constraint_violations_are_not_retryable() {
        let err = StoreError::from(DbErr::Exec(RuntimeErr::Internal(
            "UNIQUE constraint failed: member_records.id".to_string(),
        )));
        assert!(!err.is_retryable());
        assert!(!StoreError::invalid_input("bad").is_retryable());
    }

    #[test]
    fn record_not_found_is_not_retryable() {
        let err = StoreError::from(DbErr::RecordNotFound("x".to_string()));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Database error"));
    }
}
