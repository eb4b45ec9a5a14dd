//! Error conversions from infrastructure types.
//!
//! These conversions involve database types and belong in the adapters layer.

use crate::domain::EngineError;

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => EngineError::Unavailable(e.to_string()),
            sqlx::Error::Database(db) => EngineError::Database(db.message().to_string()),
            other => EngineError::Database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_are_unavailable() {
        assert!(matches!(
            EngineError::from(sqlx::Error::PoolTimedOut),
            EngineError::Unavailable(_)
        ));
        assert!(matches!(
            EngineError::from(sqlx::Error::PoolClosed),
            EngineError::Unavailable(_)
        ));
    }

    #[test]
    fn test_row_not_found_is_database_error() {
        assert!(matches!(
            EngineError::from(sqlx::Error::RowNotFound),
            EngineError::Database(_)
        ));
    }
}
