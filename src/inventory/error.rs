//! Error types for inventory stores.

use std::fmt;

use thiserror::Error;

/// Typed classification of a database failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreDbErrorKind {
    /// SQLite reported busy/locked.
    BusyOrLocked,
    /// Unique, foreign-key or check constraint violated.
    ConstraintViolation,
    /// No pooled connection became available in time.
    PoolTimeout,
    /// The pool was closed.
    PoolClosed,
    /// A single-row query returned nothing.
    RowNotFound,
    /// Filesystem or socket failure under the driver.
    Io,
    /// Driver protocol failure.
    Protocol,
    /// Anything else.
    Other,
}

impl StoreDbErrorKind {
    /// Classifies a driver error; SQLite busy/locked codes map to `BusyOrLocked`.
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::RowNotFound => Self::RowNotFound,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::Protocol(_) => Self::Protocol,
            sqlx::Error::Database(database_error) => {
                classify_database_error(database_error.as_ref())
            }
            _ => Self::Other,
        }
    }
}

impl fmt::Display for StoreDbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::ConstraintViolation => "constraint_violation",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::RowNotFound => "row_not_found",
            Self::Io => "io",
            Self::Protocol => "protocol",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn classify_database_error(
    database_error: &(dyn sqlx::error::DatabaseError + 'static),
) -> StoreDbErrorKind {
    let code = database_error.code();
    if matches!(
        code.as_deref(),
        Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6")
    ) {
        return StoreDbErrorKind::BusyOrLocked;
    }

    if database_error.is_unique_violation()
        || database_error.is_foreign_key_violation()
        || database_error.is_check_violation()
        || code
            .as_deref()
            .is_some_and(|value| value.starts_with("SQLITE_CONSTRAINT"))
    {
        return StoreDbErrorKind::ConstraintViolation;
    }

    let message = database_error.message().to_ascii_lowercase();
    if message.contains("database is locked") || message.contains("database table is locked") {
        return StoreDbErrorKind::BusyOrLocked;
    }

    StoreDbErrorKind::Other
}

/// Errors from inventory and history stores.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error ({kind}): {message}")]
    Database {
        /// Typed classification.
        kind: StoreDbErrorKind,
        /// Driver error text.
        message: String,
    },

    /// A referenced row does not exist.
    #[error("{entity} not found: id {id}")]
    NotFound {
        /// Table-level name (`site`, `local file`, ...).
        entity: &'static str,
        /// Requested id.
        id: i64,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: StoreDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl StoreError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    /// Typed database error kind, when this is a database error.
    #[must_use]
    pub fn database_kind(&self) -> Option<StoreDbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            Self::NotFound { .. } => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_database_message() {
        let err = StoreError::Database {
            kind: StoreDbErrorKind::BusyOrLocked,
            message: "database is locked".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("busy_or_locked"));
        assert!(msg.contains("database is locked"));
        assert_eq!(err.database_kind(), Some(StoreDbErrorKind::BusyOrLocked));
    }

    #[test]
    fn test_store_error_not_found_message() {
        let err = StoreError::not_found("site", 42);
        assert_eq!(err.to_string(), "site not found: id 42");
        assert_eq!(err.database_kind(), None);
    }

    #[test]
    fn test_store_error_from_row_not_found() {
        let err = StoreError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.database_kind(), Some(StoreDbErrorKind::RowNotFound));
    }
}
