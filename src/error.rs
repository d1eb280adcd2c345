//! Shared error types for the backing stores.

use thiserror::Error;

/// Failure reported by a backing store (credentials, principals, counters).
///
/// `Conflict` is the only variant callers branch on; everything else is an
/// operational fault surfaced to logging and fail-open/fail-closed policies.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated (e.g. a duplicate secret hash).
    #[error("unique constraint violated")]
    Conflict,
    /// The referenced row does not exist.
    #[error("row not found")]
    NotFound,
    /// The store could not be reached or the operation failed outright.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    /// Map a database error, folding SQLSTATE 23505 into `Conflict`.
    pub(crate) fn from_sql(err: sqlx::Error, what: &'static str) -> Self {
        if is_unique_violation(&err) {
            Self::Conflict
        } else {
            Self::Backend(anyhow::Error::new(err).context(what))
        }
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{StoreError, is_unique_violation};

    #[test]
    fn conflict_from_unique_violation_sqlstate() {
        let err = StoreError::from_sql(sqlx::Error::RowNotFound, "lookup failed");
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn backend_keeps_context() {
        let err = StoreError::from_sql(sqlx::Error::PoolClosed, "pool gone");
        assert!(format!("{err:#}").contains("pool gone"));
    }
}
