use thiserror::Error;

/// A single event failed validation. Reported inline in the `/publish`
/// response, never aborts the batch (spec.md §4.A, §7).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{field} exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },
}

/// Errors from the persistence layer (spec.md §4.B, §7).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    Connection(#[source] sqlx::Error),
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),
    #[error("transaction aborted after exhausting retries: {0}")]
    SerializationRetriesExhausted(#[source] sqlx::Error),
    #[error("unique constraint violated: {0}")]
    UniqueViolation(#[source] sqlx::Error),
}

impl StoreError {
    /// True if this is a Postgres serialization failure (`40001`) or
    /// deadlock (`40P01`) — the two codes a SERIALIZABLE transaction can
    /// surface under concurrent conflict, per spec.md §4.B.
    pub fn is_serialization_failure(err: &sqlx::Error) -> bool {
        matches!(
            err.as_database_error().and_then(|e| e.code()),
            Some(code) if code == "40001" || code == "40P01"
        )
    }

    /// True if this is a unique-constraint violation (`23505`) — the race
    /// path in spec.md §4.D, reachable only if something outside the single
    /// consumer writes to `dedup_store` concurrently.
    pub fn is_unique_violation(err: &sqlx::Error) -> bool {
        matches!(
            err.as_database_error().and_then(|e| e.code()),
            Some(code) if code == "23505"
        )
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Query(err)
    }
}
