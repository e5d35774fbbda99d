use anyhow::anyhow;
use sqlx::Error as SqlxError;
use tor_core::TorError;

// serialization_failure, deadlock_detected, lock_not_available
const RETRYABLE_CODES: &[&str] = &["40001", "40P01", "55P03"];
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Classify a driver error. Lock contention and lost connections are
/// transient, constraint hits are conflicts, everything else is internal.
pub(crate) fn db_err(e: SqlxError) -> TorError {
    match &e {
        SqlxError::PoolTimedOut | SqlxError::Io(_) | SqlxError::WorkerCrashed => {
            TorError::Transient(e.to_string())
        }
        SqlxError::Database(db) => match db.code().as_deref() {
            Some(code) if RETRYABLE_CODES.contains(&code) => TorError::Transient(e.to_string()),
            Some(UNIQUE_VIOLATION) | Some(FOREIGN_KEY_VIOLATION) => {
                TorError::Conflict(db.message().to_string())
            }
            _ => TorError::Internal(anyhow!(e)),
        },
        _ => TorError::Internal(anyhow!(e)),
    }
}

/// Row decoding failures are data corruption, never the caller's fault.
pub(crate) fn row_err(e: String) -> TorError {
    TorError::Internal(anyhow!(e))
}
