use std::path::PathBuf;

use uuid::Uuid;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Stable diagnostic codes carried by [`StoreError`].
pub mod codes {
    pub const STATEMENT_FAILED: &str = "OTA810";
    pub const OPEN_FAILED: &str = "OTA811";
    pub const INVALID_ROW: &str = "OTA812";
    pub const INVALID_JSON: &str = "OTA813";
    pub const MISSING_UPDATE: &str = "OTA814";
    pub const INVALID_INPUT: &str = "OTA815";
    pub const WORKER_GONE: &str = "OTA816";
    pub const FILESYSTEM: &str = "OTA817";
}

/// Errors surfaced by the update store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("[OTA810] update store statement failed during {operation}: {source}")]
    Statement {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("[OTA811] failed to open update store in {}: {source:#}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("[OTA812] stored {entity} has an invalid {column}: {reason}")]
    InvalidRow {
        entity: &'static str,
        column: &'static str,
        reason: String,
    },
    #[error("[OTA813] json value for '{key}' could not be converted: {source}")]
    Json {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("[OTA814] update {0} is not in the store")]
    UpdateNotFound(Uuid),
    #[error("[OTA815] asset has neither an id nor a key")]
    AssetWithoutIdentity,
    #[error("[OTA815] invalid extra params: {0}")]
    InvalidExtraParams(String),
    #[error("[OTA816] update store worker is no longer running")]
    WorkerUnavailable,
    #[error("[OTA817] filesystem operation on {} failed: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Statement { .. } => codes::STATEMENT_FAILED,
            Self::Open { .. } => codes::OPEN_FAILED,
            Self::InvalidRow { .. } => codes::INVALID_ROW,
            Self::Json { .. } => codes::INVALID_JSON,
            Self::UpdateNotFound(_) => codes::MISSING_UPDATE,
            Self::AssetWithoutIdentity | Self::InvalidExtraParams(_) => codes::INVALID_INPUT,
            Self::WorkerUnavailable => codes::WORKER_GONE,
            Self::Io { .. } => codes::FILESYSTEM,
        }
    }

    /// Whether the underlying SQLite error is a uniqueness or foreign-key violation.
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::Statement {
                source: rusqlite::Error::SqliteFailure(err, _),
                ..
            } if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

/// Attaches the failing operation to a raw SQLite result.
pub(crate) trait StatementContext<T> {
    fn during(self, operation: &'static str) -> Result<T>;
}

impl<T> StatementContext<T> for rusqlite::Result<T> {
    fn during(self, operation: &'static str) -> Result<T> {
        self.map_err(|source| StoreError::Statement { operation, source })
    }
}

/// SQLite reported that the file is damaged or not a database at all.
pub(crate) fn is_corruption(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase
            )
    )
}

/// Walks an `anyhow` chain looking for a corruption report from SQLite.
pub(crate) fn chain_reports_corruption(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<rusqlite::Error>()
            .is_some_and(is_corruption)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_embedded_in_messages() {
        let err = StoreError::UpdateNotFound(Uuid::nil());
        assert_eq!(err.code(), codes::MISSING_UPDATE);
        assert!(err.to_string().starts_with("[OTA814]"));

        let err = StoreError::InvalidExtraParams("bad key".into());
        assert_eq!(err.code(), codes::INVALID_INPUT);
    }

    #[test]
    fn corruption_is_found_through_context() {
        let raw = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_NOTADB),
            Some("file is not a database".into()),
        );
        let err = anyhow::Error::new(raw).context("failed to read schema");
        assert!(chain_reports_corruption(&err));

        let plain = anyhow::anyhow!("disk quota exceeded");
        assert!(!chain_reports_corruption(&plain));
    }
}
