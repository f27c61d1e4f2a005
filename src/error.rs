use std::path::PathBuf;

use serde::Serialize;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("record encoding error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid argument: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("upstream call failed: {0}")]
    Upstream(String),

    #[error("{failed} of {total} retrievers failed")]
    PartialRetrieval { failed: usize, total: usize },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

/// Coarse, machine-distinguishable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Validation,
    StorageIo,
    Upstream,
    PartialRetrievalFailure,
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn upstream(message: impl std::fmt::Display) -> Self {
        Self::Upstream(message.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_)
            | Self::Redb(_)
            | Self::RedbDatabase(_)
            | Self::RedbStorage(_)
            | Self::RedbTransaction(_)
            | Self::RedbTable(_)
            | Self::RedbCommit(_)
            | Self::Serialization(_)
            | Self::DataDir(_) => ErrorKind::StorageIo,
            Self::Validation(_) | Self::Config(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Upstream(_) => ErrorKind::Upstream,
            Self::PartialRetrieval { .. } => {
                ErrorKind::PartialRetrievalFailure
            }
        }
    }

    /// Whether a fallback strategy may be attempted after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Upstream | ErrorKind::Validation)
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Try `primary`; on an upstream or validation failure, run `fallback`.
///
/// Storage and lookup errors are never masked.
///
/// # Examples
///
/// ```
/// use docrag::error::{Error, with_fallback};
///
/// let primary: docrag::Result<u8> = Err(Error::upstream("timeout"));
/// assert_eq!(with_fallback(primary, || Ok(7)).unwrap(), 7);
/// ```
pub fn with_fallback<T>(
    primary: Result<T>,
    fallback: impl FnOnce() -> Result<T>,
) -> Result<T> {
    match primary {
        Err(e) if e.is_recoverable() => {
            tracing::warn!(error = %e, "primary strategy failed, falling back");
            fallback()
        }
        other => other,
    }
}

/// Serializable error summary handed to callers of the facade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

/// Structured outcome returned across the library boundary.
#[derive(Debug, Clone, Serialize)]
pub struct Response<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ErrorReport>,
}

impl<T> Response<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            warnings: Vec::new(),
        }
    }

    pub fn failed(error: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.report()),
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: ErrorReport) -> Self {
        self.warnings.push(warning);
        self
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

impl<T> From<Result<T>> for Response<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::failed(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinguishable() {
        assert_eq!(Error::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(Error::upstream("x").kind(), ErrorKind::Upstream);
        assert_eq!(
            Error::NotFound {
                kind: "chunk",
                name: "a_0".into()
            }
            .kind(),
            ErrorKind::NotFound
        );
        let io = std::io::Error::other("disk full");
        assert_eq!(Error::from(io).kind(), ErrorKind::StorageIo);
        assert_eq!(
            Error::PartialRetrieval {
                failed: 1,
                total: 2
            }
            .kind(),
            ErrorKind::PartialRetrievalFailure
        );
    }

    #[test]
    fn fallback_runs_only_for_recoverable_errors() {
        let upstream: Result<u8> = Err(Error::upstream("down"));
        assert_eq!(with_fallback(upstream, || Ok(1)).unwrap(), 1);

        let storage: Result<u8> =
            Err(Error::from(std::io::Error::other("gone")));
        let out = with_fallback(storage, || Ok(1));
        assert_eq!(out.unwrap_err().kind(), ErrorKind::StorageIo);

        let fine: Result<u8> = Ok(3);
        assert_eq!(with_fallback(fine, || Ok(1)).unwrap(), 3);
    }

    #[test]
    fn response_from_error_carries_kind_and_message() {
        let result: Result<()> = Err(Error::validation("top_k must be > 0"));
        let response = Response::from(result);
        assert!(!response.success);
        assert_eq!(response.error_kind(), Some(ErrorKind::Validation));
        assert!(
            response
                .error
                .as_ref()
                .unwrap()
                .message
                .contains("top_k must be > 0")
        );
    }

    #[test]
    fn response_serializes_kind_as_snake_case() {
        let response: Response<()> =
            Response::failed(&Error::PartialRetrieval {
                failed: 1,
                total: 3,
            });
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["kind"], "partial_retrieval_failure");
        assert!(json.get("data").is_none());
    }
}
