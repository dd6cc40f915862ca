use sea_orm::{ConnAcquireErr, DbErr};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SensaError {
    #[error("validation error: {message}")]
    Validation { message: String },
    #[error("type not found: {message}")]
    TypeNotFound { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("duplicate field: {message}")]
    DuplicateField { message: String },
    #[error("invalid attribute kind: {message}")]
    InvalidAttributeKind { message: String },
    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },
    #[error("storage timeout: {message}")]
    StorageTimeout { message: String },
    #[error("storage unavailable: {message}")]
    StorageUnavailable { message: String },
    #[error("partial write: history recorded but {step} failed: {message}")]
    PartialWrite { step: String, message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl SensaError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn type_not_found(message: impl Into<String>) -> Self {
        Self::TypeNotFound {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn duplicate_field(message: impl Into<String>) -> Self {
        Self::DuplicateField {
            message: message.into(),
        }
    }

    pub fn invalid_kind(message: impl Into<String>) -> Self {
        Self::InvalidAttributeKind {
            message: message.into(),
        }
    }

    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::StorageTimeout {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            message: message.into(),
        }
    }

    pub fn partial_write(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PartialWrite {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Stable machine-readable name of the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::TypeNotFound { .. } => "type_not_found",
            Self::NotFound { .. } => "not_found",
            Self::DuplicateField { .. } => "duplicate_field",
            Self::InvalidAttributeKind { .. } => "invalid_attribute_kind",
            Self::SchemaMismatch { .. } => "schema_mismatch",
            Self::StorageTimeout { .. } => "storage_timeout",
            Self::StorageUnavailable { .. } => "storage_unavailable",
            Self::PartialWrite { .. } => "partial_write",
            Self::Storage { .. } => "storage",
        }
    }

    /// Transient storage failures that are safe to retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageTimeout { .. } | Self::StorageUnavailable { .. }
        )
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
            kind: self.kind().to_string(),
        }
    }
}

/// Caller-facing error object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}

pub type SensaResult<T> = Result<T, SensaError>;

impl From<DbErr> for SensaError {
    fn from(value: DbErr) -> Self {
        match &value {
            DbErr::ConnectionAcquire(ConnAcquireErr::Timeout) => {
                SensaError::timeout(value.to_string())
            }
            DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => {
                SensaError::unavailable(value.to_string())
            }
            _ => SensaError::storage(value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SensaError;
    use sea_orm::{ConnAcquireErr, DbErr};

    #[test]
    fn helper_constructors_set_variants() {
        let err = SensaError::validation("bad");
        assert!(matches!(err, SensaError::Validation { .. }));
        let err = SensaError::type_not_found("soilsensor");
        assert!(matches!(err, SensaError::TypeNotFound { .. }));
        let err = SensaError::duplicate_field("humidity");
        assert!(matches!(err, SensaError::DuplicateField { .. }));
        let err = SensaError::invalid_kind("bool");
        assert!(matches!(err, SensaError::InvalidAttributeKind { .. }));
        let err = SensaError::partial_write("snapshot", "disk");
        assert!(matches!(err, SensaError::PartialWrite { .. }));
    }

    #[test]
    fn only_transient_storage_errors_are_retryable() {
        assert!(SensaError::timeout("slow").is_retryable());
        assert!(SensaError::unavailable("down").is_retryable());
        assert!(!SensaError::storage("constraint").is_retryable());
        assert!(!SensaError::validation("bad").is_retryable());
    }

    #[test]
    fn body_carries_kind_and_message() {
        let body = SensaError::schema_mismatch("unknown attribute 'humidity'").to_body();
        assert_eq!(body.kind, "schema_mismatch");
        assert!(body.error.contains("humidity"));
    }

    #[test]
    fn db_errors_map_to_storage_classes() {
        let err = SensaError::from(DbErr::ConnectionAcquire(ConnAcquireErr::Timeout));
        assert!(matches!(err, SensaError::StorageTimeout { .. }));
        let err = SensaError::from(DbErr::Custom("boom".to_string()));
        assert!(matches!(err, SensaError::Storage { .. }));
    }
}
