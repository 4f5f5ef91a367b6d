use thiserror::Error as ThisError;

use crate::matter::value::ValueType;

#[derive(ThisError, Debug)]
pub enum DataModelError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Value type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: ValueType,
        actual: ValueType,
    },

    #[error("Value out of bounds: {0}")]
    OutOfBounds(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Out of memory: {0}")]
    NoMemory(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Operation failed: {0}")]
    Failed(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

/// Coarse error classification, matching the status codes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    NoMemory,
    InvalidState,
    NotSupported,
    Failed,
}

impl DataModelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) | Self::TypeMismatch { .. } | Self::OutOfBounds(_) => {
                ErrorKind::InvalidArgument
            }
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NoMemory(_) => ErrorKind::NoMemory,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::NotSupported(_) => ErrorKind::NotSupported,
            Self::Failed(_) | Self::IoError(_) | Self::SerdeJsonError(_) => ErrorKind::Failed,
        }
    }
}

pub type Result<T> = std::result::Result<T, DataModelError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matter::value::ValueKind;

    #[test]
    fn test_mismatch_and_bounds_are_invalid_argument() {
        let err = DataModelError::TypeMismatch {
            expected: ValueType::new(ValueKind::UInt8),
            actual: ValueType::new(ValueKind::Int16),
        };
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(
            err.to_string(),
            "Value type mismatch: expected uint8, got int16"
        );
        assert_eq!(
            DataModelError::OutOfBounds("9".into()).kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn test_io_error_maps_to_failed() {
        let err: DataModelError = std::io::Error::other("disk gone").into();
        assert_eq!(err.kind(), ErrorKind::Failed);
    }
}
