//! DuoDB Error Types

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::query::{EntityKind, FilterOperator};

/// Failure of a store capability call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store timed out: {0}")]
    Timeout(String),

    #[error("Store query failed: {0}")]
    Query(String),

    #[error("Store returned undecodable data: {0}")]
    Decode(String),

    #[error("Store call cancelled")]
    Cancelled,
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Unavailable(_) => "StoreUnavailable",
            StoreError::Timeout(_) => "StoreTimeout",
            StoreError::Query(_) => "StoreQuery",
            StoreError::Decode(_) => "StoreDecode",
            StoreError::Cancelled => "Cancelled",
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref e, _)
                if e.code == rusqlite::ErrorCode::OperationInterrupted =>
            {
                StoreError::Cancelled
            }
            rusqlite::Error::SqliteFailure(ref e, _)
                if matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                StoreError::Timeout(err.to_string())
            }
            rusqlite::Error::SqliteFailure(ref e, _)
                if e.code == rusqlite::ErrorCode::CannotOpen =>
            {
                StoreError::Unavailable(err.to_string())
            }
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..) => StoreError::Decode(err.to_string()),
            _ => StoreError::Query(err.to_string()),
        }
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failure of a query request, either at validation time or inside one engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Unknown field {field} for {entity}")]
    UnknownField { entity: EntityKind, field: String },

    #[error("Operator {operator:?} is not supported on {entity}.{field}")]
    UnsupportedOperator {
        entity: EntityKind,
        field: &'static str,
        operator: FilterOperator,
    },

    #[error("Invalid value for {field}: {reason}")]
    InvalidFilterValue { field: &'static str, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Cannot normalize row: {0}")]
    Normalize(String),
}

impl QueryError {
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::UnknownField { .. } => "UnknownField",
            QueryError::UnsupportedOperator { .. } => "UnsupportedOperator",
            QueryError::InvalidFilterValue { .. } => "InvalidFilterValue",
            QueryError::Store(e) => e.kind(),
            QueryError::Normalize(_) => "Normalize",
        }
    }

    /// Validation errors are rejected before any store call
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            QueryError::UnknownField { .. }
                | QueryError::UnsupportedOperator { .. }
                | QueryError::InvalidFilterValue { .. }
        )
    }
}

pub type QueryResult<T> = std::result::Result<T, QueryError>;

/// Why a single import row was not written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowFailureKind {
    ReferentialViolation,
    InvalidRow,
    Store,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_maps_to_cancelled() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_INTERRUPT),
            None,
        );
        assert_eq!(StoreError::from(err), StoreError::Cancelled);
    }

    #[test]
    fn test_error_kinds() {
        let err = QueryError::UnknownField {
            entity: EntityKind::Users,
            field: "Nope".to_string(),
        };
        assert_eq!(err.kind(), "UnknownField");
        assert!(err.is_validation());

        let err = QueryError::from(StoreError::Timeout("pool".into()));
        assert_eq!(err.kind(), "StoreTimeout");
        assert!(!err.is_validation());
    }
}
