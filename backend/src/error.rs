//! Error handling for the Stockledger inventory engine
//!
//! Wraps domain rule violations together with storage and configuration
//! failures, and gives callers a stable code for each.

use shared::StockError;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Ledger rule violations
    #[error(transparent)]
    Stock(#[from] StockError),

    // Validation errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Concurrency errors
    #[error("Conflict on {resource}: {message}")]
    Conflict { resource: String, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(sqlx::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    /// Stable error code for callers
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Stock(err) => match err {
                StockError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
                StockError::InsufficientReservation { .. } => "INSUFFICIENT_RESERVATION",
                StockError::InvalidAdjustment { .. } => "INVALID_ADJUSTMENT",
                StockError::InsufficientLotStock { .. } => "INSUFFICIENT_LOT_STOCK",
                StockError::LotNotConsumable { .. } => "LOT_NOT_CONSUMABLE",
                StockError::InvalidQuantity(_) => "INVALID_QUANTITY",
                StockError::InvalidTransition { .. } => "INVALID_STATE_TRANSITION",
            },
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::DuplicateEntry(_) => "DUPLICATE_ENTRY",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict { .. } => "CONFLICT",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::Internal(_) | AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Errors an end user or operator can act on. Lifecycle faults such as
    /// fulfilling without a reservation are bugs in the caller and are not.
    pub fn is_user_facing(&self) -> bool {
        match self {
            AppError::Stock(err) => match err {
                StockError::InsufficientStock { .. }
                | StockError::InsufficientLotStock { .. }
                | StockError::InvalidAdjustment { .. }
                | StockError::LotNotConsumable { .. }
                | StockError::InvalidQuantity(_) => true,
                StockError::InsufficientReservation { .. } | StockError::InvalidTransition { .. } => {
                    false
                }
            },
            AppError::Validation { .. } | AppError::DuplicateEntry(_) | AppError::NotFound(_) => true,
            AppError::Conflict { .. }
            | AppError::Configuration(_)
            | AppError::DatabaseError(_)
            | AppError::Internal(_)
            | AppError::InternalError(_) => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::Conflict { .. })
    }

    pub fn stock(&self) -> Option<&StockError> {
        match self {
            AppError::Stock(err) => Some(err),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                // serialization_failure, deadlock_detected, lock_not_available
                Some("40001") | Some("40P01") | Some("55P03") => {
                    return AppError::Conflict {
                        resource: db_err.table().unwrap_or("row").to_string(),
                        message: db_err.message().to_string(),
                    };
                }
                Some("23505") => {
                    return AppError::DuplicateEntry(
                        db_err.constraint().unwrap_or("unique key").to_string(),
                    );
                }
                Some("23503") => {
                    return AppError::NotFound(
                        db_err.constraint().unwrap_or("referenced row").to_string(),
                    );
                }
                _ => {}
            }
        }
        AppError::DatabaseError(err)
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field = errors
            .field_errors()
            .keys()
            .next()
            .map(|f| f.to_string())
            .unwrap_or_default();
        AppError::Validation {
            field,
            message: errors.to_string(),
        }
    }
}

/// Result type alias for engine operations
pub type AppResult<T> = Result<T, AppError>;
