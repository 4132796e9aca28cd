//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes.

use jsonrpsee::types::ErrorObjectOwned;
use reliquary_core::error::AppError;

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const CAPACITY_EXCEEDED: i32 = 4003;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const DB_ERROR: i32 = 5001;
    pub const SYSTEM_ERROR: i32 = 5002;
    pub const SHUTTING_DOWN: i32 = 5003;
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    let code = match &err {
        AppError::Validation(_)
        | AppError::Domain(_)
        | AppError::Plugin(_)
        | AppError::Serialization(_) => code::VALIDATION_ERROR,
        AppError::NotFound(_) => code::NOT_FOUND,
        AppError::AlreadyStarted(_)
        | AppError::InvalidState(_)
        | AppError::JobStopping(_)
        | AppError::JobInError(_) => code::CONFLICT,
        AppError::CapacityExceeded { .. } => code::CAPACITY_EXCEEDED,
        AppError::ShuttingDown => code::SHUTTING_DOWN,
        AppError::Database(_) => code::DB_ERROR,
        AppError::Storage(_) | AppError::Enumeration(_) | AppError::Io(_) => code::SYSTEM_ERROR,
        AppError::Config(_) | AppError::Internal(_) => code::INTERNAL_ERROR,
    };
    ErrorObjectOwned::owned(code, err.to_string(), None::<()>)
}
