//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes.

use cmdvault_core::error::AppError;
use jsonrpsee::types::ErrorObjectOwned;

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const INVALID_DIRECTORY: i32 = 4004;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const DB_ERROR: i32 = 5001;
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    match err {
        AppError::Validation(msg) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, msg, None::<()>)
        }
        AppError::NotFound(msg) => ErrorObjectOwned::owned(code::NOT_FOUND, msg, None::<()>),
        AppError::DuplicateName(name) => ErrorObjectOwned::owned(
            code::CONFLICT,
            format!("Command already exists: {}", name),
            None::<()>,
        ),
        AppError::InvalidDirectory(msg) => {
            ErrorObjectOwned::owned(code::INVALID_DIRECTORY, msg, None::<()>)
        }
        AppError::Database(msg) => ErrorObjectOwned::owned(code::DB_ERROR, msg, None::<()>),
        AppError::Serialization(e) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, e.to_string(), None::<()>)
        }
        AppError::Config(msg) => ErrorObjectOwned::owned(code::INTERNAL_ERROR, msg, None::<()>),
        AppError::InvalidState(msg) => ErrorObjectOwned::owned(code::CONFLICT, msg, None::<()>),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let cases = [
            (AppError::Validation("x".into()), code::VALIDATION_ERROR),
            (AppError::NotFound("x".into()), code::NOT_FOUND),
            (AppError::DuplicateName("x".into()), code::CONFLICT),
            (AppError::InvalidDirectory("x".into()), code::INVALID_DIRECTORY),
            (AppError::Database("x".into()), code::DB_ERROR),
            (AppError::Config("x".into()), code::INTERNAL_ERROR),
            (AppError::InvalidState("x".into()), code::CONFLICT),
        ];
        for (err, expected) in cases {
            assert_eq!(to_rpc_error(err).code(), expected);
        }
    }

    #[test]
    fn test_duplicate_message_names_command() {
        let err = to_rpc_error(AppError::DuplicateName("build".into()));
        assert!(err.message().contains("build"));
    }
}
