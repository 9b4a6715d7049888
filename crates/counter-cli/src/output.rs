//! JSON response envelope printed by every command.

use counter_store::{KeyValue, StoreError};
use serde::Serialize;

pub const CODE_OK: i32 = 0;
pub const CODE_INVALID_INPUT: i32 = 4000;
pub const CODE_NOT_FOUND: i32 = 4001;
pub const CODE_AUTH_FAILED: i32 = 4002;
pub const CODE_INTERNAL: i32 = 5001;

#[derive(Debug, Serialize)]
pub struct Response {
    pub code: i32,
    pub err_msg: String,
    pub data: Vec<KeyValue>,
}

impl Response {
    pub fn ok(data: Vec<KeyValue>) -> Self {
        Self {
            code: CODE_OK,
            err_msg: String::new(),
            data,
        }
    }

    pub fn entry(key: impl Into<String>, value: impl ToString) -> Self {
        Self::ok(vec![KeyValue {
            key: key.into(),
            value: value.to_string(),
        }])
    }

    pub fn error(err: &StoreError) -> Self {
        Self {
            code: code_for(err),
            err_msg: err.to_string(),
            data: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

/// Response code for a failed operation.
pub fn code_for(err: &StoreError) -> i32 {
    match err {
        StoreError::NotFound { .. }
        | StoreError::EmptyValue { .. }
        | StoreError::AlreadyExists { .. }
        | StoreError::InvalidNamespace { .. } => CODE_NOT_FOUND,
        StoreError::AuthenticationFailed => CODE_AUTH_FAILED,
        StoreError::InvalidArgument(_) | StoreError::TypeMismatch { .. } => CODE_INVALID_INPUT,
        _ => CODE_INTERNAL,
    }
}
