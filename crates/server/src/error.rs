//! Domain error type carried through request handling.
//!
//! Every failure that can cross the socket keeps its stable [`ErrorCode`];
//! anything unexpected collapses into `E_INTERNAL` at the router boundary.

use thiserror::Error;

use crate::store::StoreError;
use klaude_protocol::{ErrorBody, ErrorCode};

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct WrapperError {
    pub code: ErrorCode,
    pub message: String,
}

impl WrapperError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn session_not_found(session_id: &str) -> Self {
        Self::new(
            ErrorCode::SessionNotFound,
            format!("session {} not found", session_id),
        )
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code,
            message: self.message.clone(),
        }
    }
}

impl From<StoreError> for WrapperError {
    fn from(err: StoreError) -> Self {
        WrapperError::internal(err.to_string())
    }
}

impl From<serde_json::Error> for WrapperError {
    fn from(err: serde_json::Error) -> Self {
        WrapperError::internal(format!("json error: {}", err))
    }
}

impl From<std::io::Error> for WrapperError {
    fn from(err: std::io::Error) -> Self {
        WrapperError::internal(format!("io error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_collapse_to_internal() {
        let err: WrapperError = StoreError::DepthCycle("s1".into()).into();
        assert_eq!(err.code, ErrorCode::Internal);
        assert!(err.message.contains("s1"));
    }

    #[test]
    fn body_preserves_code() {
        let err = WrapperError::session_not_found("01AB");
        let body = err.to_body();
        assert_eq!(body.code, ErrorCode::SessionNotFound);
        assert!(body.message.contains("01AB"));
    }
}
