use std::fmt::{Display, Formatter};

use edgehook_dns::is_capacity_error;

/// Failure categories that cross the hook boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Key or record absent.
    NotFound,
    /// Value present under a different type than requested.
    TypeMismatch,
    /// Output buffer too small, or packet/name over its size limit.
    CapacityExceeded,
    /// Malformed textual record, name or address.
    Parse,
    /// Invalid cursor use, double registration, or an otherwise illegal call.
    ProtocolViolation,
    /// Host and module were built against different table layouts.
    AbiMismatch,
}

impl ErrorKind {
    /// Status code returned across the C boundary. Zero is reserved for success.
    pub fn status(self) -> i32 {
        match self {
            ErrorKind::NotFound => 1,
            ErrorKind::TypeMismatch => 2,
            ErrorKind::CapacityExceeded => 3,
            ErrorKind::Parse => 4,
            ErrorKind::ProtocolViolation => 5,
            ErrorKind::AbiMismatch => 6,
        }
    }

    /// Inverse of [`ErrorKind::status`]. `None` for success, unknown codes are protocol violations.
    pub fn from_status(status: i32) -> Option<Self> {
        let kind = match status {
            0 => return None,
            1 => ErrorKind::NotFound,
            2 => ErrorKind::TypeMismatch,
            3 => ErrorKind::CapacityExceeded,
            4 => ErrorKind::Parse,
            6 => ErrorKind::AbiMismatch,
            _ => ErrorKind::ProtocolViolation,
        };
        Some(kind)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::CapacityExceeded => "capacity exceeded",
            ErrorKind::Parse => "parse error",
            ErrorKind::ProtocolViolation => "protocol violation",
            ErrorKind::AbiMismatch => "ABI mismatch",
        })
    }
}

/// Error reported by a capability call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct HookError {
    kind: ErrorKind,
    message: String,
}

pub type Result<T> = std::result::Result<T, HookError>;

impl HookError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeMismatch, message)
    }

    pub fn capacity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CapacityExceeded, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolViolation, message)
    }

    /// Classify a codec error: size limits become `CapacityExceeded`, anything else `fallback`.
    pub fn from_codec(err: anyhow::Error, fallback: ErrorKind) -> Self {
        let kind = if is_capacity_error(&err) {
            ErrorKind::CapacityExceeded
        } else {
            fallback
        };
        Self::new(kind, format!("{:#}", err))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Human-readable description, as exposed through `error_description`.
    pub fn describe(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgehook_dns::RawName;

    #[test]
    fn test_status_round_trip() {
        for kind in [
            ErrorKind::NotFound,
            ErrorKind::TypeMismatch,
            ErrorKind::CapacityExceeded,
            ErrorKind::Parse,
            ErrorKind::ProtocolViolation,
            ErrorKind::AbiMismatch,
        ] {
            assert_ne!(kind.status(), 0);
            assert_eq!(ErrorKind::from_status(kind.status()), Some(kind));
        }
        assert_eq!(ErrorKind::from_status(0), None);
        assert_eq!(ErrorKind::from_status(42), Some(ErrorKind::ProtocolViolation));
        assert_eq!(ErrorKind::from_status(-1), Some(ErrorKind::ProtocolViolation));
    }

    #[test]
    fn test_from_codec() {
        let long = vec!["abcdefghi"; 26].join(".");
        let err = RawName::from_str_name(&long).unwrap_err();
        assert_eq!(HookError::from_codec(err, ErrorKind::Parse).kind(), ErrorKind::CapacityExceeded);

        let err = RawName::from_str_name("a..b").unwrap_err();
        assert_eq!(HookError::from_codec(err, ErrorKind::Parse).kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_describe() {
        let err = HookError::not_found("key 'x'");
        assert_eq!(err.describe(), "not found: key 'x'");
        assert_eq!(err.message(), "key 'x'");
    }
}
