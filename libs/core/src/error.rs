//! Canonical error vocabulary shared by every transport.
//!
//! [`ErrorCode`] mirrors the gRPC status codes numerically, and carries fixed
//! mappings to HTTP statuses and WebSocket close codes. Transports never invent
//! their own top-level codes; they only map into and out of this set.

use std::fmt;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical, protocol-independent failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 17] = [
        ErrorCode::Ok,
        ErrorCode::Cancelled,
        ErrorCode::Unknown,
        ErrorCode::InvalidArgument,
        ErrorCode::DeadlineExceeded,
        ErrorCode::NotFound,
        ErrorCode::AlreadyExists,
        ErrorCode::PermissionDenied,
        ErrorCode::ResourceExhausted,
        ErrorCode::FailedPrecondition,
        ErrorCode::Aborted,
        ErrorCode::OutOfRange,
        ErrorCode::Unimplemented,
        ErrorCode::Internal,
        ErrorCode::Unavailable,
        ErrorCode::DataLoss,
        ErrorCode::Unauthenticated,
    ];

    /// Upper snake-case name, as rendered in error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Ok => "OK",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Unknown => "UNKNOWN",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorCode::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorCode::Aborted => "ABORTED",
            ErrorCode::OutOfRange => "OUT_OF_RANGE",
            ErrorCode::Unimplemented => "UNIMPLEMENTED",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::Unavailable => "UNAVAILABLE",
            ErrorCode::DataLoss => "DATA_LOSS",
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
        }
    }

    /// gRPC status code. Identity mapping.
    pub fn grpc_code(self) -> i32 {
        self as i32
    }

    pub fn http_status(self) -> StatusCode {
        match self {
            ErrorCode::Ok => StatusCode::OK,
            ErrorCode::Cancelled => StatusCode::REQUEST_TIMEOUT,
            ErrorCode::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorCode::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::AlreadyExists => StatusCode::CONFLICT,
            ErrorCode::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorCode::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            ErrorCode::Aborted => StatusCode::CONFLICT,
            ErrorCode::OutOfRange => StatusCode::BAD_REQUEST,
            ErrorCode::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
        }
    }

    /// WebSocket close code (RFC 6455 section 7.4).
    pub fn ws_close_code(self) -> u16 {
        match self {
            ErrorCode::Ok => 1000,
            ErrorCode::Cancelled => 1001,
            ErrorCode::InvalidArgument | ErrorCode::OutOfRange => 1003,
            ErrorCode::PermissionDenied | ErrorCode::Unauthenticated => 1008,
            ErrorCode::Unavailable => 1013,
            _ => 1011,
        }
    }

    /// Classify a gRPC status code. Values outside `0..=16` become `Unknown`.
    pub fn from_grpc_code(code: i32) -> ErrorCode {
        usize::try_from(code)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
            .unwrap_or(ErrorCode::Unknown)
    }

    /// Best-effort classification of an HTTP status.
    ///
    /// Several statuses collapse onto one code, so this is not the inverse of
    /// [`ErrorCode::http_status`]. Any 2xx is `Ok`, unlisted 4xx statuses are
    /// `InvalidArgument` and everything else unlisted is `Internal`.
    pub fn from_http_status(status: StatusCode) -> ErrorCode {
        match status.as_u16() {
            200..=299 => ErrorCode::Ok,
            400 => ErrorCode::InvalidArgument,
            401 => ErrorCode::Unauthenticated,
            403 => ErrorCode::PermissionDenied,
            404 => ErrorCode::NotFound,
            408 => ErrorCode::Cancelled,
            409 => ErrorCode::AlreadyExists,
            412 => ErrorCode::FailedPrecondition,
            429 => ErrorCode::ResourceExhausted,
            499 => ErrorCode::Cancelled,
            501 => ErrorCode::Unimplemented,
            503 => ErrorCode::Unavailable,
            504 => ErrorCode::DeadlineExceeded,
            400..=499 => ErrorCode::InvalidArgument,
            _ => ErrorCode::Internal,
        }
    }

    pub fn from_ws_close_code(code: u16) -> ErrorCode {
        match code {
            1000 => ErrorCode::Ok,
            1001 => ErrorCode::Cancelled,
            1003 => ErrorCode::InvalidArgument,
            1008 => ErrorCode::PermissionDenied,
            1011 => ErrorCode::Internal,
            1013 => ErrorCode::Unavailable,
            _ => ErrorCode::Unknown,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error every handler, stream and transport in this crate speaks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn grpc_code(&self) -> i32 {
        self.code.grpc_code()
    }

    pub fn ws_close_code(&self) -> u16 {
        self.code.ws_close_code()
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, msg)
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, msg)
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, msg)
    }

    pub fn deadline_exceeded(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::DeadlineExceeded, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, msg)
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::AlreadyExists, msg)
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermissionDenied, msg)
    }

    pub fn failed_precondition(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::FailedPrecondition, msg)
    }

    pub fn unimplemented(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unimplemented, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, msg)
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, msg)
    }

    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthenticated, msg)
    }

    /// Error returned when writing to a stream whose send side is closed.
    pub fn closed_pipe() -> Self {
        Self::new(ErrorCode::Unavailable, "write on closed pipe")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::invalid_argument(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let code = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorCode::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorCode::PermissionDenied,
            std::io::ErrorKind::TimedOut => ErrorCode::DeadlineExceeded,
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe => ErrorCode::Unavailable,
            _ => ErrorCode::Internal,
        };
        Error::new(code, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error accepted at the handler boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Normalise any error into an [`Error`].
///
/// An existing [`Error`] comes back unchanged; anything else becomes
/// `Unknown` carrying the original message verbatim. Applying this twice is
/// the same as applying it once.
pub fn to_error<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    let boxed: BoxError = err.into();
    match boxed.downcast::<Error>() {
        Ok(err) => *err,
        Err(other) => Error::unknown(other.to_string()),
    }
}

/// Type-test an error without converting it.
pub fn is_error<'a>(err: Option<&'a (dyn std::error::Error + 'static)>) -> Option<&'a Error> {
    err.and_then(|e| e.downcast_ref::<Error>())
}
