use talk_core::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Unreachable: {0}")]
    Unreachable(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("{0} timeout exceeded")]
    Timeout(&'static str),

    #[error("Invalid address: {0}")]
    Address(String),

    #[error("{0}")]
    Custom(String),
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Codec(err.to_string())
    }
}

impl From<Error> for talk_core::Error {
    fn from(err: Error) -> Self {
        let code = match err {
            Error::Io(io) => return io.into(),
            Error::Codec(_) => ErrorCode::Internal,
            Error::ConnectionClosed | Error::Unreachable(_) => ErrorCode::Unavailable,
            Error::InvalidFrame(_) => ErrorCode::DataLoss,
            Error::Timeout(_) => ErrorCode::DeadlineExceeded,
            Error::Address(_) => ErrorCode::InvalidArgument,
            Error::Custom(_) => ErrorCode::Unknown,
        };
        talk_core::Error::new(code, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
