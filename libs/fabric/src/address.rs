use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::conn::{
    Connection, ConnectionListener, TcpConnection, TcpConnectionListener, UnixConnection,
    UnixConnectionListener,
};
use crate::error::{Error, Result};

/// Where a socket transport listens or connects.
///
/// Accepted forms: `unix:///path`, `/path`, `./path`, `tcp://host:port`,
/// `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    Unix(PathBuf),
    Tcp(String),
}

/// Options applied when dialing an [`Address`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DialOptions {
    pub connect_timeout: Option<Duration>,
    pub max_frame_size: Option<usize>,
}

impl Address {
    /// A TCP address; `addr` must be `host:port`
    pub fn tcp(addr: &str) -> Result<Address> {
        match addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Address::Tcp(addr.to_string()))
            }
            _ => Err(Error::Address(addr.to_string())),
        }
    }

    pub fn unix(path: impl Into<PathBuf>) -> Address {
        Address::Unix(path.into())
    }

    /// Dial the address; a peer that cannot be reached is [`Error::Unreachable`]
    pub async fn connect(&self, opts: DialOptions) -> Result<Box<dyn Connection>> {
        self.dial(opts).await.map_err(|e| match e {
            Error::Io(io) => Error::Unreachable(format!("{self}: {io}")),
            other => other,
        })
    }

    async fn dial(&self, opts: DialOptions) -> Result<Box<dyn Connection>> {
        match self {
            Address::Unix(path) => {
                let mut builder = UnixConnection::builder().path(path);
                if let Some(timeout) = opts.connect_timeout {
                    builder = builder.connect_timeout(timeout);
                }
                if let Some(max) = opts.max_frame_size {
                    builder = builder.max_frame_size(max);
                }
                Ok(Box::new(builder.connect().await?))
            }
            Address::Tcp(addr) => {
                let mut builder = TcpConnection::builder().address(addr.as_str());
                if let Some(timeout) = opts.connect_timeout {
                    builder = builder.connect_timeout(timeout);
                }
                if let Some(max) = opts.max_frame_size {
                    builder = builder.max_frame_size(max);
                }
                Ok(Box::new(builder.connect().await?))
            }
        }
    }

    pub async fn bind(&self, max_frame_size: Option<usize>) -> Result<Box<dyn ConnectionListener>> {
        match self {
            Address::Unix(path) => {
                let mut listener = UnixConnectionListener::bind(path).await?;
                if let Some(max) = max_frame_size {
                    listener = listener.with_max_frame_size(max);
                }
                Ok(Box::new(listener))
            }
            Address::Tcp(addr) => {
                let mut listener = TcpConnectionListener::bind(addr).await?;
                if let Some(max) = max_frame_size {
                    listener = listener.with_max_frame_size(max);
                }
                Ok(Box::new(listener))
            }
        }
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(Error::Address(s.to_string()));
            }
            return Ok(Address::Unix(PathBuf::from(path)));
        }
        if let Some(addr) = s.strip_prefix("tcp://") {
            return Address::tcp(addr);
        }
        if s.starts_with('/') || s.starts_with("./") || s.ends_with(".sock") {
            return Ok(Address::Unix(PathBuf::from(s)));
        }
        Address::tcp(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Unix(path) => write!(f, "unix://{}", path.display()),
            Address::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}
