//! Control-port dialing.
//!
//! Opens the byte stream a [`TorController`](super::TorController) runs on,
//! over TCP or a Unix domain socket.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Transport the control port listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlNetwork {
    /// `ControlPort` over TCP.
    Tcp,
    /// `ControlSocket` (Unix domain socket).
    Unix,
}

impl FromStr for ControlNetwork {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(ControlNetwork::Tcp),
            "unix" => Ok(ControlNetwork::Unix),
            other => Err(Error::Connection(format!("unsupported network: {}", other))),
        }
    }
}

impl fmt::Display for ControlNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlNetwork::Tcp => write!(f, "tcp"),
            ControlNetwork::Unix => write!(f, "unix"),
        }
    }
}

/// Configuration for the control connection.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Transport to dial.
    pub network: ControlNetwork,
    /// `host:port` for TCP, socket path for Unix.
    pub address: String,
    /// Upper bound on establishing the connection.
    pub connect_timeout: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            network: ControlNetwork::Tcp,
            address: format!("127.0.0.1:{}", super::DEFAULT_CONTROL_PORT),
            connect_timeout: Duration::from_secs(super::CONNECT_TIMEOUT_SECS),
        }
    }
}

/// Byte stream a controller can run on.
pub trait ControlStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ControlStream for T {}

/// Type-erased stream returned by [`dial`].
pub type BoxedControlStream = Box<dyn ControlStream>;

/// Dial the control port described by `config`.
pub async fn dial(config: &ControlConfig) -> Result<BoxedControlStream> {
    tracing::debug!(network = %config.network, address = %config.address, "Dialing Tor control port");

    tokio::time::timeout(config.connect_timeout, dial_inner(config))
        .await
        .map_err(|_| Error::Timeout)?
}

async fn dial_inner(config: &ControlConfig) -> Result<BoxedControlStream> {
    match config.network {
        ControlNetwork::Tcp => {
            let stream = TcpStream::connect(&config.address).await.map_err(|e| {
                Error::Connection(format!("failed to connect to {}: {}", config.address, e))
            })?;
            stream
                .set_nodelay(true)
                .map_err(|e| Error::Connection(format!("failed to configure socket: {}", e)))?;
            Ok(Box::new(stream))
        }
        ControlNetwork::Unix => dial_unix(&config.address).await,
    }
}

#[cfg(unix)]
async fn dial_unix(path: &str) -> Result<BoxedControlStream> {
    let stream = tokio::net::UnixStream::connect(path)
        .await
        .map_err(|e| Error::Connection(format!("failed to connect to {}: {}", path, e)))?;
    Ok(Box::new(stream))
}

#[cfg(not(unix))]
async fn dial_unix(path: &str) -> Result<BoxedControlStream> {
    Err(Error::Connection(format!(
        "unix sockets are not supported on this platform: {}",
        path
    )))
}
