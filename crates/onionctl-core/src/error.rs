//! Error types for onionctl.
//!
//! Each variant maps to one failure class of a control-port session. Errors
//! carry the daemon's status code and message where there is one, but never
//! secret material (cookies, nonces, private keys).

use thiserror::Error;

/// Core error type for control-port operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Dialing, reading from or writing to the control connection failed.
    #[error("control connection error: {0}")]
    Connection(String),

    /// The daemon sent something that does not fit the reply grammar,
    /// or a command could not be framed.
    #[error("control protocol error: {0}")]
    Protocol(String),

    /// Authentication was rejected or could not be verified.
    /// Never triggers a fallback to a weaker method.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A local file (cookie, hostname) could not be read.
    #[error("file error: {0}")]
    Io(String),

    /// A hidden service command was rejected by the daemon.
    #[error("command rejected: {code} {message}")]
    Operation {
        /// Status code returned by Tor.
        code: u16,
        /// Daemon-provided reply text.
        message: String,
    },

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,
}

/// Result type alias using onionctl's Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Status code returned by the daemon, if this error carries one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Operation { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the daemon (or our own verification) refused authentication.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Error::Auth(_))
    }
}
