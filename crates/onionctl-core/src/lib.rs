//! # onionctl core library
//!
//! A client for the Tor daemon's control protocol, focused on authenticating
//! to a running Tor and managing onion services on it.
//!
//! ## Capabilities
//!
//! - Control-port framing over TCP or Unix sockets
//! - NULL, password, cookie and SAFECOOKIE authentication
//! - Persistent hidden services (SETCONF) and their `hostname` file
//! - Ephemeral hidden services (ADD_ONION / DEL_ONION), including restart
//!   from a saved private key
//!
//! ## Security Model
//!
//! - SAFECOOKIE verifies the daemon's SERVERHASH before revealing anything
//! - Cookies and private keys are zeroized on drop
//! - Passwords, cookie tokens and key blobs never reach log output
//! - No automatic downgrade to a weaker authentication method
//!
//! ## Example
//!
//! ```no_run
//! use onionctl_core::tor::{TorAuth, TorController};
//!
//! # async fn run() -> onionctl_core::Result<()> {
//! let mut tor = TorController::open("tcp", "127.0.0.1:9051").await?;
//! tor.authenticate(&TorAuth::Password("hunter2".into())).await?;
//! let service = tor.create_ephemeral_hidden_service(80, "127.0.0.1:8080").await?;
//! println!("{}", service.onion_address());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod error;
pub mod logging;
pub mod tor;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
