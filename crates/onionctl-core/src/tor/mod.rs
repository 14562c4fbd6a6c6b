//! Tor control-port integration.
//!
//! Provides the control-port line transport, authentication and onion
//! service management.
//!
//! ## Design
//!
//! One [`TorController`] owns one control connection. The protocol has no
//! request ids, so every operation takes `&mut self` and completes a full
//! command/reply round trip before returning. Callers needing concurrent
//! operations open more connections.

mod auth;
mod connection;
mod controller;
mod reply;
mod service;

pub use auth::{
    compute_client_hash, compute_server_hash, generate_client_nonce, read_auth_cookie,
    verify_server_hash, AuthChallenge, AuthMethod, ProtocolInfo, TorAuth, AUTH_COOKIE_LEN,
    SAFE_COOKIE_HASH_LEN, SAFE_COOKIE_NONCE_LEN,
};
pub use connection::{dial, BoxedControlStream, ControlConfig, ControlNetwork, ControlStream};
pub use controller::TorController;
pub use reply::{Reply, STATUS_OK, STATUS_ONION_COLLISION};
pub use service::{
    read_onion, AddOnionReply, EphemeralService, OnionKey, PortMap, HOSTNAME_FILE, NEW_KEY_BEST,
};

/// Default control port for Tor.
pub const DEFAULT_CONTROL_PORT: u16 = 9051;

/// Default bound on dialing the control port (seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 10;
