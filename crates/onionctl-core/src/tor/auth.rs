//! Control-port authentication.
//!
//! Supports NULL, password (`HASHEDPASSWORD`), cookie and SAFECOOKIE
//! authentication (control-spec.txt, sections 3.5 and 3.24).
//!
//! SAFECOOKIE proves possession of the cookie in both directions without
//! putting it on the wire:
//!
//! ```text
//! C: AUTHCHALLENGE SAFECOOKIE <client nonce>
//! S: 250 AUTHCHALLENGE SERVERHASH=<hash> SERVERNONCE=<nonce>
//! C: AUTHENTICATE <client hash>           only after SERVERHASH verified
//! S: 250 OK
//! ```

use super::controller::TorController;
use super::reply::{self, Reply, STATUS_OK};
use crate::error::{Error, Result};
use crate::logging::{Redacted, RedactedBytes};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Length of Tor's control auth cookie.
pub const AUTH_COOKIE_LEN: usize = 32;

/// Length of the client and server nonces.
pub const SAFE_COOKIE_NONCE_LEN: usize = 32;

/// Length of SERVERHASH / client hash (HMAC-SHA256 output).
pub const SAFE_COOKIE_HASH_LEN: usize = 32;

const SERVER_HASH_KEY: &[u8] = b"Tor safe cookie authentication server-to-controller hash";
const CLIENT_HASH_KEY: &[u8] = b"Tor safe cookie authentication controller-to-server hash";

const AUTH_CHALLENGE_PREFIX: &str = "AUTHCHALLENGE ";

/// Authentication method for Tor ControlPort.
#[derive(Clone)]
pub enum TorAuth {
    /// No authentication required.
    None,
    /// Password authentication.
    Password(String),
    /// Cookie authentication (sends the cookie itself).
    Cookie(PathBuf),
    /// SAFECOOKIE challenge-response using the cookie file.
    SafeCookie(PathBuf),
}

impl fmt::Debug for TorAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TorAuth::None => write!(f, "None"),
            TorAuth::Password(p) => f.debug_tuple("Password").field(&Redacted(p)).finish(),
            TorAuth::Cookie(path) => f.debug_tuple("Cookie").field(path).finish(),
            TorAuth::SafeCookie(path) => f.debug_tuple("SafeCookie").field(path).finish(),
        }
    }
}

/// Authentication methods advertised in PROTOCOLINFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// No authentication required.
    Null,
    /// Password authentication.
    HashedPassword,
    /// Cookie file authentication.
    Cookie,
    /// Safe cookie authentication (HMAC-based).
    SafeCookie,
}

impl AuthMethod {
    /// Parse an auth method name. Unknown names yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NULL" => Some(AuthMethod::Null),
            "HASHEDPASSWORD" => Some(AuthMethod::HashedPassword),
            "COOKIE" => Some(AuthMethod::Cookie),
            "SAFECOOKIE" => Some(AuthMethod::SafeCookie),
            _ => None,
        }
    }
}

/// Information from PROTOCOLINFO response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolInfo {
    /// PROTOCOLINFO version (currently always 1).
    pub protocol_version: u32,
    /// Tor version string, if reported.
    pub tor_version: Option<String>,
    /// Available authentication methods.
    pub auth_methods: Vec<AuthMethod>,
    /// Path to control port cookie file for authentication.
    pub cookie_file: Option<PathBuf>,
}

impl ProtocolInfo {
    /// Parse a PROTOCOLINFO reply.
    ///
    /// ```text
    /// 250-PROTOCOLINFO 1
    /// 250-AUTH METHODS=COOKIE,SAFECOOKIE COOKIEFILE="/run/tor/control.authcookie"
    /// 250-VERSION Tor="0.4.8.10"
    /// 250 OK
    /// ```
    pub fn parse(reply: &Reply) -> Result<Self> {
        let mut protocol_version = None;
        let mut tor_version = None;
        let mut auth_methods = None;
        let mut cookie_file = None;

        for line in reply.lines() {
            if let Some(rest) = line.strip_prefix("PROTOCOLINFO ") {
                let version = rest.trim().parse::<u32>().map_err(|_| {
                    Error::Protocol(format!("invalid PROTOCOLINFO version: {:?}", rest))
                })?;
                protocol_version = Some(version);
            } else if let Some(rest) = line.strip_prefix("AUTH ") {
                let methods = reply::find_field(rest, "METHODS")
                    .ok_or_else(|| Error::Protocol("PROTOCOLINFO AUTH line missing METHODS".into()))?;
                auth_methods = Some(methods.split(',').filter_map(AuthMethod::parse).collect());

                if let Some(start) = rest.find("COOKIEFILE=") {
                    let (path, _) = reply::parse_quoted(&rest[start + "COOKIEFILE=".len()..])
                        .ok_or_else(|| Error::Protocol("malformed COOKIEFILE".into()))?;
                    cookie_file = Some(PathBuf::from(path));
                }
            } else if let Some(rest) = line.strip_prefix("VERSION ") {
                if let Some(start) = rest.find("Tor=") {
                    tor_version = reply::parse_quoted(&rest[start + "Tor=".len()..])
                        .map(|(version, _)| version);
                }
            }
        }

        Ok(ProtocolInfo {
            protocol_version: protocol_version
                .ok_or_else(|| Error::Protocol("PROTOCOLINFO line missing".into()))?,
            tor_version,
            auth_methods: auth_methods
                .ok_or_else(|| Error::Protocol("PROTOCOLINFO AUTH line missing".into()))?,
            cookie_file,
        })
    }

    /// Whether the daemon accepts `method`.
    pub fn supports(&self, method: AuthMethod) -> bool {
        self.auth_methods.contains(&method)
    }

    /// Strongest method usable without a password: SAFECOOKIE, then COOKIE, then NULL.
    pub fn preferred_auth(&self) -> Option<TorAuth> {
        if let Some(cookie_file) = &self.cookie_file {
            if self.supports(AuthMethod::SafeCookie) {
                return Some(TorAuth::SafeCookie(cookie_file.clone()));
            }
            if self.supports(AuthMethod::Cookie) {
                return Some(TorAuth::Cookie(cookie_file.clone()));
            }
        }
        if self.supports(AuthMethod::Null) {
            return Some(TorAuth::None);
        }
        None
    }
}

/// Parsed `AUTHCHALLENGE SERVERHASH=<hex> SERVERNONCE=<hex>` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// HMAC the daemon computed with the server-to-controller key.
    pub server_hash: [u8; SAFE_COOKIE_HASH_LEN],
    /// Daemon-chosen nonce.
    pub server_nonce: [u8; SAFE_COOKIE_NONCE_LEN],
}

impl AuthChallenge {
    /// Parse the text of the AUTHCHALLENGE reply line.
    ///
    /// Fails closed: a missing prefix or field, bad hex or a wrong length is a
    /// protocol error.
    pub fn parse(text: &str) -> Result<Self> {
        let rest = text
            .trim()
            .strip_prefix(AUTH_CHALLENGE_PREFIX)
            .ok_or_else(|| Error::Protocol("parsing AUTHCHALLENGE response".into()))?;

        let server_hash = reply::find_field(rest, "SERVERHASH")
            .ok_or_else(|| Error::Protocol("AUTHCHALLENGE missing SERVERHASH".into()))?;
        let server_nonce = reply::find_field(rest, "SERVERNONCE")
            .ok_or_else(|| Error::Protocol("AUTHCHALLENGE missing SERVERNONCE".into()))?;

        Ok(Self {
            server_hash: decode_fixed("SERVERHASH", server_hash)?,
            server_nonce: decode_fixed("SERVERNONCE", server_nonce)?,
        })
    }
}

fn decode_fixed<const N: usize>(name: &str, value: &str) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    hex::decode_to_slice(value, &mut out)
        .map_err(|e| Error::Protocol(format!("decoding AUTHCHALLENGE {}: {}", name, e)))?;
    Ok(out)
}

/// Read the authentication cookie from a file.
pub async fn read_auth_cookie(path: &Path) -> Result<Zeroizing<Vec<u8>>> {
    let cookie = Zeroizing::new(tokio::fs::read(path).await.map_err(|e| {
        Error::Io(format!("reading cookie auth file {}: {}", path.display(), e))
    })?);

    if cookie.len() != AUTH_COOKIE_LEN {
        return Err(Error::Io(format!(
            "cookie auth file {} has length {} (expected {})",
            path.display(),
            cookie.len(),
            AUTH_COOKIE_LEN
        )));
    }

    tracing::debug!(path = %path.display(), cookie = %RedactedBytes(&cookie), "Read auth cookie");
    Ok(cookie)
}

/// Generate a fresh client nonce from the OS CSPRNG.
pub fn generate_client_nonce() -> [u8; SAFE_COOKIE_NONCE_LEN] {
    let mut nonce = [0u8; SAFE_COOKIE_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

fn safe_cookie_mac(
    key: &[u8],
    cookie: &[u8],
    client_nonce: &[u8],
    server_nonce: &[u8],
) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| Error::Auth("invalid HMAC key".into()))?;
    mac.update(cookie);
    mac.update(client_nonce);
    mac.update(server_nonce);
    Ok(mac)
}

fn finalize(mac: HmacSha256) -> [u8; SAFE_COOKIE_HASH_LEN] {
    let mut hash = [0u8; SAFE_COOKIE_HASH_LEN];
    hash.copy_from_slice(&mac.finalize().into_bytes());
    hash
}

/// HMAC-SHA256 the daemon must send as SERVERHASH.
pub fn compute_server_hash(
    cookie: &[u8],
    client_nonce: &[u8],
    server_nonce: &[u8],
) -> Result<[u8; SAFE_COOKIE_HASH_LEN]> {
    safe_cookie_mac(SERVER_HASH_KEY, cookie, client_nonce, server_nonce).map(finalize)
}

/// HMAC-SHA256 the controller sends back in AUTHENTICATE.
pub fn compute_client_hash(
    cookie: &[u8],
    client_nonce: &[u8],
    server_nonce: &[u8],
) -> Result<[u8; SAFE_COOKIE_HASH_LEN]> {
    safe_cookie_mac(CLIENT_HASH_KEY, cookie, client_nonce, server_nonce).map(finalize)
}

/// Check a received SERVERHASH in constant time.
pub fn verify_server_hash(
    cookie: &[u8],
    client_nonce: &[u8],
    server_nonce: &[u8],
    server_hash: &[u8],
) -> Result<bool> {
    let mac = safe_cookie_mac(SERVER_HASH_KEY, cookie, client_nonce, server_nonce)?;
    Ok(mac.verify_slice(server_hash).is_ok())
}

impl<S: AsyncRead + AsyncWrite + Unpin> TorController<S> {
    /// Authenticate with the control port.
    pub async fn authenticate(&mut self, auth: &TorAuth) -> Result<()> {
        match auth {
            TorAuth::None => self.authenticate_null().await,
            TorAuth::Password(password) => self.authenticate_password(password).await,
            TorAuth::Cookie(path) => self.authenticate_cookie(path).await,
            TorAuth::SafeCookie(path) => self.authenticate_safe_cookie(path).await,
        }
    }

    /// Authenticate against a daemon that requires no credentials.
    pub async fn authenticate_null(&mut self) -> Result<()> {
        self.send_authenticate("AUTHENTICATE\n", "null").await
    }

    /// Authenticate with the plaintext control password.
    pub async fn authenticate_password(&mut self, password: &str) -> Result<()> {
        let command = Zeroizing::new(format!("AUTHENTICATE {}\n", reply::quote(password)));
        self.send_authenticate(&command, "password").await
    }

    /// Authenticate by sending the cookie itself, hex-encoded.
    ///
    /// Anyone who can read the connection learns the cookie, so only use this
    /// over a trusted local transport. Prefer [`Self::authenticate_safe_cookie`].
    pub async fn authenticate_cookie(&mut self, cookie_path: &Path) -> Result<()> {
        let cookie = read_auth_cookie(cookie_path).await?;
        let command = Zeroizing::new(format!("AUTHENTICATE {}\n", hex::encode(&cookie[..])));
        self.send_authenticate(&command, "cookie").await
    }

    /// Authenticate with the SAFECOOKIE challenge-response.
    ///
    /// A fresh client nonce is drawn on every call. The client hash is only
    /// sent once the daemon's SERVERHASH has been verified.
    pub async fn authenticate_safe_cookie(&mut self, cookie_path: &Path) -> Result<()> {
        let cookie = read_auth_cookie(cookie_path).await?;
        let client_nonce = generate_client_nonce();

        let client_hash = Zeroizing::new(self.auth_challenge(&cookie, &client_nonce).await?);

        let command = Zeroizing::new(format!("AUTHENTICATE {}\n", hex::encode(&client_hash[..])));
        self.send_authenticate(&command, "safecookie").await
    }

    /// Run AUTHCHALLENGE and return the client hash to authenticate with.
    async fn auth_challenge(
        &mut self,
        cookie: &[u8],
        client_nonce: &[u8; SAFE_COOKIE_NONCE_LEN],
    ) -> Result<[u8; SAFE_COOKIE_HASH_LEN]> {
        let command = format!("AUTHCHALLENGE SAFECOOKIE {}\n", hex::encode(client_nonce));
        let reply = self.send_raw(&command).await?;
        if !reply.is_ok() {
            return Err(Error::Auth(format!(
                "AUTHCHALLENGE rejected: {} {}",
                reply.code(),
                reply.text()
            )));
        }

        let challenge = AuthChallenge::parse(reply.message())?;

        if !verify_server_hash(
            cookie,
            client_nonce,
            &challenge.server_nonce,
            &challenge.server_hash,
        )? {
            tracing::warn!("Tor sent an invalid AUTHCHALLENGE server hash");
            return Err(Error::Auth("server hash invalid".into()));
        }

        compute_client_hash(cookie, client_nonce, &challenge.server_nonce)
    }

    async fn send_authenticate(&mut self, command: &str, method: &'static str) -> Result<()> {
        let reply = self.send_raw(command).await?;
        if !reply.is_ok() {
            return Err(Error::Auth(format!("{} {}", reply.code(), reply.text())));
        }

        self.set_authenticated();
        tracing::info!(method, "Authenticated with Tor control port");
        Ok(())
    }

    /// Get protocol info to determine authentication method.
    pub async fn get_protocol_info(&mut self) -> Result<ProtocolInfo> {
        let reply = self.send_command("PROTOCOLINFO 1\n", STATUS_OK).await?;
        ProtocolInfo::parse(&reply)
    }

    /// Authenticate with the strongest password-less method the daemon offers.
    ///
    /// Runs exactly one method; a rejected attempt is returned as is.
    pub async fn authenticate_auto(&mut self) -> Result<()> {
        let info = self.get_protocol_info().await?;

        tracing::debug!(
            methods = ?info.auth_methods,
            cookie_file = ?info.cookie_file,
            "Tor auth methods"
        );

        let auth = info.preferred_auth().ok_or_else(|| {
            Error::Auth(format!(
                "no password-less method available (offered: {:?})",
                info.auth_methods
            ))
        })?;
        self.authenticate(&auth).await
    }
}
