//! Tor onion service management.
//!
//! Persistent services are configured with SETCONF and keep their keys in a
//! service directory; Tor writes the address to `<dir>/hostname`. Ephemeral
//! services are created with ADD_ONION, live until the daemon exits, and are
//! restarted by resubmitting the private key returned at creation.

use super::controller::TorController;
use super::reply::{self, Reply, STATUS_OK, STATUS_ONION_COLLISION};
use crate::error::{Error, Result};
use crate::logging::{Redacted, RedactedOnion};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::path::Path;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncWrite};
use zeroize::Zeroizing;

/// Virtual port → local target (`host:port` or `unix:/path`).
pub type PortMap = BTreeMap<u16, String>;

/// Key spec asking Tor to generate a key of its preferred type.
pub const NEW_KEY_BEST: &str = "NEW:BEST";

/// File inside a persistent service directory holding the onion address.
pub const HOSTNAME_FILE: &str = "hostname";

/// Private key of an ephemeral onion service, `<keytype>:<blob>`.
///
/// The blob is zeroized on drop and never shown by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct OnionKey {
    key_type: String,
    blob: Zeroizing<String>,
}

impl OnionKey {
    /// Build a key from its type (e.g. `ED25519-V3`) and base64 blob.
    pub fn new(key_type: &str, blob: &str) -> Result<Self> {
        let valid_type = !key_type.is_empty()
            && key_type.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid_type || key_type.eq_ignore_ascii_case("NEW") {
            return Err(Error::Protocol(format!("invalid key type: {:?}", key_type)));
        }

        let valid_blob = !blob.is_empty()
            && blob
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='));
        if !valid_blob {
            return Err(Error::Protocol("invalid private key blob".into()));
        }

        Ok(Self {
            key_type: key_type.to_string(),
            blob: Zeroizing::new(blob.to_string()),
        })
    }

    /// Key algorithm, e.g. `ED25519-V3` or `RSA1024`.
    pub fn key_type(&self) -> &str {
        &self.key_type
    }

    /// Base64 key material.
    pub fn blob(&self) -> &str {
        &self.blob
    }

    /// `<keytype>:<blob>`, as accepted by ADD_ONION.
    pub fn to_key_spec(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("{}:{}", self.key_type, self.blob.as_str()))
    }
}

impl FromStr for OnionKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (key_type, blob) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| Error::Protocol("private key must be <keytype>:<blob>".into()))?;
        OnionKey::new(key_type, blob)
    }
}

impl fmt::Debug for OnionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnionKey")
            .field("key_type", &self.key_type)
            .field("blob", &Redacted(()))
            .finish()
    }
}

/// A newly created ephemeral onion service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralService {
    /// Service ID returned by Tor (hostname without .onion).
    pub service_id: String,
    /// Key to pass to
    /// [`restart_ephemeral_hidden_service`](TorController::restart_ephemeral_hidden_service).
    pub private_key: OnionKey,
}

impl EphemeralService {
    /// `<service id>.onion`.
    pub fn onion_address(&self) -> String {
        format!("{}.onion", self.service_id)
    }
}

/// Outcome of one ADD_ONION round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOnionReply {
    /// Status code returned by Tor.
    pub code: u16,
    /// `ServiceID=` value, if present.
    pub service_id: Option<String>,
    /// `PrivateKey=` value, if present (only for generated keys).
    pub private_key: Option<OnionKey>,
    /// Full reply text.
    pub message: String,
}

impl AddOnionReply {
    /// Extract the structured fields of an ADD_ONION reply.
    ///
    /// ```text
    /// 250-ServiceID=<onion address>
    /// 250-PrivateKey=<keytype>:<blob>
    /// 250 OK
    /// ```
    ///
    /// Absent fields are `None`; present but malformed ones are protocol errors.
    pub fn parse(reply: &Reply) -> Result<Self> {
        let service_id = reply
            .field("ServiceID")
            .map(|id| {
                if is_service_id(id) {
                    Ok(id.to_string())
                } else {
                    Err(Error::Protocol(format!("invalid ServiceID: {:?}", id)))
                }
            })
            .transpose()?;

        let private_key = reply.field("PrivateKey").map(OnionKey::from_str).transpose()?;

        Ok(Self {
            code: reply.code(),
            service_id,
            private_key,
            message: reply.text(),
        })
    }

    /// Tor created the service.
    pub fn is_created(&self) -> bool {
        self.code == STATUS_OK
    }

    /// Tor already hosts a service with this key.
    pub fn is_collision(&self) -> bool {
        self.code == STATUS_ONION_COLLISION
    }

    fn into_operation_error(self) -> Error {
        Error::Operation {
            code: self.code,
            message: self.message,
        }
    }
}

/// Onion service ids are lowercase base32.
fn is_service_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| matches!(c, 'a'..='z' | '2'..='7'))
}

fn dir_arg(service_dir: &Path) -> Result<String> {
    let dir = service_dir
        .to_str()
        .ok_or_else(|| Error::Protocol("service directory is not valid UTF-8".into()))?;
    if dir.is_empty() {
        return Err(Error::Protocol("service directory is empty".into()));
    }
    Ok(reply::quote_if_needed(dir))
}

/// A bare command argument: non-empty, no whitespace or quotes.
fn bare_arg<'a>(name: &str, value: &'a str) -> Result<&'a str> {
    if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '"') {
        return Err(Error::Protocol(format!("invalid {}: {:?}", name, value)));
    }
    Ok(value)
}

fn create_hidden_service_command(service_dir: &Path, ports: &PortMap) -> Result<String> {
    let mut command = format!("SETCONF hiddenservicedir={}", dir_arg(service_dir)?);
    for (virtual_port, target) in ports {
        let _ = write!(
            command,
            " hiddenserviceport={}",
            reply::quote(&format!("{} {}", virtual_port, target))
        );
    }
    command.push_str(" HiddenServiceDirGroupReadable=1\n");
    Ok(command)
}

fn add_onion_command(key_spec: &str, port: u16, destination: &str) -> Result<Zeroizing<String>> {
    Ok(Zeroizing::new(format!(
        "ADD_ONION {} FLAGS=Detach Port={},{}\n",
        bare_arg("key spec", key_spec)?,
        port,
        bare_arg("destination", destination)?
    )))
}

/// Read the onion address Tor wrote for a persistent service.
///
/// Returns the `hostname` file contents verbatim (including the newline).
pub async fn read_onion(service_dir: &Path) -> Result<String> {
    let path = service_dir.join(HOSTNAME_FILE);
    tokio::fs::read_to_string(&path).await.map_err(|e| {
        Error::Io(format!(
            "reading Tor hidden service hostname file {}: {}",
            path.display(),
            e
        ))
    })
}

impl<S: AsyncRead + AsyncWrite + Unpin> TorController<S> {
    /// Configure a persistent hidden service in `service_dir`.
    ///
    /// Sets `HiddenServiceDirGroupReadable` so the hostname file is group
    /// readable. SETCONF replaces Tor's hidden service configuration as a whole.
    pub async fn create_hidden_service(&mut self, service_dir: &Path, ports: &PortMap) -> Result<()> {
        self.require_authenticated()?;

        let command = create_hidden_service_command(service_dir, ports)?;
        self.expect_ok(&command).await?;

        tracing::info!(
            service_dir = %service_dir.display(),
            ports = ports.len(),
            "Configured hidden service"
        );
        Ok(())
    }

    /// Drop the hidden service configured for `service_dir`.
    pub async fn delete_hidden_service(&mut self, service_dir: &Path) -> Result<()> {
        self.require_authenticated()?;

        let command = format!("SETCONF hiddenservicedir={}\n", dir_arg(service_dir)?);
        self.expect_ok(&command).await?;

        tracing::info!(service_dir = %service_dir.display(), "Removed hidden service");
        Ok(())
    }

    /// Issue ADD_ONION with `key_spec` and return the parsed outcome.
    ///
    /// No status is treated as an error here; callers branch on the code.
    pub async fn add_onion(
        &mut self,
        key_spec: &str,
        port: u16,
        destination: &str,
    ) -> Result<AddOnionReply> {
        self.require_authenticated()?;

        let command = add_onion_command(key_spec, port, destination)?;
        let reply = self.send_raw(&command).await?;
        AddOnionReply::parse(&reply)
    }

    /// Create a detached ephemeral service with a freshly generated key.
    pub async fn create_ephemeral_hidden_service(
        &mut self,
        port: u16,
        destination: &str,
    ) -> Result<EphemeralService> {
        let reply = self.add_onion(NEW_KEY_BEST, port, destination).await?;
        if !reply.is_created() {
            return Err(reply.into_operation_error());
        }

        let service_id = reply
            .service_id
            .ok_or_else(|| Error::Protocol("ADD_ONION response missing ServiceID".into()))?;
        let private_key = reply
            .private_key
            .ok_or_else(|| Error::Protocol("ADD_ONION response missing PrivateKey".into()))?;

        tracing::info!(
            service_id = %RedactedOnion(&service_id),
            port,
            "Created ephemeral hidden service"
        );

        Ok(EphemeralService {
            service_id,
            private_key,
        })
    }

    /// Re-register an ephemeral service from its saved private key.
    ///
    /// Returns the service id on 250. A 550 (address collision) means the
    /// daemon already runs this service and counts as success; the service id
    /// is returned if the reply carries one, `None` otherwise.
    pub async fn restart_ephemeral_hidden_service(
        &mut self,
        private_key: &OnionKey,
        port: u16,
        destination: &str,
    ) -> Result<Option<String>> {
        let reply = self
            .add_onion(&private_key.to_key_spec(), port, destination)
            .await?;

        match reply.code {
            STATUS_OK => {
                let service_id = reply
                    .service_id
                    .ok_or_else(|| Error::Protocol("ADD_ONION response missing ServiceID".into()))?;
                tracing::info!(
                    service_id = %RedactedOnion(&service_id),
                    port,
                    "Restarted ephemeral hidden service"
                );
                Ok(Some(service_id))
            }
            STATUS_ONION_COLLISION => {
                tracing::debug!("Ephemeral hidden service already running");
                Ok(reply.service_id)
            }
            _ => Err(reply.into_operation_error()),
        }
    }

    /// Remove a detached ephemeral service.
    pub async fn del_onion(&mut self, service_id: &str) -> Result<()> {
        self.require_authenticated()?;

        let command = format!("DEL_ONION {}\n", bare_arg("service id", service_id)?);
        self.expect_ok(&command).await?;

        tracing::info!(service_id = %RedactedOnion(service_id), "Removed onion service");
        Ok(())
    }

    /// Send a hidden service command that must answer 250.
    async fn expect_ok(&mut self, command: &str) -> Result<Reply> {
        let reply = self.send_raw(command).await?;
        if !reply.is_ok() {
            return Err(Error::Operation {
                code: reply.code(),
                message: reply.text(),
            });
        }
        Ok(reply)
    }
}
