//! CLI command implementations.

use anyhow::{anyhow, bail, Context, Result};
use onionctl_core::tor::{
    self, ControlConfig, ControlNetwork, OnionKey, PortMap, TorAuth, TorController,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How the user asked us to authenticate.
pub enum AuthChoice {
    /// Pick from PROTOCOLINFO.
    Auto,
    /// Password given on the command line or via the environment.
    Password(String),
    /// Ask on the terminal.
    PromptPassword,
    /// COOKIE with this cookie file.
    Cookie(PathBuf),
    /// SAFECOOKIE with this cookie file.
    SafeCookie(PathBuf),
}

/// Get password from user with secure input (masked).
fn get_password(prompt: &str) -> Result<String> {
    rpassword::prompt_password(prompt)
        .context("Failed to read password")
}

/// Connection settings shared by every command.
pub struct Session {
    config: ControlConfig,
    /// `None` means auto-select.
    auth: Option<TorAuth>,
    timeout: Duration,
}

impl Session {
    /// Resolve CLI options. Prompts for the password up front if requested.
    pub fn new(network: &str, address: String, timeout_secs: u64, auth: AuthChoice) -> Result<Self> {
        let network: ControlNetwork = network.parse().context("Invalid --network")?;

        let auth = match auth {
            AuthChoice::Auto => None,
            AuthChoice::Password(password) => Some(TorAuth::Password(password)),
            AuthChoice::PromptPassword => {
                Some(TorAuth::Password(get_password("Tor control port password: ")?))
            }
            AuthChoice::Cookie(path) => Some(TorAuth::Cookie(path)),
            AuthChoice::SafeCookie(path) => Some(TorAuth::SafeCookie(path)),
        };

        Ok(Self {
            config: ControlConfig {
                network,
                address,
                ..Default::default()
            },
            auth,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Open the control connection without authenticating.
    async fn open(&self) -> Result<TorController> {
        TorController::open_with_config(&self.config)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to Tor control port at {} ({})",
                    self.config.address, self.config.network
                )
            })
    }

    /// Open and authenticate.
    async fn connect(&self) -> Result<TorController> {
        let mut tor = self.open().await?;

        let result = match &self.auth {
            Some(auth) => tor.authenticate(auth).await,
            None => tor.authenticate_auto().await,
        };
        result.map_err(|e| {
            let hint = auth_failure_hint(&e);
            anyhow::Error::new(e).context(hint)
        })?;

        Ok(tor)
    }

    /// Bound a whole command by the session timeout.
    async fn run<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| anyhow!("Timed out after {}s", self.timeout.as_secs()))?
    }
}

/// Context line for an error raised while authenticating.
fn auth_failure_hint(err: &onionctl_core::Error) -> &'static str {
    if err.is_auth_failure() {
        "Tor rejected authentication (check --password, --cookie or --safe-cookie)"
    } else {
        "Tor control port authentication failed"
    }
}

/// Parse a `VPORT=TARGET` port mapping.
pub fn parse_port_mapping(s: &str) -> std::result::Result<(u16, String), String> {
    let (port, target) = s
        .split_once('=')
        .ok_or_else(|| format!("expected VPORT=TARGET, got {:?}", s))?;

    let port: u16 = port
        .trim()
        .parse()
        .map_err(|_| format!("invalid virtual port {:?}", port))?;
    if port == 0 {
        return Err("virtual port must be non-zero".into());
    }

    let target = target.trim();
    if target.is_empty() {
        return Err("target must not be empty".into());
    }

    Ok((port, target.to_string()))
}

fn build_port_map(ports: Vec<(u16, String)>) -> Result<PortMap> {
    let mut map = PortMap::new();
    for (port, target) in ports {
        if map.insert(port, target).is_some() {
            bail!("Virtual port {} given more than once", port);
        }
    }
    Ok(map)
}

/// Show PROTOCOLINFO.
pub async fn protocol_info(session: &Session) -> Result<()> {
    let info = session
        .run(async {
            let mut tor = session.open().await?;
            let info = tor.get_protocol_info().await?;
            tor.close().await?;
            Ok::<_, anyhow::Error>(info)
        })
        .await?;

    let methods: Vec<String> = info.auth_methods.iter().map(|m| format!("{:?}", m)).collect();

    println!("\nTor control port:");
    println!("  Tor version:   {}", info.tor_version.as_deref().unwrap_or("unknown"));
    println!("  Auth methods:  {}", methods.join(", "));
    if let Some(cookie_file) = &info.cookie_file {
        println!("  Cookie file:   {}", cookie_file.display());
    }

    Ok(())
}

/// Configure a persistent hidden service and print its address.
pub async fn create_service(session: &Session, dir: &Path, ports: Vec<(u16, String)>) -> Result<()> {
    if !dir.is_absolute() {
        bail!("Hidden service directory must be an absolute path");
    }
    let ports = build_port_map(ports)?;

    session
        .run(async {
            let mut tor = session.connect().await?;
            tor.create_hidden_service(dir, &ports)
                .await
                .context("Failed to create hidden service")?;
            tor.close().await?;
            Ok::<_, anyhow::Error>(())
        })
        .await?;

    println!("Tor hidden service created.");

    // Tor writes the hostname file shortly after accepting the config.
    let onion = session
        .run(async {
            loop {
                match tor::read_onion(dir).await {
                    Ok(onion) => return Ok::<_, anyhow::Error>(onion),
                    Err(_) => tokio::time::sleep(Duration::from_millis(250)).await,
                }
            }
        })
        .await
        .context("Hidden service hostname file was not readable")?;

    println!("  Onion address: {}", onion.trim());

    Ok(())
}

/// Remove a persistent hidden service.
pub async fn delete_service(session: &Session, dir: &Path) -> Result<()> {
    session
        .run(async {
            let mut tor = session.connect().await?;
            tor.delete_hidden_service(dir)
                .await
                .context("Failed to delete hidden service")?;
            tor.close().await?;
            Ok::<_, anyhow::Error>(())
        })
        .await?;

    println!("Tor hidden service removed: {}", dir.display());
    Ok(())
}

/// Print the onion address of a persistent hidden service.
pub async fn show_onion(dir: &Path) -> Result<()> {
    let onion = tor::read_onion(dir).await?;
    print!("{}", onion);
    Ok(())
}

/// Create an ephemeral hidden service.
pub async fn create_ephemeral(
    session: &Session,
    port: u16,
    target: &str,
    key_out: Option<&Path>,
) -> Result<()> {
    let service = session
        .run(async {
            let mut tor = session.connect().await?;
            let service = tor
                .create_ephemeral_hidden_service(port, target)
                .await
                .context("Failed to create ephemeral hidden service")?;
            tor.close().await?;
            Ok::<_, anyhow::Error>(service)
        })
        .await?;

    println!("Ephemeral hidden service created.");
    println!("  Onion address: {}", service.onion_address());

    match key_out {
        Some(path) => {
            write_key_file(path, &service.private_key)?;
            println!("  Private key written to: {}", path.display());
        }
        None => {
            println!("  Private key:   {}", service.private_key.to_key_spec().as_str());
        }
    }
    println!("\nKeep the private key to restart this service after tor restarts.");

    Ok(())
}

/// Restart an ephemeral hidden service from its private key.
pub async fn restart_ephemeral(
    session: &Session,
    key: Option<String>,
    key_file: Option<&Path>,
    port: u16,
    target: &str,
) -> Result<()> {
    let key = match (key, key_file) {
        (Some(key), _) => key,
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read key file {}", path.display()))?,
        (None, None) => bail!("Either --key or --key-file is required"),
    };
    let key: OnionKey = key.trim().parse().context("Invalid private key")?;

    let restarted = session
        .run(async {
            let mut tor = session.connect().await?;
            let restarted = tor
                .restart_ephemeral_hidden_service(&key, port, target)
                .await
                .context("Failed to restart ephemeral hidden service")?;
            tor.close().await?;
            Ok::<_, anyhow::Error>(restarted)
        })
        .await?;

    match restarted {
        Some(service_id) => println!("Ephemeral hidden service restarted: {}.onion", service_id),
        None => println!("Ephemeral hidden service is already running."),
    }

    Ok(())
}

/// Remove a detached ephemeral hidden service.
pub async fn delete_ephemeral(session: &Session, service_id: &str) -> Result<()> {
    let service_id = service_id.trim_end_matches(".onion");

    session
        .run(async {
            let mut tor = session.connect().await?;
            tor.del_onion(service_id)
                .await
                .context("Failed to remove ephemeral hidden service")?;
            tor.close().await?;
            Ok::<_, anyhow::Error>(())
        })
        .await?;

    println!("Ephemeral hidden service removed: {}.onion", service_id);
    Ok(())
}

/// Write `<keytype>:<blob>` to `path`, readable by the owner only.
fn write_key_file(path: &Path, key: &OnionKey) -> Result<()> {
    use std::io::Write as _;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .with_context(|| format!("Failed to create key file {}", path.display()))?;
    file.write_all(key.to_key_spec().as_bytes())
        .and_then(|_| file.write_all(b"\n"))
        .with_context(|| format!("Failed to write key file {}", path.display()))?;

    Ok(())
}
