//! onionctl Command-Line Interface
//!
//! Authenticates to a local Tor daemon over its control port and manages
//! persistent and ephemeral onion services.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{AuthChoice, Session};

/// onionctl - manage Tor onion services over the control port
#[derive(Parser)]
#[command(name = "onionctl")]
#[command(author, version = onionctl_core::VERSION, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Control port transport: tcp or unix
    #[arg(long, default_value = "tcp")]
    network: String,

    /// Control port address (host:port, or socket path for unix)
    #[arg(short, long, env = "ONIONCTL_CONTROL", default_value = "127.0.0.1:9051")]
    control: String,

    /// Seconds to wait for the whole control-port session
    #[arg(long, default_value = "30")]
    timeout: u64,

    #[command(flatten)]
    auth: AuthArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Authentication options. Without any of these the strongest method
/// advertised by PROTOCOLINFO is used.
#[derive(Args)]
struct AuthArgs {
    /// Control port password
    #[arg(long, env = "ONIONCTL_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Prompt for the control port password
    #[arg(long)]
    ask_password: bool,

    /// Cookie file for COOKIE authentication (sends the cookie itself)
    #[arg(long, value_name = "PATH")]
    cookie: Option<PathBuf>,

    /// Cookie file for SAFECOOKIE challenge-response authentication
    #[arg(long, value_name = "PATH")]
    safe_cookie: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the authentication methods the daemon accepts
    ProtocolInfo,

    /// Configure a persistent hidden service and print its onion address
    CreateService {
        /// Hidden service directory (must be writable by tor)
        #[arg(long)]
        dir: PathBuf,

        /// Port mapping, repeatable
        #[arg(short, long = "port", value_name = "VPORT=TARGET", required = true, value_parser = commands::parse_port_mapping)]
        ports: Vec<(u16, String)>,
    },

    /// Remove a persistent hidden service from tor's configuration
    DeleteService {
        /// Hidden service directory
        #[arg(long)]
        dir: PathBuf,
    },

    /// Print the onion address of a persistent hidden service
    Onion {
        /// Hidden service directory
        #[arg(long)]
        dir: PathBuf,
    },

    /// Create an ephemeral hidden service with a new key
    CreateEphemeral {
        /// Virtual port on the onion address
        #[arg(short, long, default_value = "80")]
        port: u16,

        /// Local target (host:port)
        #[arg(short, long)]
        target: String,

        /// Write the private key here (mode 0600) instead of printing it
        #[arg(long, value_name = "PATH")]
        key_out: Option<PathBuf>,
    },

    /// Re-register an ephemeral hidden service from its private key
    RestartEphemeral {
        /// Private key as <keytype>:<blob>
        #[arg(long, env = "ONIONCTL_ONION_KEY", hide_env_values = true, conflicts_with = "key_file")]
        key: Option<String>,

        /// File containing the private key
        #[arg(long, value_name = "PATH")]
        key_file: Option<PathBuf>,

        /// Virtual port on the onion address
        #[arg(short, long, default_value = "80")]
        port: u16,

        /// Local target (host:port)
        #[arg(short, long)]
        target: String,
    },

    /// Remove a detached ephemeral hidden service
    DeleteEphemeral {
        /// Service ID (onion address without .onion)
        service_id: String,
    },
}

impl AuthArgs {
    fn into_choice(self) -> AuthChoice {
        if let Some(path) = self.safe_cookie {
            AuthChoice::SafeCookie(path)
        } else if let Some(path) = self.cookie {
            AuthChoice::Cookie(path)
        } else if self.ask_password {
            AuthChoice::PromptPassword
        } else if let Some(password) = self.password {
            AuthChoice::Password(password)
        } else {
            AuthChoice::Auto
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(version = onionctl_core::VERSION, "Starting onionctl");

    let session = Session::new(&cli.network, cli.control, cli.timeout, cli.auth.into_choice())?;

    match cli.command {
        Commands::ProtocolInfo => {
            commands::protocol_info(&session).await?;
        }
        Commands::CreateService { dir, ports } => {
            commands::create_service(&session, &dir, ports).await?;
        }
        Commands::DeleteService { dir } => {
            commands::delete_service(&session, &dir).await?;
        }
        Commands::Onion { dir } => {
            commands::show_onion(&dir).await?;
        }
        Commands::CreateEphemeral { port, target, key_out } => {
            commands::create_ephemeral(&session, port, &target, key_out.as_deref()).await?;
        }
        Commands::RestartEphemeral { key, key_file, port, target } => {
            commands::restart_ephemeral(&session, key, key_file.as_deref(), port, &target).await?;
        }
        Commands::DeleteEphemeral { service_id } => {
            commands::delete_ephemeral(&session, &service_id).await?;
        }
    }

    Ok(())
}
