//! Ciphera command-line client.
//!
//! # Usage
//!
//! ```bash
//! ciphera init
//! ciphera --relay http://127.0.0.1:8080 register alice
//! ciphera --relay http://127.0.0.1:8080 start-session bob
//! ciphera --relay http://127.0.0.1:8080 send bob "hello" -u alice
//! ciphera --relay http://127.0.0.1:8080 recv -u bob
//! ```
//!
//! Keys live under `--home` (default `$HOME/.ciphera`), private halves
//! encrypted under the passphrase. Nothing secret is ever printed.

use std::{fs, path::PathBuf};

use anyhow::{bail, Context, Result};
use ciphera_client::Client;
use ciphera_proto::Username;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// End-to-end encrypted chat over an untrusted relay
#[derive(Parser, Debug)]
#[command(name = "ciphera")]
#[command(about = "End-to-end encrypted chat CLI")]
#[command(version)]
struct Cli {
    /// Config directory (default: $HOME/.ciphera)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Relay URL, e.g. http://127.0.0.1:8080
    #[arg(long, global = true)]
    relay: Option<String>,

    /// Passphrase to unlock your keys (prompted when omitted)
    #[arg(short, long, global = true)]
    passphrase: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or rotate your local identity
    Init {
        /// Replace an existing identity
        #[arg(long)]
        force: bool,
    },
    /// Print your identity fingerprint
    Fingerprint,
    /// Publish your pre-key bundle to the relay
    Register {
        /// Username to register as
        username: String,
    },
    /// Establish a secure session with a peer
    StartSession {
        /// Peer username
        peer: String,
    },
    /// Encrypt and send a message to a peer
    Send {
        /// Peer username
        peer: String,
        /// Message text
        message: String,
        /// Your registered username
        #[arg(short = 'u', long)]
        username: String,
    },
    /// Fetch and decrypt your queued messages
    Recv {
        /// Your registered username
        #[arg(short = 'u', long)]
        username: String,
        /// Maximum envelopes to fetch (0 for all)
        #[arg(long, default_value_t = 0)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let home = match &cli.home {
        Some(home) => home.clone(),
        None => default_home()?,
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("creating config dir {}", home.display()))?;
    restrict_dir_permissions(&home)?;

    let client = Client::open(&home, cli.relay.as_deref())?;
    let passphrase = || -> Result<String> {
        match &cli.passphrase {
            Some(p) => Ok(p.clone()),
            None => rpassword::prompt_password("Passphrase: ").context("reading passphrase"),
        }
    };

    match &cli.command {
        Command::Init { force } => {
            let fingerprint = client.init_identity(&passphrase()?, *force)?;
            println!("Identity created.");
            println!("Fingerprint: {fingerprint}");
        },
        Command::Fingerprint => {
            let fingerprint = client.fingerprint(&passphrase()?)?;
            println!("Fingerprint: {fingerprint}");
        },
        Command::Register { username } => {
            client.register(&passphrase()?, &Username::from(username.as_str())).await?;
            println!("Registered pre-keys with relay");
        },
        Command::StartSession { peer } => {
            client.start_session(&passphrase()?, &Username::from(peer.as_str())).await?;
            println!("Session created with {peer}");
        },
        Command::Send { peer, message, username } => {
            client
                .send_message(
                    &passphrase()?,
                    &Username::from(username.as_str()),
                    &Username::from(peer.as_str()),
                    message.as_bytes(),
                )
                .await?;
            println!("Message sent");
        },
        Command::Recv { username, limit } => {
            let report = client
                .receive_messages(&passphrase()?, &Username::from(username.as_str()), *limit)
                .await?;
            for message in &report.messages {
                println!("[{}] {}", message.from, String::from_utf8_lossy(&message.plaintext));
            }
            if let Some(failure) = report.failure {
                bail!("stopped early: {failure}");
            }
        },
    }
    Ok(())
}

fn default_home() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".ciphera"))
        .context("cannot determine home directory; pass --home")
}

#[cfg(unix)]
fn restrict_dir_permissions(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))
        .with_context(|| format!("restricting permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_dir_permissions(_path: &std::path::Path) -> Result<()> {
    Ok(())
}
