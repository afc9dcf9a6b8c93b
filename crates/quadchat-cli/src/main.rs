//! quadchat terminal client.
//!
//! # Usage
//!
//! ```bash
//! QUADCHAT_TOKEN=... quadchat --server https://portal.example.edu --user-id u42 --name Ada
//! ```
//!
//! Type `/help` once connected. Logs go to stderr; set `RUST_LOG` to
//! override `--log-level`.

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use quadchat_app::{Runtime, RuntimeConfig, SystemEnv, http::HttpApi};
use quadchat_cli::TerminalDriver;
use quadchat_client::{ClientConfig, SessionContext};
use quadchat_proto::{AuthToken, Identity};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

/// Campus portal chat in the terminal
#[derive(Parser, Debug)]
#[command(name = "quadchat")]
#[command(about = "Terminal client for the campus portal chat")]
#[command(version)]
struct Args {
    /// Portal base URL (the chat socket and HTTP API live under it)
    #[arg(short, long)]
    server: Url,

    /// Bearer token for the signed-in user
    #[arg(long, env = "QUADCHAT_TOKEN", hide_env_values = true)]
    token: String,

    /// Your user id
    #[arg(short, long)]
    user_id: String,

    /// Display name (defaults to the user id)
    #[arg(short, long)]
    name: Option<String>,

    /// How long a send may wait for the server before it fails
    #[arg(long, default_value = "15000")]
    ack_timeout_ms: u64,

    /// Directory downloads are saved into
    #[arg(long, default_value = ".")]
    download_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let name = args.name.unwrap_or_else(|| args.user_id.clone());
    let identity = Identity::new(args.user_id, name, AuthToken::new(args.token));
    let session = SessionContext::new(identity, args.server);
    tracing::info!(server = %session.server_url, user = %session.identity.id, "quadchat starting");

    let config = RuntimeConfig {
        client: ClientConfig {
            ack_timeout: Duration::from_millis(args.ack_timeout_ms),
            ..ClientConfig::default()
        },
        ..RuntimeConfig::default()
    };
    let driver = TerminalDriver::new(args.download_dir);
    Runtime::new(driver, HttpApi::new(), SystemEnv::new(), config).run(session).await?;

    Ok(())
}
