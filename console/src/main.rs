//! IISPPR Console
//!
//! Terminal client that mounts one chat or ticket conversation.

mod app;
mod render;

use anyhow::{bail, Context};
use clap::Parser;
use iisppr_core::{ClientConfig, ConsoleClient, Role, Session, SessionContext};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// IISPPR console CLI
#[derive(Parser)]
#[command(name = "iisppr-console")]
#[command(about = "Chat and ticket conversations for the IISPPR console")]
struct Cli {
    /// Data directory (config.json, session.json)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Sign in as this user
    #[arg(long, requires = "role")]
    user_id: Option<String>,

    /// Role of the signed-in user (admin, hr, hrHead, intern, communication)
    #[arg(long)]
    role: Option<Role>,

    /// Open a direct chat with this user
    #[arg(long, conflicts_with = "ticket", required_unless_present = "ticket")]
    peer: Option<String>,

    /// Open the message thread of this ticket
    #[arg(long)]
    ticket: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they do not interleave with the transcript.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "iisppr_console=info,iisppr_core=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting IISPPR Console v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();

    let data_dir = cli.data_dir.clone().unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("iisppr")
    });
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory {:?}", data_dir))?;
    tracing::info!("Data directory: {:?}", data_dir);

    let config = ClientConfig::load(&data_dir)
        .context("loading config.json")?
        .with_env_overrides();

    let session_path = data_dir.join("session.json");
    let session = SessionContext::load(&session_path).context("loading session.json")?;
    if let (Some(user_id), Some(role)) = (cli.user_id.clone(), cli.role) {
        session.sign_in(Session::new(user_id, role));
        session.save(&session_path).context("saving session.json")?;
    }
    if session.current().is_none() {
        bail!("not signed in: pass --user-id and --role");
    }

    let client = ConsoleClient::new(config, session)?;

    let result = match (cli.peer, cli.ticket) {
        (Some(peer), _) => app::run_chat(&client, &peer).await,
        (None, Some(ticket_id)) => app::run_ticket(&client, &ticket_id).await,
        (None, None) => bail!("pass --peer or --ticket"),
    };

    if let Err(e) = &result {
        tracing::error!("Console exited with error: {:#}", e);
    }
    result
}
