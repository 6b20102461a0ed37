//! Deyu - Moral-education assistant client
//!
//! CLI entry point: chat sessions, conversation management and voice input.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deyu=info,deyu_chat=info,deyu_asr=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = cli::Cli::parse();

    if cli.command.is_some() {
        info!("Starting Deyu client v{}", env!("CARGO_PKG_VERSION"));

        if std::env::var("DEYU_API__TOKEN").is_err() && !std::path::Path::new(".env").exists() {
            warn!(".env file not found and DEYU_API__TOKEN is not set; requests will be anonymous.");
        }
    }

    cli::run(cli).await
}
