//! mail-threads-mcp: conversation threads over IMAP, served over MCP stdio
//!
//! Opens a fresh IMAP session for every request, fetches the newest messages
//! of one or all folders under read-only folder locks, and groups them into
//! subject threads. Write tools (flags, move, delete) are opt-in.
//!
//! # Architecture
//!
//! - [`config`]: Environment-driven configuration for accounts and limits
//! - [`errors`]: Application error model with MCP error mapping
//! - [`session`]: Session state machine, transport seams and folder locks
//! - [`imap`]: `async-imap` transport with timeout wrappers
//! - [`catalog`]: Folder listing with message counts
//! - [`fetcher`]: Newest-window message fetch for one folder
//! - [`aggregate`]: Cross-folder fan-out with per-folder failure isolation
//! - [`thread`]: Subject-key grouping and search
//! - [`mutation`]: Delete, move and flag changes
//! - [`service`]: Per-request open, work and close
//! - [`mime`]: Header and body parsing
//! - [`message_ref`]: Opaque message references
//! - [`models`]: Input/output DTOs and schema-bearing types
//! - [`server`]: MCP tool handlers with validation

mod aggregate;
mod catalog;
mod config;
mod errors;
mod fetcher;
mod imap;
mod message_ref;
mod mime;
mod models;
mod mutation;
mod server;
mod service;
mod session;
#[cfg(test)]
mod testing;
mod thread;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use config::ServerConfig;
use imap::ImapConnector;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use service::{FetchLimits, MailService};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mail-threads-mcp", version, about = "Threaded IMAP mail over MCP stdio")]
struct Cli {
    /// Load environment variables from this file instead of `./.env`
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve MCP over stdio (default)
    Serve,
    /// Connect to one account, authenticate and log out
    Check {
        /// Account identifier
        #[arg(default_value = "default")]
        account: String,
    },
}

/// Application entry point
///
/// Initializes tracing to stderr (stdout carries the MCP protocol), loads
/// config, and either serves MCP over stdio or checks one account.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = ServerConfig::load_from_env()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            info!(
                accounts = config.accounts.len(),
                write_enabled = config.write_enabled,
                "serving MCP over stdio"
            );
            let service = server::MailThreadsServer::new(config).serve(stdio()).await?;
            service.waiting().await?;
        }
        Command::Check { account } => {
            let account_config = config.get_account(&account)?;
            let service = MailService::new(
                ImapConnector::new(&config, account_config),
                FetchLimits::from_config(&config),
            );
            let status = service.verify(&account_config.credentials()).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }
    Ok(())
}
