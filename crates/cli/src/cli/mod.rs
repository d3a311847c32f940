pub mod ask;
pub mod chat;
pub mod config;
pub mod history;

use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use cm_domain::config::Config;
use cm_domain::model::SessionKey;
use cm_memory::MemoryEngine;

/// chatmem - a chat client with bounded, durable conversational memory.
#[derive(Debug, Parser)]
#[command(name = "chatmem", version, about)]
pub struct Cli {
    /// Config file (falls back to `CM_CONFIG`, then `chatmem.toml`).
    #[arg(long, global = true)]
    pub config: Option<String>,
    /// Log JSON lines to stderr instead of compact text.
    #[arg(long, global = true)]
    pub log_json: bool,
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Which conversation to act on. Unset fields come from `[session]`.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct SessionArgs {
    /// User id.
    #[arg(long)]
    pub user: Option<String>,
    /// Chat id.
    #[arg(long)]
    pub chat: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactive chat (default when no subcommand is given).
    Chat {
        #[command(flatten)]
        session: SessionArgs,
        /// Ignore any stored window and start over.
        #[arg(long)]
        fresh: bool,
    },
    /// Send a single message and print the answer.
    Ask {
        /// The message to send.
        message: String,
        #[command(flatten)]
        session: SessionArgs,
        /// Print the full turn outcome as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the stored chat log.
    History {
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Print the stored summaries.
    Summaries {
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from `explicit`, `CM_CONFIG`, or
/// `chatmem.toml`, in that order. A missing file means all defaults.
pub fn load_config(explicit: Option<&str>) -> anyhow::Result<(Config, String)> {
    let config_path = explicit
        .map(str::to_owned)
        .or_else(|| std::env::var("CM_CONFIG").ok())
        .unwrap_or_else(|| "chatmem.toml".into());

    let config = if Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        Config::default()
    };

    Ok((config, config_path))
}

/// Resolve the session key from flags and `[session]`.
pub fn session_key(config: &Config, args: &SessionArgs) -> anyhow::Result<SessionKey> {
    let user = args.user.as_deref().unwrap_or(&config.session.user_id);
    let chat = args.chat.as_deref().unwrap_or(&config.session.chat_id);
    Ok(SessionKey::new(user, chat)?)
}

/// Refuse to start on config errors; print warnings.
pub async fn build_engine(config: Config) -> anyhow::Result<Arc<MemoryEngine>> {
    let mut errors = Vec::new();
    for issue in config.validate() {
        match issue.severity {
            cm_domain::config::ConfigSeverity::Error => errors.push(issue.to_string()),
            cm_domain::config::ConfigSeverity::Warning => tracing::warn!("{issue}"),
        }
    }
    if !errors.is_empty() {
        anyhow::bail!("invalid configuration:\n{}", errors.join("\n"));
    }
    Ok(Arc::new(MemoryEngine::from_config(config).await?))
}
