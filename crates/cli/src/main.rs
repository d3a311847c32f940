use clap::Parser;
use tracing_subscriber::EnvFilter;

use cm_cli::cli::{self, Cli, Command, ConfigCommand, SessionArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_cli_tracing(cli.log_json);

    let (config, config_path) = cli::load_config(cli.config.as_deref())?;

    match cli.command {
        // Default to an interactive chat when no subcommand is given.
        None => cli::chat::chat(config, SessionArgs::default(), false).await,
        Some(Command::Chat { session, fresh }) => cli::chat::chat(config, session, fresh).await,
        Some(Command::Ask {
            message,
            session,
            json,
        }) => cli::ask::ask(config, message, session, json).await,
        Some(Command::History { session }) => cli::history::history(config, session).await,
        Some(Command::Summaries { session }) => cli::history::summaries(config, session).await,
        Some(Command::Config(ConfigCommand::Validate)) => {
            if !cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => cli::config::show(&config),
    }
}

/// Compact (or JSON) tracing on stderr so stdout stays clean.
///
/// Defaults to `warn`; `RUST_LOG` overrides.
fn init_cli_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}
