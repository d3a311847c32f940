//! `chatmem ask` - one turn, then exit.
//!
//! Runs the same turn loop as the REPL, so the exchange is appended to
//! the stored window and may trigger compaction.

use cm_domain::config::Config;

use super::{build_engine, session_key, SessionArgs};
use cm_memory::{ChatSession, CompactionStatus};

pub async fn ask(
    config: Config,
    message: String,
    session: SessionArgs,
    json_output: bool,
) -> anyhow::Result<()> {
    let key = session_key(&config, &session)?;
    let engine = build_engine(config).await?;
    let session = ChatSession::load(engine, key).await?;

    let outcome = session.run_turn(&message).await;
    // Persist whatever happened before reporting.
    let closed = session.shutdown().await;
    let outcome = outcome?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", outcome.response);
        if let CompactionStatus::Failed { reason } = &outcome.compaction {
            eprintln!("warning: compaction failed: {reason}");
        }
    }

    closed?;
    Ok(())
}
