//! `chatmem history` and `chatmem summaries` - read-only views of what
//! the store holds for one conversation.

use cm_domain::config::Config;
use cm_store::{MemoryStore, SummarySink};

use super::{build_engine, session_key, SessionArgs};

pub async fn history(config: Config, session: SessionArgs) -> anyhow::Result<()> {
    let key = session_key(&config, &session)?;
    let engine = build_engine(config).await?;
    let rows = engine.store().read_chat_log(&key).await?;

    if rows.is_empty() {
        eprintln!("No history for {key}");
        return Ok(());
    }
    for row in rows {
        println!(
            "[{}] {} {}: {}",
            row.index,
            row.created_at.format("%Y-%m-%d %H:%M:%S"),
            row.role,
            row.content
        );
    }
    Ok(())
}

pub async fn summaries(config: Config, session: SessionArgs) -> anyhow::Result<()> {
    let key = session_key(&config, &session)?;
    let engine = build_engine(config).await?;
    let summaries = engine.sink().list(&key).await?;

    if summaries.is_empty() {
        eprintln!("No summaries for {key} (sink: {})", engine.sink().name());
        return Ok(());
    }
    for summary in summaries {
        let range = summary.range_summarized;
        println!(
            "#{} turns {}-{}: {}",
            summary.summary_index,
            range.from,
            range.to,
            summary.digest()
        );
        for pref in &summary.user_profile.prefs {
            println!("    pref: {pref}");
        }
        for constraint in &summary.user_profile.constraints {
            println!("    constraint: {constraint}");
        }
        for todo in &summary.todos {
            println!("    todo: {todo}");
        }
    }
    Ok(())
}
