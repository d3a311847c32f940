//! `chatmem chat` - interactive REPL command.
//!
//! Each line is one turn through the memory manager. Slash commands
//! inspect or compact the session; `exit`, `quit`, `/exit` or Ctrl+D end
//! it with a final persist.

use cm_domain::config::Config;
use cm_memory::{ChatSession, CompactionStatus, TurnOutcome};

use super::{build_engine, session_key, SessionArgs};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(mut config: Config, session: SessionArgs, fresh: bool) -> anyhow::Result<()> {
    if fresh {
        config.session.reload = false;
    }
    let key = session_key(&config, &session)?;
    let history_path = config.storage.path.join(".repl_history");

    let engine = build_engine(config).await?;
    let session = ChatSession::load(engine, key).await?;

    let mut rl = rustyline::DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    let status = session.status().await;
    eprintln!("chatmem interactive chat");
    eprintln!(
        "Session: {}  |  cost {}/{}  |  Type /help for commands, exit to quit",
        status.session_key, status.current_cost, status.cost_budget
    );
    eprintln!();

    loop {
        match rl.readline("you> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(&line).ok();

                if matches!(trimmed.to_lowercase().as_str(), "exit" | "quit") {
                    break;
                }
                if trimmed.starts_with('/') {
                    if handle_slash_command(trimmed, &session).await {
                        break;
                    }
                    continue;
                }

                match session.run_turn(trimmed).await {
                    Ok(outcome) => print_outcome(&outcome),
                    Err(e) => eprintln!("\x1B[31merror: {e}\x1B[0m"),
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                eprintln!("(Use Ctrl+D or exit to quit)");
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("\x1B[31mreadline error: {e}\x1B[0m");
                break;
            }
        }
    }

    if let Some(parent) = history_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    rl.save_history(&history_path).ok();

    session.shutdown().await?;
    eprintln!("Goodbye!");
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Output
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn print_outcome(outcome: &TurnOutcome) {
    let analysis = &outcome.analysis;
    if analysis.was_rewritten() {
        eprintln!("\x1B[2m(read as: {})\x1B[0m", analysis.rewritten_query);
    }
    if !analysis.clarifying_questions.is_empty() {
        eprintln!("\x1B[2mYou may want to clarify:\x1B[0m");
        for q in &analysis.clarifying_questions {
            eprintln!("\x1B[2m  - {}\x1B[0m", q.question);
        }
    }

    println!("{}", outcome.response);
    println!();

    match &outcome.compaction {
        CompactionStatus::Completed {
            summary_index,
            range,
        } => eprintln!(
            "\x1B[2m[summary #{summary_index} saved, turns {}-{}]\x1B[0m",
            range.from, range.to
        ),
        CompactionStatus::Failed { reason } => {
            eprintln!("\x1B[33mcompaction failed, will retry next turn: {reason}\x1B[0m")
        }
        CompactionStatus::Deferred => {
            eprintln!("\x1B[33mcompaction deferred: earlier writes still pending\x1B[0m")
        }
        CompactionStatus::NotNeeded | CompactionStatus::Disabled => {}
    }
    if outcome.pending_writes > 0 {
        eprintln!(
            "\x1B[33m{} write(s) not yet durable, retrying next turn\x1B[0m",
            outcome.pending_writes
        );
    }
    eprintln!(
        "\x1B[2m[cost {}/{}]\x1B[0m",
        outcome.current_cost, outcome.cost_budget
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slash command handling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process a slash command. Returns `true` if the REPL should exit.
async fn handle_slash_command(input: &str, session: &ChatSession) -> bool {
    let cmd = input.split_whitespace().next().unwrap_or(input);

    match cmd {
        "/exit" | "/quit" => return true,

        "/status" => {
            let s = session.status().await;
            eprintln!("Session:        {}", s.session_key);
            eprintln!("Cost:           {}/{}", s.current_cost, s.cost_budget);
            eprintln!("Window turns:   {}", s.window_len);
            eprintln!("Next index:     {}", s.next_turn_index);
            eprintln!("Summary index:  {}", s.latest_summary_index);
            eprintln!("Pending writes: {}", s.pending_writes);
        }

        "/compact" => match session.compact_now().await {
            CompactionStatus::Completed {
                summary_index,
                range,
            } => eprintln!("Summary #{summary_index} saved (turns {}-{})", range.from, range.to),
            CompactionStatus::NotNeeded => eprintln!("Nothing to compact"),
            CompactionStatus::Deferred => eprintln!("Pending writes must land first"),
            CompactionStatus::Failed { reason } => eprintln!("Compaction failed: {reason}"),
            CompactionStatus::Disabled => {}
        },

        "/history" => {
            let window = session.window().await;
            if window.is_empty() {
                eprintln!("(window is empty)");
            }
            for turn in window {
                eprintln!("[{}] {}: {}", turn.index, turn.role, turn.content);
            }
        }

        "/help" => {
            eprintln!("Commands:");
            eprintln!("  /status          Show cost, budget and summary index");
            eprintln!("  /compact         Summarize the current window now");
            eprintln!("  /history         Show the turns in the live window");
            eprintln!("  /exit, /quit     Exit the chat (also: exit, quit)");
            eprintln!("  /help            Show this help");
        }

        other => {
            eprintln!("Unknown command: {other}  (type /help for a list)");
        }
    }

    false
}
