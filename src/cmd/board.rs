//! Board commands: `kanbin board`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use console::style;
use kanbin::board::{BoardSnapshot, CacheEvent, HttpTransport, Scheduler, SyncController};
use kanbin_common::{Board, TaskStatus};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use super::super::{BoardCommands, Cli};
use super::connect;

pub async fn cmd_board(cli: &Cli, command: BoardCommands) -> Result<()> {
    let (config, controller) = connect(cli)?;

    match command {
        BoardCommands::Create { title } => {
            let board = controller
                .create_board(&title)
                .await
                .context("Failed to create board")?;
            println!("{}", style("Board created successfully!").green());
            println!("Title:   {}", board.title);
            println!("Key:     {}", style(&board.key).bold());
            println!("Expires: {}", board.expires_at.format("%Y-%m-%d %H:%M UTC"));
        }
        BoardCommands::View { key } => {
            let snapshot = controller
                .fetch_board(&key)
                .await
                .with_context(|| format!("Failed to fetch board {}", key))?;
            render_board(&snapshot);
        }
        BoardCommands::Delete { key } => {
            controller
                .delete_board(&key)
                .await
                .with_context(|| format!("Failed to delete board {}", key))?;
            println!("Board {} deleted successfully.", key);
        }
        BoardCommands::Watch { key, interval_ms } => {
            let interval = interval_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.sync.poll_interval());
            watch_board(Arc::new(controller), key, interval).await?;
        }
    }

    Ok(())
}

/// Poll `key` until Ctrl-C, redrawing whenever the cached board changes.
/// Pressing Enter forces a refresh.
async fn watch_board(
    controller: Arc<SyncController<HttpTransport>>,
    key: String,
    interval: Duration,
) -> Result<()> {
    let snapshot = controller
        .fetch_board(&key)
        .await
        .with_context(|| format!("Failed to fetch board {}", key))?;
    render_board(&snapshot);
    println!(
        "{}",
        style(format!(
            "Watching, refresh every {}s. Enter refreshes now, Ctrl-C stops.",
            interval.as_secs_f32()
        ))
        .dim()
    );

    let mut changes = controller.subscribe();
    let (mut scheduler, events) = Scheduler::new();
    scheduler.schedule_tick(interval);
    let mut sync = tokio::spawn(controller.clone().run(key.clone(), events));

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let finished = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break None;
            }
            joined = &mut sync => break Some(joined),
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(_)) => {
                    scheduler.on_focus_regained();
                }
                _ => stdin_open = false,
            },
            change = changes.recv() => match change {
                Ok(CacheEvent::Replaced { key: changed }) if changed == key => {
                    if let Some(snapshot) = controller.snapshot(&key) {
                        render_board(&snapshot);
                    }
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break None,
            },
        }
    };

    // closes the event channel, which ends the sync loop
    drop(scheduler);
    let joined = match finished {
        Some(joined) => joined,
        None => sync.await,
    };
    joined
        .context("Board sync task failed")?
        .with_context(|| format!("Stopped watching board {}", key))?;
    Ok(())
}

pub fn render_board(snapshot: &BoardSnapshot) {
    let board = &snapshot.board;
    println!();
    println!(
        "=== {} [{}] ===",
        style(&board.title).bold(),
        style(&board.key).cyan()
    );
    let now = Utc::now();
    let expiry = expiry_line(board, now);
    if board.is_expired_at(now) {
        println!("{}", style(expiry).red());
    } else {
        println!("{}", style(expiry).dim());
    }

    if snapshot.tasks.is_empty() {
        println!();
        println!("No tasks on this board.");
        return;
    }
    for status in TaskStatus::ALL {
        render_column(snapshot, status);
    }
}

fn expiry_line(board: &Board, now: DateTime<Utc>) -> String {
    if board.is_expired_at(now) {
        return "Expired".to_string();
    }
    let remaining = board.expires_at - now;
    format!(
        "Expires {} (in {}d {}h)",
        board.expires_at.format("%Y-%m-%d %H:%M UTC"),
        remaining.num_days(),
        remaining.num_hours() % 24
    )
}

pub fn render_column(snapshot: &BoardSnapshot, status: TaskStatus) {
    let column = snapshot.column(status);
    println!();
    println!(
        "{} {}",
        style(status.title()).bold().underlined(),
        style(format!("({})", column.len())).dim()
    );
    if column.is_empty() {
        println!("  {}", style("-").dim());
    }
    for task in column {
        println!("  {}  {}", style(task.id).dim(), task.title);
        if !task.description.is_empty() {
            println!("      {}", style(&task.description).dim());
        }
    }
}
