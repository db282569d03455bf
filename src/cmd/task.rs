//! Task commands: `kanbin task`.

use anyhow::{Context, Result, bail};
use console::style;
use kanbin::board::DropTarget;
use kanbin_common::{NewTask, TaskPatch, TaskStatus};

use super::super::{Cli, TaskCommands};
use super::board::render_column;
use super::connect;

pub async fn cmd_task(cli: &Cli, command: TaskCommands) -> Result<()> {
    let (_, controller) = connect(cli)?;

    match command {
        TaskCommands::Add {
            title,
            board,
            description,
            status,
        } => {
            let new_task = NewTask {
                title,
                description,
                status: Some(status.unwrap_or(TaskStatus::Todo)),
            };
            let task = controller
                .create_task(&board, new_task)
                .await
                .with_context(|| format!("Failed to add task to board {}", board))?;
            println!("Task [{}] added: {}", style(task.id).bold(), task.title);
        }
        TaskCommands::List { board } => {
            let snapshot = controller
                .fetch_board(&board)
                .await
                .with_context(|| format!("Failed to fetch tasks of board {}", board))?;
            if snapshot.tasks.is_empty() {
                println!("No tasks on this board.");
                return Ok(());
            }
            for status in TaskStatus::ALL {
                render_column(&snapshot, status);
            }
        }
        TaskCommands::Move { id, board, to } => {
            let target = DropTarget::parse(Some(&to));
            if target == DropTarget::None {
                bail!(
                    "--to must be a column (TODO, IN_PROGRESS, DONE) or a task id, got '{}'",
                    to
                );
            }
            let moved = controller
                .move_task(&board, id, &target)
                .await
                .with_context(|| format!("Failed to move task {}", id))?;
            match moved {
                Some(task) => println!("Task {} moved to {}", id, style(task.status).bold()),
                None => println!("Task {} is already there; nothing to do.", id),
            }
        }
        TaskCommands::Edit {
            id,
            board,
            title,
            description,
        } => {
            let patch = TaskPatch {
                title,
                description,
                ..TaskPatch::default()
            };
            if patch.is_empty() {
                bail!("Nothing to change: pass --title and/or --description");
            }
            let task = controller
                .update_task(&board, id, patch)
                .await
                .with_context(|| format!("Failed to edit task {}", id))?;
            println!("Task {} updated: {}", task.id, task.title);
        }
        TaskCommands::Delete { id, board } => {
            controller
                .delete_task(&board, id)
                .await
                .with_context(|| format!("Failed to delete task {}", id))?;
            println!("Task {} deleted.", id);
        }
    }

    Ok(())
}
