//! Drag-and-drop resolution.
//!
//! Turns "task X was dropped on Y" into the smallest [`TaskPatch`] that puts X
//! there. Pure: no cache access, no I/O, and no failure mode other than
//! [`DragOutcome::NoOp`].

use kanbin_common::models::tasks_in_column;
use kanbin_common::positions::between;
use kanbin_common::{Task, TaskPatch, TaskStatus};
use uuid::Uuid;

/// Where a dragged card was released, validated once at the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropTarget {
    /// The general area of a column, not a specific card.
    Column(TaskStatus),
    /// Another card.
    Card(Uuid),
    /// Released outside any drop zone.
    None,
}

impl DropTarget {
    /// Classify a raw drop-zone id: a column name, a task id, or nothing usable.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
            return Self::None;
        };
        if let Ok(status) = raw.parse::<TaskStatus>() {
            return Self::Column(status);
        }
        match Uuid::parse_str(raw) {
            Ok(id) => Self::Card(id),
            Err(_) => Self::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragOutcome {
    /// Nothing changes; neither the cache nor the server is touched.
    NoOp,
    /// Fields that change. Only `status` and `position` are ever set.
    Move(TaskPatch),
}

impl DragOutcome {
    pub fn patch(&self) -> Option<&TaskPatch> {
        match self {
            Self::NoOp => None,
            Self::Move(patch) => Some(patch),
        }
    }
}

/// Resolve dropping task `active` on `target` against the current board tasks.
pub fn resolve(active: Uuid, target: &DropTarget, tasks: &[Task]) -> DragOutcome {
    let Some(active_task) = tasks.iter().find(|t| t.id == active) else {
        return DragOutcome::NoOp;
    };

    let resolved = match *target {
        DropTarget::None => None,
        DropTarget::Card(id) if id == active => None,
        DropTarget::Column(status) => {
            column_drop(active_task, status, tasks).map(|position| (status, position))
        }
        DropTarget::Card(id) => tasks
            .iter()
            .find(|t| t.id == id)
            .map(|over| (over.status, card_drop(active_task, over, tasks))),
    };

    let Some((status, position)) = resolved else {
        return DragOutcome::NoOp;
    };

    let patch = TaskPatch {
        status: (status != active_task.status).then_some(status),
        position: (position != active_task.position).then_some(position),
        ..TaskPatch::default()
    };
    if patch.is_empty() {
        DragOutcome::NoOp
    } else {
        DragOutcome::Move(patch)
    }
}

/// Append to the end of `status`. `None` when the task is already last in its own column.
fn column_drop(active: &Task, status: TaskStatus, tasks: &[Task]) -> Option<i64> {
    let column = tasks_in_column(tasks, status);
    let last = column.last();
    if status == active.status && last.is_some_and(|t| t.id == active.id) {
        return None;
    }
    Some(between(last.map(|t| t.position), None))
}

fn card_drop(active: &Task, over: &Task, tasks: &[Task]) -> i64 {
    let column = tasks_in_column(tasks, over.status);
    let Some(to) = column.iter().position(|t| t.id == over.id) else {
        return over.position;
    };
    let before_over = to.checked_sub(1).map(|i| column[i].position);
    let after_over = column.get(to + 1).map(|t| t.position);

    let from = column.iter().position(|t| t.id == active.id);
    match from {
        // moving down: land just after the card
        Some(from) if from < to => between(Some(over.position), after_over),
        // moving up, or arriving from another column: take the card's slot
        _ => between(before_over, Some(over.position)),
    }
}
