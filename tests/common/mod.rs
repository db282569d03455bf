//! In-memory board service for driving `SyncController` in tests.
//!
//! Behaves like the real API (ETag per board revision, 304 on a matching
//! `If-None-Match`, 404/410/422) and records every call. Failures can be
//! queued per operation, and a fetch can be held open to simulate a slow read.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use kanbin::board::{BoardTransport, FetchOutcome};
use kanbin::errors::{SyncError, SyncResult};
use kanbin_common::positions::between;
use kanbin_common::{
    Board, BoardResponse, CreateBoardRequest, MessageResponse, NewTask, Task, TaskPatch, TaskStatus,
};
use tokio::sync::oneshot;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    CreateBoard,
    FetchBoard,
    DeleteBoard,
    CreateTask,
    UpdateTask,
    DeleteTask,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateBoard { title: String },
    FetchBoard { key: String, validator: Option<String> },
    DeleteBoard { key: String },
    CreateTask { key: String, title: String },
    UpdateTask { key: String, id: Uuid, patch: TaskPatch },
    DeleteTask { key: String, id: Uuid },
}

impl Call {
    pub fn op(&self) -> Op {
        match self {
            Self::CreateBoard { .. } => Op::CreateBoard,
            Self::FetchBoard { .. } => Op::FetchBoard,
            Self::DeleteBoard { .. } => Op::DeleteBoard,
            Self::CreateTask { .. } => Op::CreateTask,
            Self::UpdateTask { .. } => Op::UpdateTask,
            Self::DeleteTask { .. } => Op::DeleteTask,
        }
    }
}

struct StoredBoard {
    board: Board,
    tasks: Vec<Task>,
    revision: u64,
    expired: bool,
}

impl StoredBoard {
    fn etag(&self) -> String {
        format!("\"{}-{}\"", self.board.id.simple(), self.revision)
    }
}

#[derive(Default)]
struct State {
    boards: HashMap<String, StoredBoard>,
    /// Per operation: `None` lets a call through, `Some` fails it.
    failures: HashMap<Op, VecDeque<Option<SyncError>>>,
    calls: Vec<Call>,
    held_fetch: Option<oneshot::Receiver<()>>,
    /// Reply 304 to this many upcoming fetches, whatever the validator.
    forced_not_modified: usize,
}

#[derive(Default)]
pub struct MockTransport {
    state: Mutex<State>,
}

pub fn task(title: &str, status: TaskStatus, position: i64) -> Task {
    let now = Utc::now();
    Task {
        id: Uuid::new_v4(),
        board_id: None,
        title: title.to_string(),
        description: String::new(),
        status,
        position,
        created_at: now,
        updated_at: now,
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Put a board with `tasks` on the "server".
    pub fn seed(&self, key: &str, tasks: Vec<Task>) -> Board {
        let now = Utc::now();
        let board = Board {
            id: Uuid::new_v4(),
            key: key.to_string(),
            title: format!("Board {key}"),
            created_at: now,
            expires_at: now + ChronoDuration::days(7),
        };
        self.state().boards.insert(
            key.to_string(),
            StoredBoard {
                board: board.clone(),
                tasks,
                revision: 1,
                expired: false,
            },
        );
        board
    }

    /// Change server-side data behind the client's back.
    pub fn server_update(&self, key: &str, id: Uuid, patch: &TaskPatch) {
        let mut state = self.state();
        let stored = state.boards.get_mut(key).unwrap();
        let task = stored.tasks.iter_mut().find(|t| t.id == id).unwrap();
        task.apply_patch(patch);
        stored.revision += 1;
    }

    pub fn expire(&self, key: &str) {
        self.state().boards.get_mut(key).unwrap().expired = true;
    }

    pub fn server_tasks(&self, key: &str) -> Vec<Task> {
        self.state().boards[key].tasks.clone()
    }

    pub fn server_task(&self, key: &str, id: Uuid) -> Option<Task> {
        self.server_tasks(key).into_iter().find(|t| t.id == id)
    }

    /// The next `op` fails with `err` (queued, first in first out).
    pub fn fail_next(&self, op: Op, err: SyncError) {
        self.state().failures.entry(op).or_default().push_back(Some(err));
    }

    /// Let `skip` calls of `op` through, then fail the next one with `err`.
    pub fn fail_after(&self, op: Op, skip: usize, err: SyncError) {
        let mut state = self.state();
        let queue = state.failures.entry(op).or_default();
        queue.extend(std::iter::repeat_n(None, skip));
        queue.push_back(Some(err));
    }

    /// Hold the next fetch after it has read server state, until the sender fires.
    pub fn hold_next_fetch(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.state().held_fetch = Some(rx);
        tx
    }

    pub fn force_not_modified(&self, times: usize) {
        self.state().forced_not_modified = times;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.state().calls.iter().filter(|c| c.op() == op).count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Record the call and pop a queued failure for it, if any.
    fn begin(&self, call: Call) -> SyncResult<()> {
        let mut state = self.state();
        let op = call.op();
        state.calls.push(call);
        match state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(Some(err)) => Err(err),
            _ => Ok(()),
        }
    }

    fn with_board<R>(
        &self,
        key: &str,
        f: impl FnOnce(&mut StoredBoard) -> SyncResult<R>,
    ) -> SyncResult<R> {
        let mut state = self.state();
        let stored = state
            .boards
            .get_mut(key)
            .ok_or_else(|| SyncError::NotFound("Board not found".into()))?;
        if stored.expired {
            return Err(SyncError::Expired("Board has expired".into()));
        }
        f(stored)
    }
}

#[async_trait]
impl BoardTransport for MockTransport {
    async fn create_board(&self, request: &CreateBoardRequest) -> SyncResult<Board> {
        self.begin(Call::CreateBoard {
            title: request.title.clone(),
        })?;
        let key = format!("board-{}", self.state().boards.len() + 1);
        let mut board = self.seed(&key, Vec::new());
        board.title = request.title.clone();
        self.state().boards.get_mut(&key).unwrap().board.title = request.title.clone();
        Ok(board)
    }

    async fn fetch_board(&self, key: &str, validator: Option<&str>) -> SyncResult<FetchOutcome> {
        self.begin(Call::FetchBoard {
            key: key.to_string(),
            validator: validator.map(str::to_string),
        })?;
        let forced = {
            let mut state = self.state();
            let forced = state.forced_not_modified > 0;
            state.forced_not_modified = state.forced_not_modified.saturating_sub(1);
            forced
        };
        let outcome = self.with_board(key, |stored| {
            let etag = stored.etag();
            if forced || validator == Some(etag.as_str()) {
                return Ok(FetchOutcome::NotModified);
            }
            Ok(FetchOutcome::Fetched {
                body: BoardResponse {
                    board: stored.board.clone(),
                    tasks: stored.tasks.clone(),
                },
                validator: Some(etag),
            })
        })?;
        let held = self.state().held_fetch.take();
        if let Some(gate) = held {
            let _ = gate.await;
        }
        Ok(outcome)
    }

    async fn delete_board(&self, key: &str) -> SyncResult<MessageResponse> {
        self.begin(Call::DeleteBoard {
            key: key.to_string(),
        })?;
        self.with_board(key, |_| Ok(()))?;
        self.state().boards.remove(key);
        Ok(MessageResponse {
            message: "Board deleted successfully".into(),
        })
    }

    async fn create_task(&self, key: &str, new_task: &NewTask) -> SyncResult<Task> {
        self.begin(Call::CreateTask {
            key: key.to_string(),
            title: new_task.title.clone(),
        })?;
        self.with_board(key, |stored| {
            if stored.tasks.len() >= 100 {
                return Err(SyncError::ValidationFailed("Task limit reached (100)".into()));
            }
            let status = new_task.status.unwrap_or(TaskStatus::Todo);
            let last = stored
                .tasks
                .iter()
                .filter(|t| t.status == status)
                .map(|t| t.position)
                .max();
            let mut created = task(&new_task.title, status, between(last, None));
            created.description = new_task.description.clone().unwrap_or_default();
            created.board_id = Some(stored.board.id);
            stored.tasks.push(created.clone());
            stored.revision += 1;
            Ok(created)
        })
    }

    async fn update_task(&self, key: &str, id: Uuid, patch: &TaskPatch) -> SyncResult<Task> {
        self.begin(Call::UpdateTask {
            key: key.to_string(),
            id,
            patch: patch.clone(),
        })?;
        self.with_board(key, |stored| {
            let task = stored
                .tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| SyncError::NotFound("Task not found".into()))?;
            task.apply_patch(patch);
            task.updated_at = Utc::now();
            let updated = task.clone();
            stored.revision += 1;
            Ok(updated)
        })
    }

    async fn delete_task(&self, key: &str, id: Uuid) -> SyncResult<MessageResponse> {
        self.begin(Call::DeleteTask {
            key: key.to_string(),
            id,
        })?;
        self.with_board(key, |stored| {
            let before = stored.tasks.len();
            stored.tasks.retain(|t| t.id != id);
            if stored.tasks.len() == before {
                return Err(SyncError::NotFound("Task not found".into()));
            }
            stored.revision += 1;
            Ok(MessageResponse {
                message: "Task deleted successfully".into(),
            })
        })
    }
}
