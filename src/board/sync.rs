//! The only component that talks to the board service.
//!
//! [`SyncController`] owns a [`BoardCache`], a per-key freshness table and a
//! [`BoardTransport`]. Every write follows the same path: apply the predicted
//! state, send the request, then commit or roll back and mark the key stale
//! so the next revalidation picks up server timestamps.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use kanbin_common::models::MAX_TASKS_PER_BOARD;
use kanbin_common::positions::{changed_positions, needs_rebalance, rebalance};
use kanbin_common::{Board, CreateBoardRequest, NewTask, Task, TaskPatch, TaskStatus, ValidationError};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cache::{BoardCache, BoardSnapshot, CacheEvent, FetchResolution, PendingMutation};
use super::drag::{self, DragOutcome, DropTarget};
use super::retry::{RetryPolicy, with_retry};
use super::scheduler::SyncEvent;
use super::transport::BoardTransport;
use crate::errors::{SyncError, SyncResult};

/// Freshness of one board key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Never fetched, or released.
    Idle,
    Fetching,
    Fresh,
    Stale,
}

/// Timing knobs for [`SyncController`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// How long a successful read counts as fresh.
    pub stale_after: Duration,
    /// Cache entries unused for this long are dropped on the next tick.
    pub idle_eviction: Duration,
    pub read_retry: RetryPolicy,
    pub write_retry: RetryPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(5),
            idle_eviction: Duration::from_secs(300),
            read_retry: RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30)),
            write_retry: RetryPolicy::new(1, Duration::from_secs(2), Duration::from_secs(2)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct KeyState {
    phase: SyncPhase,
    fresh_until: Option<Instant>,
}

impl Default for KeyState {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
            fresh_until: None,
        }
    }
}

impl KeyState {
    fn effective_phase(&self, now: Instant) -> SyncPhase {
        match (self.phase, self.fresh_until) {
            (SyncPhase::Fresh, Some(until)) if now >= until => SyncPhase::Stale,
            (phase, _) => phase,
        }
    }
}

pub struct SyncController<T: BoardTransport> {
    transport: T,
    cache: Mutex<BoardCache>,
    states: Mutex<HashMap<String, KeyState>>,
    options: SyncOptions,
}

impl<T: BoardTransport> SyncController<T> {
    pub fn new(transport: T, options: SyncOptions) -> Self {
        Self {
            transport,
            cache: Mutex::new(BoardCache::new(options.idle_eviction)),
            states: Mutex::new(HashMap::new()),
            options,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    fn cache(&self) -> MutexGuard<'_, BoardCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, KeyState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cached snapshot for `key`, without any network access.
    pub fn snapshot(&self, key: &str) -> Option<Arc<BoardSnapshot>> {
        self.cache().read(key)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.cache().subscribe()
    }

    pub fn phase(&self, key: &str) -> SyncPhase {
        self.states()
            .get(key)
            .map_or(SyncPhase::Idle, |s| s.effective_phase(Instant::now()))
    }

    /// Force the next tick to refetch. A read in flight is left alone; it will
    /// settle as superseded and land in `Stale` by itself.
    pub fn mark_stale(&self, key: &str) {
        let mut states = self.states();
        let state = states.entry(key.to_string()).or_default();
        if state.phase != SyncPhase::Fetching {
            state.phase = SyncPhase::Stale;
            state.fresh_until = None;
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Conditional read of `key`, retrying transient failures with backoff.
    ///
    /// While another read of the same key is in flight the cached snapshot is
    /// returned instead of issuing a second request. On failure the cached
    /// snapshot is kept and the error returned.
    pub async fn fetch_board(&self, key: &str) -> SyncResult<Arc<BoardSnapshot>> {
        let in_flight = {
            let mut states = self.states();
            let state = states.entry(key.to_string()).or_default();
            let busy = state.phase == SyncPhase::Fetching;
            state.phase = SyncPhase::Fetching;
            busy
        };
        if in_flight {
            if let Some(snapshot) = self.cache().read(key) {
                debug!(key, "read already in flight, serving cached board");
                return Ok(snapshot);
            }
        }

        let mut guard = FetchingGuard {
            controller: self,
            key,
            armed: true,
        };
        let result = self.fetch_remote(key).await;
        guard.armed = false;

        let cached = self.cache().contains(key);
        let next = match &result {
            Ok(Some(_)) => SyncPhase::Fresh,
            Ok(None) | Err(_) if cached => SyncPhase::Stale,
            _ => SyncPhase::Idle,
        };
        {
            let mut states = self.states();
            // released while the read was out
            if let Some(state) = states.get_mut(key).filter(|s| s.phase == SyncPhase::Fetching) {
                state.phase = next;
                state.fresh_until =
                    (next == SyncPhase::Fresh).then(|| Instant::now() + self.options.stale_after);
            }
        }

        match result {
            Ok(Some(snapshot)) => Ok(snapshot),
            Ok(None) => self
                .cache()
                .read(key)
                .ok_or_else(|| SyncError::Cancelled(format!("read of board {key} was superseded"))),
            Err(err) => {
                warn!(key, error = %err, kind = err.kind(), "Board read failed");
                Err(err)
            }
        }
    }

    /// `Ok(None)` when the result was superseded by a local write or a release.
    async fn fetch_remote(&self, key: &str) -> SyncResult<Option<Arc<BoardSnapshot>>> {
        let mut unconditional = false;
        loop {
            let ticket = {
                let mut cache = self.cache();
                if unconditional {
                    cache.begin_unconditional_fetch(key)
                } else {
                    cache.begin_fetch(key)
                }
            };
            debug!(key, conditional = ticket.validator().is_some(), "fetching board");
            let outcome = with_retry(&self.options.read_retry, "fetch_board", || {
                self.transport.fetch_board(key, ticket.validator())
            })
            .await?;

            let resolution = self.cache().complete_fetch(ticket, outcome);
            match resolution {
                FetchResolution::Updated(snapshot) => {
                    debug!(key, tasks = snapshot.tasks.len(), "board updated");
                    return Ok(Some(snapshot));
                }
                FetchResolution::Unchanged(snapshot) => return Ok(Some(snapshot)),
                FetchResolution::Superseded => return Ok(None),
                FetchResolution::RetryUnconditional if !unconditional => {
                    debug!(key, "validator unknown locally, refetching unconditionally");
                    unconditional = true;
                }
                FetchResolution::RetryUnconditional => {
                    return Err(SyncError::Protocol(format!(
                        "server answered 304 to an unconditional read of board {key}"
                    )));
                }
            }
        }
    }

    /// Fetch `key` unless it is fresh or a read is already in flight.
    pub async fn revalidate_if_stale(&self, key: &str) -> SyncResult<Option<Arc<BoardSnapshot>>> {
        match self.phase(key) {
            SyncPhase::Fresh | SyncPhase::Fetching => Ok(None),
            SyncPhase::Idle | SyncPhase::Stale => self.fetch_board(key).await.map(Some),
        }
    }

    /// The cached snapshot, fetching first if there is none.
    async fn ensure_loaded(&self, key: &str) -> SyncResult<Arc<BoardSnapshot>> {
        let cached = self.cache().read(key);
        match cached {
            Some(snapshot) => Ok(snapshot),
            None => self.fetch_board(key).await,
        }
    }

    pub async fn handle_event(&self, key: &str, event: SyncEvent) -> SyncResult<()> {
        match event {
            SyncEvent::Tick => {
                let evicted = self.cache().evict_idle(Instant::now());
                if !evicted.is_empty() {
                    debug!(?evicted, "evicted idle boards");
                    let mut states = self.states();
                    for key in &evicted {
                        states.remove(key);
                    }
                }
            }
            SyncEvent::FocusRegained => self.mark_stale(key),
        }
        self.revalidate_if_stale(key).await.map(|_| ())
    }

    /// Tear down the view of `key`: reads in flight are ignored when they land.
    /// The snapshot stays cached until it idles out.
    pub fn release(&self, key: &str) {
        self.cache().cancel_reads(key);
        self.states().remove(key);
        debug!(key, "board released");
    }

    /// Revalidate `key` on every event until the channel closes.
    ///
    /// Transient failures are logged and polling continues; a board that is
    /// gone (not found or expired) ends the loop with that error.
    pub async fn run(self: Arc<Self>, key: String, mut events: mpsc::Receiver<SyncEvent>) -> SyncResult<()> {
        info!(key = %key, "Board sync started");
        let mut outcome = Ok(());
        while let Some(event) = events.recv().await {
            match self.handle_event(&key, event).await {
                Ok(()) => {}
                Err(err) if err.is_gone() => {
                    outcome = Err(err);
                    break;
                }
                Err(err) => warn!(key = %key, error = %err, "Background revalidation failed"),
            }
        }
        self.release(&key);
        info!(key = %key, "Board sync stopped");
        outcome
    }

    // ── Writes ───────────────────────────────────────────────────────

    fn settle<R>(&self, key: &str, handle: &mut PendingMutation, result: SyncResult<R>) -> SyncResult<R> {
        match result {
            Ok(value) => {
                self.cache().commit(handle);
                self.mark_stale(key);
                Ok(value)
            }
            Err(err) => {
                self.cache().rollback(handle);
                self.mark_stale(key);
                warn!(key, error = %err, kind = err.kind(), "Write failed, local change reverted");
                Err(err)
            }
        }
    }

    fn apply_optimistic<F>(&self, key: &str, transform: F) -> SyncResult<PendingMutation>
    where
        F: FnOnce(&BoardSnapshot) -> BoardSnapshot,
    {
        self.cache()
            .apply_optimistic(key, transform)
            .ok_or_else(|| SyncError::Cancelled(format!("board {key} is no longer cached")))
    }

    pub async fn create_board(&self, title: &str) -> SyncResult<Board> {
        let request = CreateBoardRequest {
            title: title.trim().to_string(),
        };
        request.validate()?;
        let board = with_retry(&self.options.write_retry, "create_board", || {
            self.transport.create_board(&request)
        })
        .await?;
        info!(key = %board.key, "Board created");
        Ok(board)
    }

    /// Drop the board locally at once; it comes back if the server refuses.
    pub async fn delete_board(&self, key: &str) -> SyncResult<()> {
        let mut handle = self.cache().evict_optimistic(key);
        let result = with_retry(&self.options.write_retry, "delete_board", || {
            self.transport.delete_board(key)
        })
        .await;
        self.settle(key, &mut handle, result)?;
        self.cache().evict(key);
        self.states().remove(key);
        info!(key, "Board deleted");
        Ok(())
    }

    /// Create a task. Not applied optimistically: ids come from the server.
    pub async fn create_task(&self, key: &str, task: NewTask) -> SyncResult<Task> {
        task.validate()?;
        let snapshot = self.ensure_loaded(key).await?;
        if snapshot.tasks.len() >= MAX_TASKS_PER_BOARD {
            return Err(ValidationError::TaskLimitReached {
                max: MAX_TASKS_PER_BOARD,
            }
            .into());
        }

        let created = with_retry(&self.options.write_retry, "create_task", || {
            self.transport.create_task(key, &task)
        })
        .await;
        self.mark_stale(key);
        let created = created?;
        self.cache().insert_task(key, created.clone());
        info!(key, task = %created.id, "Task created");
        Ok(created)
    }

    pub async fn update_task(&self, key: &str, id: Uuid, patch: TaskPatch) -> SyncResult<Task> {
        patch.validate()?;
        if patch.is_empty() {
            return Err(SyncError::ValidationFailed("No fields to update".to_string()));
        }
        self.ensure_loaded(key).await?;

        let mut handle = self.apply_optimistic(key, |s| s.with_task_patched(id, &patch))?;
        let result = with_retry(&self.options.write_retry, "update_task", || {
            self.transport.update_task(key, id, &patch)
        })
        .await;
        let task = self.settle(key, &mut handle, result)?;
        self.cache().merge_task(key, task.clone(), handle.generation());
        debug!(key, task = %id, "Task updated");
        Ok(task)
    }

    /// Move a task by drag and drop. `Ok(None)` when the drop changes nothing;
    /// in that case neither the cache nor the server is touched.
    pub async fn move_task(&self, key: &str, id: Uuid, target: &DropTarget) -> SyncResult<Option<Task>> {
        let snapshot = self.ensure_loaded(key).await?;
        let DragOutcome::Move(patch) = drag::resolve(id, target, &snapshot.tasks) else {
            debug!(key, task = %id, ?target, "drop is a no-op");
            return Ok(None);
        };

        let task = self.update_task(key, id, patch).await?;

        let crowded = self
            .cache()
            .read(key)
            .is_some_and(|s| needs_rebalance(&column_of(&s, task.status)));
        if crowded {
            if let Err(err) = self.rebalance_column(key, task.status).await {
                warn!(key, column = %task.status, error = %err, "Rebalance failed, will retry on a later move");
            }
        }
        Ok(Some(task))
    }

    pub async fn delete_task(&self, key: &str, id: Uuid) -> SyncResult<()> {
        self.ensure_loaded(key).await?;
        let mut handle = self.apply_optimistic(key, |s| s.without_task(id))?;
        let result = with_retry(&self.options.write_retry, "delete_task", || {
            self.transport.delete_task(key, id)
        })
        .await;
        self.settle(key, &mut handle, result)?;
        info!(key, task = %id, "Task deleted");
        Ok(())
    }

    /// Renumber `status` to evenly spaced keys, writing only tasks whose key changed.
    ///
    /// Any failed write reverts the whole renumbering locally. Returns how many
    /// tasks were written.
    pub async fn rebalance_column(&self, key: &str, status: TaskStatus) -> SyncResult<usize> {
        let snapshot = self.ensure_loaded(key).await?;
        let column = column_of(&snapshot, status);
        let changed = changed_positions(&column, &rebalance(&column));
        if changed.is_empty() {
            return Ok(0);
        }

        let mut handle = self.apply_optimistic(key, |s| s.with_positions(&changed))?;
        for (id, position) in &changed {
            let patch = TaskPatch {
                position: Some(*position),
                ..TaskPatch::default()
            };
            let result = with_retry(&self.options.write_retry, "rebalance", || {
                self.transport.update_task(key, *id, &patch)
            })
            .await;
            if let Err(err) = result {
                return self.settle(key, &mut handle, Err(err));
            }
        }
        self.settle(key, &mut handle, Ok(()))?;
        info!(key, column = %status, tasks = changed.len(), "Column rebalanced");
        Ok(changed.len())
    }
}

/// Leaves `Fetching` when a read is dropped before it settles, so the next
/// tick or focus event can fetch again.
struct FetchingGuard<'a, T: BoardTransport> {
    controller: &'a SyncController<T>,
    key: &'a str,
    armed: bool,
}

impl<T: BoardTransport> Drop for FetchingGuard<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let cached = self.controller.cache().contains(self.key);
        let mut states = self.controller.states();
        if let Some(state) = states.get_mut(self.key).filter(|s| s.phase == SyncPhase::Fetching) {
            state.phase = if cached { SyncPhase::Stale } else { SyncPhase::Idle };
            state.fresh_until = None;
        }
        debug!(key = self.key, "board read abandoned");
    }
}

fn column_of(snapshot: &BoardSnapshot, status: TaskStatus) -> Vec<Task> {
    snapshot.column(status).into_iter().cloned().collect()
}
