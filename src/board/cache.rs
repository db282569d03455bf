//! In-memory board snapshots with optimistic writes and conditional refetch.
//!
//! The cache never performs I/O. A conditional read is split in two:
//! [`BoardCache::begin_fetch`] hands out a [`FetchTicket`] carrying the stored
//! validator, the caller talks to the transport, and
//! [`BoardCache::complete_fetch`] folds the outcome back in.
//!
//! Every local write (optimistic apply, rollback, eviction, merge) bumps the
//! key's generation. A ticket issued before the bump completes as
//! [`FetchResolution::Superseded`] and changes nothing, so a slow read can
//! never clobber a newer optimistic state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kanbin_common::models::tasks_in_column;
use kanbin_common::{Board, BoardResponse, Task, TaskPatch, TaskStatus};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::transport::FetchOutcome;

/// Capacity of the change-notification channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Board state as last seen (or predicted) by this client. Never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardSnapshot {
    pub board: Board,
    pub tasks: Vec<Task>,
    /// Validator the server sent with this payload.
    pub validator: Option<String>,
    pub fetched_at: Instant,
}

impl BoardSnapshot {
    pub fn from_response(body: BoardResponse, validator: Option<String>, fetched_at: Instant) -> Self {
        Self {
            board: body.board,
            tasks: body.tasks,
            validator,
            fetched_at,
        }
    }

    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn column(&self, status: TaskStatus) -> Vec<&Task> {
        tasks_in_column(&self.tasks, status)
    }

    /// Copy with `patch` applied to task `id`, stamped as updated now.
    pub fn with_task_patched(&self, id: Uuid, patch: &TaskPatch) -> Self {
        let mut next = self.clone();
        if let Some(task) = next.tasks.iter_mut().find(|t| t.id == id) {
            task.apply_patch(patch);
            task.updated_at = Utc::now();
        }
        next
    }

    pub fn without_task(&self, id: Uuid) -> Self {
        let mut next = self.clone();
        next.tasks.retain(|t| t.id != id);
        next
    }

    /// Copy with `task` replacing the task of the same id, or appended if absent.
    pub fn with_task(&self, task: Task) -> Self {
        let mut next = self.clone();
        match next.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task,
            None => next.tasks.push(task),
        }
        next
    }

    /// Copy with the given `(id, position)` pairs applied.
    pub fn with_positions(&self, positions: &[(Uuid, i64)]) -> Self {
        let mut next = self.clone();
        for (id, position) in positions {
            if let Some(task) = next.tasks.iter_mut().find(|t| t.id == *id) {
                task.position = *position;
            }
        }
        next
    }
}

/// Change notification for whoever renders the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Replaced { key: String },
    Evicted { key: String },
}

/// A conditional read in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    key: String,
    generation: u64,
    validator: Option<String>,
}

impl FetchTicket {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Validator to send as `If-None-Match`, verbatim.
    pub fn validator(&self) -> Option<&str> {
        self.validator.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchResolution {
    /// Server payload stored; the snapshot and validator were replaced together.
    Updated(Arc<BoardSnapshot>),
    /// Server said "not modified"; this is the same `Arc` that was cached.
    Unchanged(Arc<BoardSnapshot>),
    /// "Not modified" but nothing is cached to reuse. The validator was
    /// dropped; fetch again without one.
    RetryUnconditional,
    /// A local write happened after the ticket was issued, or one is still
    /// pending. Nothing was applied.
    Superseded,
}

/// Rollback record for one optimistic write.
///
/// Settled exactly once, by [`BoardCache::commit`] or [`BoardCache::rollback`];
/// later calls are no-ops.
#[derive(Debug)]
pub struct PendingMutation {
    id: u64,
    key: String,
    previous: Option<Arc<BoardSnapshot>>,
    applied: Option<Arc<BoardSnapshot>>,
    applied_at: Instant,
    generation: u64,
    settled: bool,
}

impl PendingMutation {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The predicted state made visible by this write (`None` for an eviction).
    pub fn applied_snapshot(&self) -> Option<&Arc<BoardSnapshot>> {
        self.applied.as_ref()
    }

    /// What rollback will restore. Cleared once settled.
    pub fn previous_snapshot(&self) -> Option<&Arc<BoardSnapshot>> {
        self.previous.as_ref()
    }

    pub fn applied_at(&self) -> Instant {
        self.applied_at
    }

    /// The key's generation right after this write.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }
}

struct Entry {
    snapshot: Option<Arc<BoardSnapshot>>,
    validator: Option<String>,
    generation: u64,
    pending: usize,
    last_used: Instant,
}

impl Entry {
    fn new(now: Instant) -> Self {
        Self {
            snapshot: None,
            validator: None,
            generation: 0,
            pending: 0,
            last_used: now,
        }
    }
}

/// Keyed store of board snapshots. One instance per client; drop it to dispose.
pub struct BoardCache {
    entries: HashMap<String, Entry>,
    idle_horizon: Duration,
    next_generation: u64,
    next_mutation_id: u64,
    events: broadcast::Sender<CacheEvent>,
}

impl BoardCache {
    pub fn new(idle_horizon: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            entries: HashMap::new(),
            idle_horizon,
            next_generation: 0,
            next_mutation_id: 0,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    pub fn read(&mut self, key: &str) -> Option<Arc<BoardSnapshot>> {
        let entry = self.entries.get_mut(key)?;
        entry.last_used = Instant::now();
        entry.snapshot.clone()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(|e| e.snapshot.is_some())
    }

    /// Current generation of `key` (0 when nothing is cached).
    pub fn generation(&self, key: &str) -> u64 {
        self.entries.get(key).map_or(0, |e| e.generation)
    }

    pub fn pending_count(&self, key: &str) -> usize {
        self.entries.get(key).map_or(0, |e| e.pending)
    }

    // ── Conditional fetch ────────────────────────────────────────────

    pub fn begin_fetch(&mut self, key: &str) -> FetchTicket {
        let (generation, validator) = match self.entries.get(key) {
            Some(entry) => (entry.generation, entry.validator.clone()),
            None => (0, None),
        };
        FetchTicket {
            key: key.to_string(),
            generation,
            validator,
        }
    }

    /// Like [`begin_fetch`](Self::begin_fetch) but never sends a validator.
    pub fn begin_unconditional_fetch(&mut self, key: &str) -> FetchTicket {
        FetchTicket {
            validator: None,
            ..self.begin_fetch(key)
        }
    }

    pub fn complete_fetch(&mut self, ticket: FetchTicket, outcome: FetchOutcome) -> FetchResolution {
        let current = self.entries.get(&ticket.key);
        let stale_ticket = current.map_or(0, |e| e.generation) != ticket.generation;
        if stale_ticket || current.is_some_and(|e| e.pending > 0) {
            debug!(key = %ticket.key, "discarding superseded board read");
            return FetchResolution::Superseded;
        }

        let now = Instant::now();
        match outcome {
            FetchOutcome::NotModified => {
                let entry = self.entries.get_mut(&ticket.key);
                match entry.and_then(|e| {
                    e.last_used = now;
                    e.snapshot.clone()
                }) {
                    Some(snapshot) => FetchResolution::Unchanged(snapshot),
                    None => {
                        self.forget_validator(&ticket.key);
                        FetchResolution::RetryUnconditional
                    }
                }
            }
            FetchOutcome::Fetched { body, validator } => {
                let snapshot = Arc::new(BoardSnapshot::from_response(body, validator.clone(), now));
                let entry = self
                    .entries
                    .entry(ticket.key.clone())
                    .or_insert_with(|| Entry::new(now));
                entry.snapshot = Some(snapshot.clone());
                entry.validator = validator;
                entry.last_used = now;
                self.notify(CacheEvent::Replaced { key: ticket.key });
                FetchResolution::Updated(snapshot)
            }
        }
    }

    pub fn forget_validator(&mut self, key: &str) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.validator = None;
        }
    }

    // ── Optimistic writes ────────────────────────────────────────────

    /// Replace the snapshot for `key` with `transform(current)`.
    ///
    /// Returns `None` (and changes nothing) when `key` is not cached.
    pub fn apply_optimistic<F>(&mut self, key: &str, transform: F) -> Option<PendingMutation>
    where
        F: FnOnce(&BoardSnapshot) -> BoardSnapshot,
    {
        let previous = self.entries.get(key)?.snapshot.clone()?;
        let applied = Arc::new(transform(&previous));
        let handle = self.begin_mutation(key, Some(previous), Some(applied.clone()));
        if let Some(entry) = self.entries.get_mut(key) {
            entry.snapshot = Some(applied);
        }
        self.notify(CacheEvent::Replaced {
            key: key.to_string(),
        });
        Some(handle)
    }

    /// Optimistically drop the snapshot for `key`; rollback puts it back.
    pub fn evict_optimistic(&mut self, key: &str) -> PendingMutation {
        let previous = self.entries.get(key).and_then(|e| e.snapshot.clone());
        let handle = self.begin_mutation(key, previous, None);
        if let Some(entry) = self.entries.get_mut(key) {
            entry.snapshot = None;
        }
        self.notify(CacheEvent::Evicted {
            key: key.to_string(),
        });
        handle
    }

    fn begin_mutation(
        &mut self,
        key: &str,
        previous: Option<Arc<BoardSnapshot>>,
        applied: Option<Arc<BoardSnapshot>>,
    ) -> PendingMutation {
        let now = Instant::now();
        let generation = self.bump_generation(key);
        if let Some(entry) = self.entries.get_mut(key) {
            entry.pending += 1;
        }
        self.next_mutation_id += 1;
        PendingMutation {
            id: self.next_mutation_id,
            key: key.to_string(),
            previous,
            applied,
            applied_at: now,
            generation,
            settled: false,
        }
    }

    /// Accept the optimistic state. Returns `false` if the handle was already settled.
    pub fn commit(&mut self, handle: &mut PendingMutation) -> bool {
        if !self.settle(handle) {
            return false;
        }
        handle.previous = None;
        debug!(key = %handle.key, mutation = handle.id, "optimistic write committed");
        true
    }

    /// Restore the snapshot captured when `handle` was applied.
    ///
    /// Returns `false` if the handle was already settled.
    pub fn rollback(&mut self, handle: &mut PendingMutation) -> bool {
        if !self.settle(handle) {
            return false;
        }
        let previous = handle.previous.take();
        let key = handle.key.clone();
        let event = match previous {
            Some(snapshot) => {
                let now = Instant::now();
                let entry = self
                    .entries
                    .entry(key.clone())
                    .or_insert_with(|| Entry::new(now));
                entry.snapshot = Some(snapshot);
                entry.last_used = now;
                CacheEvent::Replaced { key }
            }
            None => match self.entries.get_mut(&key) {
                Some(entry) => {
                    entry.snapshot = None;
                    CacheEvent::Evicted { key }
                }
                None => return true,
            },
        };
        self.bump_generation(&handle.key);
        warn!(key = %handle.key, mutation = handle.id, "Optimistic write rolled back");
        self.notify(event);
        true
    }

    fn settle(&mut self, handle: &mut PendingMutation) -> bool {
        if handle.settled {
            return false;
        }
        handle.settled = true;
        if let Some(entry) = self.entries.get_mut(&handle.key) {
            entry.pending = entry.pending.saturating_sub(1);
        }
        true
    }

    // ── Server-confirmed merges ──────────────────────────────────────

    /// Store the server's copy of a task, unless a newer local write exists.
    ///
    /// `expected_generation` is the generation of the write being confirmed.
    pub fn merge_task(&mut self, key: &str, task: Task, expected_generation: u64) -> bool {
        let Some(entry) = self.entries.get(key) else {
            return false;
        };
        if entry.generation != expected_generation {
            debug!(key, task = %task.id, "skipping merge, newer local write exists");
            return false;
        }
        self.replace_with(key, |snapshot| snapshot.with_task(task))
    }

    /// Add a task the server just created.
    pub fn insert_task(&mut self, key: &str, task: Task) -> bool {
        self.replace_with(key, |snapshot| snapshot.with_task(task))
    }

    fn replace_with<F>(&mut self, key: &str, transform: F) -> bool
    where
        F: FnOnce(&BoardSnapshot) -> BoardSnapshot,
    {
        let Some(current) = self.entries.get(key).and_then(|e| e.snapshot.clone()) else {
            return false;
        };
        let next = Arc::new(transform(&current));
        self.bump_generation(key);
        if let Some(entry) = self.entries.get_mut(key) {
            entry.snapshot = Some(next);
        }
        self.notify(CacheEvent::Replaced {
            key: key.to_string(),
        });
        true
    }

    /// Supersede reads in flight for `key` without touching its snapshot.
    ///
    /// An entry without a snapshot is kept for an uncached key so a first
    /// load still in flight also completes as superseded.
    pub fn cancel_reads(&mut self, key: &str) {
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Instant::now()));
        self.bump_generation(key);
    }

    // ── Eviction ─────────────────────────────────────────────────────

    pub fn evict(&mut self, key: &str) -> Option<Arc<BoardSnapshot>> {
        let entry = self.entries.remove(key)?;
        self.notify(CacheEvent::Evicted {
            key: key.to_string(),
        });
        entry.snapshot
    }

    /// Drop entries unused for longer than the idle horizon. Entries with
    /// unsettled writes are kept.
    pub fn evict_idle(&mut self, now: Instant) -> Vec<String> {
        let horizon = self.idle_horizon;
        let idle: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.pending == 0 && now.saturating_duration_since(e.last_used) >= horizon)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &idle {
            self.evict(key);
        }
        idle
    }

    fn bump_generation(&mut self, key: &str) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        if let Some(entry) = self.entries.get_mut(key) {
            entry.generation = generation;
        }
        generation
    }

    fn notify(&self, event: CacheEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kanbin_common::TaskStatus;

    const HORIZON: Duration = Duration::from_secs(300);

    fn task(title: &str, status: TaskStatus, position: i64) -> Task {
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

    fn body(tasks: Vec<Task>) -> BoardResponse {
        let now = Utc::now();
        BoardResponse {
            board: Board {
                id: Uuid::new_v4(),
                key: "calm-heron-7".to_string(),
                title: "Sprint".to_string(),
                created_at: now,
                expires_at: now + chrono::Duration::days(7),
            },
            tasks,
        }
    }

    fn fetched(tasks: Vec<Task>, etag: &str) -> FetchOutcome {
        FetchOutcome::Fetched {
            body: body(tasks),
            validator: Some(etag.to_string()),
        }
    }

    fn seeded(tasks: Vec<Task>) -> BoardCache {
        let mut cache = BoardCache::new(HORIZON);
        let ticket = cache.begin_fetch("k");
        cache.complete_fetch(ticket, fetched(tasks, "\"v1\""));
        cache
    }

    #[test]
    fn test_first_fetch_is_unconditional_and_stores_validator() {
        let mut cache = BoardCache::new(HORIZON);
        let ticket = cache.begin_fetch("k");
        assert_eq!(ticket.validator(), None);

        let resolution = cache.complete_fetch(ticket, fetched(vec![], "\"abc\""));
        assert!(matches!(resolution, FetchResolution::Updated(_)));
        assert_eq!(cache.begin_fetch("k").validator(), Some("\"abc\""));
        assert_eq!(
            cache.read("k").unwrap().validator.as_deref(),
            Some("\"abc\"")
        );
    }

    #[test]
    fn test_not_modified_keeps_same_snapshot_and_sends_no_event() {
        let mut cache = seeded(vec![task("A", TaskStatus::Todo, 1000)]);
        let before = cache.read("k").unwrap();
        let mut events = cache.subscribe();

        let ticket = cache.begin_fetch("k");
        assert_eq!(ticket.validator(), Some("\"v1\""));
        match cache.complete_fetch(ticket, FetchOutcome::NotModified) {
            FetchResolution::Unchanged(snapshot) => assert!(Arc::ptr_eq(&snapshot, &before)),
            other => panic!("Expected Unchanged, got {other:?}"),
        }
        assert!(Arc::ptr_eq(&cache.read("k").unwrap(), &before));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_new_payload_replaces_snapshot_and_validator() {
        let mut cache = seeded(vec![]);
        let mut events = cache.subscribe();
        let ticket = cache.begin_fetch("k");
        let resolution = cache.complete_fetch(
            ticket,
            fetched(vec![task("A", TaskStatus::Todo, 1000)], "\"v2\""),
        );
        let FetchResolution::Updated(snapshot) = resolution else {
            panic!("Expected Updated");
        };
        assert_eq!(snapshot.tasks.len(), 1);
        assert_eq!(snapshot.validator.as_deref(), Some("\"v2\""));
        assert_eq!(cache.begin_fetch("k").validator(), Some("\"v2\""));
        assert_eq!(
            events.try_recv().unwrap(),
            CacheEvent::Replaced { key: "k".into() }
        );
    }

    #[test]
    fn test_not_modified_without_snapshot_asks_for_unconditional_retry() {
        let mut cache = BoardCache::new(HORIZON);
        let ticket = cache.begin_fetch("missing");
        assert_eq!(
            cache.complete_fetch(ticket, FetchOutcome::NotModified),
            FetchResolution::RetryUnconditional
        );
        assert!(cache.read("missing").is_none());
    }

    #[test]
    fn test_cancel_reads_supersedes_first_load() {
        let mut cache = BoardCache::new(HORIZON);
        let mut events = cache.subscribe();
        let ticket = cache.begin_fetch("k");

        cache.cancel_reads("k");
        assert_eq!(
            cache.complete_fetch(ticket, fetched(vec![], "\"v1\"")),
            FetchResolution::Superseded
        );
        assert!(!cache.contains("k"));
        assert!(cache.read("k").is_none());
        assert!(events.try_recv().is_err());

        // a load started after the teardown applies normally
        let ticket = cache.begin_fetch("k");
        assert!(matches!(
            cache.complete_fetch(ticket, fetched(vec![], "\"v1\"")),
            FetchResolution::Updated(_)
        ));
    }

    #[test]
    fn test_optimistic_then_rollback_restores_exact_snapshot() {
        let a = task("A", TaskStatus::Todo, 1000);
        let mut cache = seeded(vec![a.clone()]);
        let before = cache.read("k").unwrap();

        let patch = TaskPatch {
            status: Some(TaskStatus::Done),
            ..TaskPatch::default()
        };
        let mut handle = cache
            .apply_optimistic("k", |s| s.with_task_patched(a.id, &patch))
            .unwrap();
        let applied = cache.read("k").unwrap();
        assert_eq!(applied.task(a.id).unwrap().status, TaskStatus::Done);
        assert!(Arc::ptr_eq(handle.applied_snapshot().unwrap(), &applied));

        assert!(cache.rollback(&mut handle));
        let restored = cache.read("k").unwrap();
        assert!(Arc::ptr_eq(&restored, &before));
        assert_eq!(*restored, *before);
        assert!(handle.is_settled());
        assert_eq!(cache.pending_count("k"), 0);
    }

    #[test]
    fn test_rollback_after_commit_is_noop() {
        let a = task("A", TaskStatus::Todo, 1000);
        let mut cache = seeded(vec![a.clone()]);
        let mut handle = cache.apply_optimistic("k", |s| s.without_task(a.id)).unwrap();

        assert!(cache.commit(&mut handle));
        assert!(handle.previous_snapshot().is_none());
        assert!(!cache.rollback(&mut handle));
        assert!(!cache.commit(&mut handle));
        assert!(cache.read("k").unwrap().tasks.is_empty());
    }

    #[test]
    fn test_apply_optimistic_on_uncached_key_does_nothing() {
        let mut cache = BoardCache::new(HORIZON);
        assert!(cache.apply_optimistic("nope", |s| s.clone()).is_none());
        assert_eq!(cache.pending_count("nope"), 0);
    }

    #[test]
    fn test_read_started_before_optimistic_write_is_superseded() {
        let a = task("A", TaskStatus::Todo, 1000);
        let mut cache = seeded(vec![a.clone()]);
        let ticket = cache.begin_fetch("k");

        let mut handle = cache.apply_optimistic("k", |s| s.without_task(a.id)).unwrap();
        cache.commit(&mut handle);

        let resolution = cache.complete_fetch(ticket, fetched(vec![a.clone()], "\"old\""));
        assert_eq!(resolution, FetchResolution::Superseded);
        assert!(cache.read("k").unwrap().tasks.is_empty());
        assert_eq!(cache.begin_fetch("k").validator(), Some("\"v1\""));
    }

    #[test]
    fn test_read_completing_while_write_pending_is_superseded() {
        let a = task("A", TaskStatus::Todo, 1000);
        let mut cache = seeded(vec![a.clone()]);
        let mut handle = cache.apply_optimistic("k", |s| s.without_task(a.id)).unwrap();

        let ticket = cache.begin_fetch("k");
        let resolution = cache.complete_fetch(ticket, fetched(vec![a.clone()], "\"v2\""));
        assert_eq!(resolution, FetchResolution::Superseded);
        assert!(cache.read("k").unwrap().tasks.is_empty());

        cache.commit(&mut handle);
        let ticket = cache.begin_fetch("k");
        assert!(matches!(
            cache.complete_fetch(ticket, fetched(vec![], "\"v3\"")),
            FetchResolution::Updated(_)
        ));
    }

    #[test]
    fn test_overlapping_writes_last_rollback_wins() {
        let a = task("A", TaskStatus::Todo, 1000);
        let mut cache = seeded(vec![a.clone()]);
        let original = cache.read("k").unwrap();

        let first_patch = TaskPatch {
            position: Some(2000),
            ..TaskPatch::default()
        };
        let second_patch = TaskPatch {
            position: Some(3000),
            ..TaskPatch::default()
        };
        let mut first = cache
            .apply_optimistic("k", |s| s.with_task_patched(a.id, &first_patch))
            .unwrap();
        let after_first = cache.read("k").unwrap();
        let mut second = cache
            .apply_optimistic("k", |s| s.with_task_patched(a.id, &second_patch))
            .unwrap();
        assert_eq!(cache.read("k").unwrap().task(a.id).unwrap().position, 3000);

        cache.rollback(&mut second);
        assert!(Arc::ptr_eq(&cache.read("k").unwrap(), &after_first));
        cache.rollback(&mut first);
        assert!(Arc::ptr_eq(&cache.read("k").unwrap(), &original));
    }

    #[test]
    fn test_evict_optimistic_and_rollback() {
        let mut cache = seeded(vec![task("A", TaskStatus::Todo, 1000)]);
        let before = cache.read("k").unwrap();
        let mut events = cache.subscribe();

        let mut handle = cache.evict_optimistic("k");
        assert!(cache.read("k").is_none());
        assert!(handle.applied_snapshot().is_none());
        assert_eq!(events.try_recv().unwrap(), CacheEvent::Evicted { key: "k".into() });

        cache.rollback(&mut handle);
        assert!(Arc::ptr_eq(&cache.read("k").unwrap(), &before));
        assert_eq!(events.try_recv().unwrap(), CacheEvent::Replaced { key: "k".into() });
    }

    #[test]
    fn test_merge_task_skips_when_newer_write_exists() {
        let a = task("A", TaskStatus::Todo, 1000);
        let mut cache = seeded(vec![a.clone()]);
        let p1 = TaskPatch {
            position: Some(2000),
            ..TaskPatch::default()
        };
        let p2 = TaskPatch {
            position: Some(3000),
            ..TaskPatch::default()
        };
        let mut first = cache
            .apply_optimistic("k", |s| s.with_task_patched(a.id, &p1))
            .unwrap();
        let mut second = cache
            .apply_optimistic("k", |s| s.with_task_patched(a.id, &p2))
            .unwrap();

        cache.commit(&mut first);
        let mut confirmed = a.clone();
        confirmed.position = 2000;
        assert!(!cache.merge_task("k", confirmed.clone(), first.generation()));
        assert_eq!(cache.read("k").unwrap().task(a.id).unwrap().position, 3000);

        cache.commit(&mut second);
        confirmed.position = 3000;
        assert!(cache.merge_task("k", confirmed, second.generation()));
        assert_eq!(cache.read("k").unwrap().task(a.id).unwrap().position, 3000);
    }

    #[test]
    fn test_insert_task_appends() {
        let mut cache = seeded(vec![]);
        let a = task("A", TaskStatus::Todo, 1000);
        assert!(cache.insert_task("k", a.clone()));
        assert_eq!(cache.read("k").unwrap().tasks, vec![a]);
        assert!(!cache.insert_task("other", task("B", TaskStatus::Todo, 1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_idle_respects_horizon_and_pending_writes() {
        let a = task("A", TaskStatus::Todo, 1000);
        let mut cache = seeded(vec![a.clone()]);
        let ticket = cache.begin_fetch("busy");
        cache.complete_fetch(ticket, fetched(vec![a.clone()], "\"b\""));
        let _pending = cache.apply_optimistic("busy", |s| s.without_task(a.id)).unwrap();

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.evict_idle(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.evict_idle(Instant::now()), vec!["k".to_string()]);
        assert!(!cache.contains("k"));
        assert!(cache.contains("busy"));
    }

    #[test]
    fn test_snapshot_column_helpers() {
        let a = task("A", TaskStatus::Todo, 2000);
        let b = task("B", TaskStatus::Todo, 1000);
        let mut cache = seeded(vec![a.clone(), b.clone()]);
        let snapshot = cache.read("k").unwrap();
        let ids: Vec<Uuid> = snapshot.column(TaskStatus::Todo).iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);

        let moved = snapshot.with_positions(&[(a.id, 500)]);
        assert_eq!(moved.task(a.id).unwrap().position, 500);
        assert_eq!(snapshot.task(a.id).unwrap().position, 2000);
    }
}
