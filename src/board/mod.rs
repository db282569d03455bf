//! Board sync engine: task ordering and optimistic synchronization.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐  fetch / write  ┌─────────────────────────────────────────────┐
//! │  CLI or  │ ──────────────> │  sync.rs   (SyncController, SyncPhase)      │
//! │  any UI  │ <────────────── │     │                                       │
//! └──────────┘  CacheEvent     │     │ drag::resolve() → TaskPatch           │
//!      ^                       │     │ apply_optimistic / commit / rollback  │
//!      │ SyncEvent             │     v                                       │
//!      │                       │  cache.rs   (BoardCache, BoardSnapshot)     │
//! ┌──────────┐                 │     │                                       │
//! │scheduler │                 │     │ BoardTransport::fetch_board()         │
//! └──────────┘                 │     v                                       │
//!                              │  transport.rs (HttpTransport, reqwest)      │
//!                              └─────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module      | Responsibility                                            |
//! |-------------|-----------------------------------------------------------|
//! | `drag`      | `DropTarget` + pure drop resolution                       |
//! | `retry`     | `RetryPolicy` and the transient-only retry loop           |
//! | `scheduler` | Polling ticks and focus events as `SyncEvent`s            |
//!
//! Position keys themselves live in `kanbin_common::positions`.

pub mod cache;
pub mod drag;
pub mod retry;
pub mod scheduler;
pub mod sync;
pub mod transport;

pub use cache::{BoardCache, BoardSnapshot, CacheEvent, FetchResolution, FetchTicket, PendingMutation};
pub use drag::{DragOutcome, DropTarget};
pub use retry::RetryPolicy;
pub use scheduler::{Scheduler, SyncEvent};
pub use sync::{SyncController, SyncOptions, SyncPhase};
pub use transport::{BoardTransport, FetchOutcome, HttpTransport};
