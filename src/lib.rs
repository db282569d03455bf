//! Client engine for disposable Kanban boards.
//!
//! - [`board`]: drag resolution, the optimistic board cache, the sync
//!   controller and its HTTP transport
//! - [`config`]: layered client configuration
//! - [`errors`]: the failure taxonomy shared by all of the above
//!
//! Wire types and position keys live in the `kanbin-common` crate.

pub mod board;
pub mod config;
pub mod errors;

pub use kanbin_common as common;
