//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module   | Commands handled                                  |
//! |----------|---------------------------------------------------|
//! | `board`  | `Board` (create, view, delete, watch)             |
//! | `task`   | `Task` (add, list, move, edit, delete)            |
//! | `config` | `Config`                                          |

pub mod board;
pub mod config;
pub mod task;

pub use board::cmd_board;
pub use config::cmd_config;
pub use task::cmd_task;

use anyhow::{Context, Result};
use kanbin::board::{HttpTransport, SyncController};
use kanbin::config::ClientConfig;

use super::Cli;

/// Resolve configuration and build a controller talking to the configured server.
fn connect(cli: &Cli) -> Result<(ClientConfig, SyncController<HttpTransport>)> {
    let config = ClientConfig::resolve(cli.server.as_deref())?;
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }
    let transport = HttpTransport::new(&config.server_url, config.request_timeout())
        .context("Failed to create HTTP client")?;
    tracing::debug!(server = %config.server_url, "using board server");
    let controller = SyncController::new(transport, config.sync.to_options());
    Ok((config, controller))
}
