//! Domain types shared by the kanbin client crates.
//!
//! - `models`: boards, tasks and the request/response payloads of the board API
//! - `positions`: gap-based ordering keys for tasks within a column

pub mod models;
pub mod positions;

pub use models::{
    Board, BoardResponse, CreateBoardRequest, ErrorEnvelope, MessageResponse, NewTask, Task,
    TaskPatch, TaskStatus, ValidationError,
};
