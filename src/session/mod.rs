//! Session module: orchestration of one voice interaction at a time
//!
//! - `controller`: sequences capture, inference and speech
//! - `reply`: turns raw model output into speech plus an expression label
//! - `expression`: the companion's face
//! - `snapshot`: observable session state for frontends

mod controller;
mod expression;
mod reply;
mod snapshot;

pub use controller::{Services, SessionController};
pub use expression::Expression;
pub use snapshot::{SessionHandle, SessionSnapshot};
