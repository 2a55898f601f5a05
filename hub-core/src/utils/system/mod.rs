//! Supervisor process, status flags and the cooperative yield hook.
//!
//! - `status`: status bit-set and the supervisor event queue
//! - `supervisor`: watchdog, periodic tick and user-program lifecycle
//! - `poll`: the event-poll hook used by busy loops

pub mod poll;
pub mod status;
pub mod supervisor;

pub use status::{Event, StatusFlag, EVENTS};
pub use supervisor::{Supervisor, SystemContext, UserProgramCallbacks};
