pub mod config;
pub mod error;
pub mod idempotency;
pub mod io;
pub mod job;
pub mod lock;
pub mod session;
pub mod store;

pub use error::{NudgeError, Result};
