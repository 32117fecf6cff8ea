// src/status/mod.rs

//! dpkg status-fd protocol handling
//!
//! The status pipe carries `channel:package:percent:text` records. This
//! module reassembles them from raw bytes (`accumulator`), decodes the
//! fields (`line`) and turns them into per-package lifecycle events
//! (`machine`).

mod accumulator;
mod line;
mod machine;

pub use accumulator::{LineAccumulator, Lines};
pub use line::{StatusChannel, StatusLine, StatusParseError};
pub use machine::{LineAction, ProgressState, ProgressStateMachine};
