// src/lib.rs

//! debexec: privileged dpkg transaction executor
//!
//! Takes an already-resolved set of package installs, removals and upgrades,
//! runs it through apt-get/dpkg and turns apt's machine-readable status stream into a
//! clean stream of progress events.
//!
//! # Architecture
//!
//! - `transaction`: validated input sets and the apt-get invocation plan
//! - `supervisor`: owns the apt-get child (pty + status pipe) and the polling loop
//! - `status`: line framing, decoding and the per-package progress state machine
//! - `conffile`: answers dpkg's configuration-file prompts through a helper
//! - `watchdog`: warns when the status stream goes quiet
//! - `progress`: the event vocabulary and sinks that consume it

pub mod conffile;
pub mod config;
mod error;
pub mod progress;
pub mod status;
pub mod supervisor;
pub mod transaction;
pub mod watchdog;

pub use conffile::{ConffileDecision, ConffileParseError, ConffilePrompt, ConffileResolver, DebconfFrontend};
pub use config::ExecutorConfig;
pub use error::{Error, Result};
pub use progress::{
    CallbackSink, EventSink, LogSink, PackagePhase, ProgressEvent, RecordingSink, SilentSink,
};
pub use status::{LineAccumulator, ProgressState, ProgressStateMachine, StatusChannel, StatusLine};
pub use supervisor::{CancelToken, TransactionSupervisor};
pub use transaction::{PackageRef, Transaction, TransactionFlags, TransactionResult};
pub use watchdog::Watchdog;
