// src/progress.rs

//! Transaction events and the sinks that receive them
//!
//! Everything a caller learns while dpkg runs arrives as a [`ProgressEvent`]
//! pushed into an [`EventSink`], in exactly the order the status lines were
//! read. Implementations include:
//! - `LogSink`: logs events to tracing
//! - `SilentSink`: no-op for scripted/quiet modes
//! - `CallbackSink`: forwards to a user-provided closure
//! - `RecordingSink`: keeps every event for later inspection
//!
//! # Example
//!
//! ```ignore
//! use debexec::progress::{CallbackSink, ProgressEvent};
//!
//! let sink = CallbackSink::new(|event: ProgressEvent| println!("{}", event));
//! let result = supervisor.execute(&transaction, &sink)?;
//! ```

use serde::Serialize;
use std::fmt;
use std::sync::Mutex;
use tracing::{info, warn};

/// Lifecycle phase of a single package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackagePhase {
    Preparing,
    Decompressing,
    Installing,
    Removing,
    Finished,
}

impl PackagePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::Decompressing => "decompressing",
            Self::Installing => "installing",
            Self::Removing => "removing",
            Self::Finished => "finished",
        }
    }

    /// Phases that make a package the active one
    pub fn opens_package(&self) -> bool {
        matches!(self, Self::Preparing | Self::Installing | Self::Removing)
    }
}

impl fmt::Display for PackagePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted while a transaction runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A package moved to a new lifecycle phase
    Package {
        package: String,
        phase: PackagePhase,
        sub_progress: Option<u8>,
    },
    /// Overall transaction percentage
    Percentage { percent: u8 },
    /// dpkg is running maintainer scripts or triggers
    Commit,
    /// dpkg reported a failure for one package
    PackageError { package: String, message: String },
    /// A conffile prompt was answered with "keep current" because nobody decided
    ConfigFileChanged {
        package: String,
        original: String,
        new: String,
    },
}

impl ProgressEvent {
    pub fn package(package: impl Into<String>, phase: PackagePhase, sub_progress: Option<u8>) -> Self {
        Self::Package {
            package: package.into(),
            phase,
            sub_progress,
        }
    }

    pub fn finished(package: impl Into<String>) -> Self {
        Self::package(package, PackagePhase::Finished, None)
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Package {
                package,
                phase,
                sub_progress: Some(sub),
            } => write!(f, "{} {} ({}%)", phase, package, sub),
            Self::Package { package, phase, .. } => write!(f, "{} {}", phase, package),
            Self::Percentage { percent } => write!(f, "progress {}%", percent),
            Self::Commit => f.write_str("running maintainer scripts"),
            Self::PackageError { package, message } => {
                write!(f, "error in {}: {}", package, message)
            }
            Self::ConfigFileChanged { original, new, .. } => write!(
                f,
                "The configuration file '{}' (modified by you or a script) has a newer version '{}'.\n\
                 Please verify your changes and update it manually.",
                original, new
            ),
        }
    }
}

/// Receiver for transaction events
///
/// Sinks are called from the supervising thread only, but must be
/// `Send + Sync` so callers can share them with other threads.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Silent sink (no-op)
#[derive(Debug, Default)]
pub struct SilentSink;

impl EventSink for SilentSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Log-based sink
///
/// Logs package transitions and errors via tracing. Percentage updates are
/// only logged when they change by at least `step` points.
#[derive(Debug)]
pub struct LogSink {
    step: u8,
    last_percent: Mutex<Option<u8>>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::with_step(10)
    }

    pub fn with_step(step: u8) -> Self {
        Self {
            step: step.max(1),
            last_percent: Mutex::new(None),
        }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for LogSink {
    fn emit(&self, event: ProgressEvent) {
        match &event {
            ProgressEvent::Percentage { percent } => {
                let mut last = match self.last_percent.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let due = last.is_none_or(|prev| percent.abs_diff(prev) >= self.step || *percent == 100);
                if due {
                    *last = Some(*percent);
                    info!("{}", event);
                }
            }
            ProgressEvent::PackageError { .. } | ProgressEvent::ConfigFileChanged { .. } => {
                warn!("{}", event)
            }
            _ => info!("{}", event),
        }
    }
}

/// Callback-based sink
///
/// Calls a user-provided function for every event. Useful for bridging into
/// an RPC layer or a GUI.
pub struct CallbackSink<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> EventSink for CallbackSink<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        (self.callback)(event);
    }
}

/// Sink that records every event in arrival order
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far
    pub fn events(&self) -> Vec<ProgressEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Only the per-package lifecycle events, as (package, phase, sub_progress)
    pub fn package_events(&self) -> Vec<(String, PackagePhase, Option<u8>)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::Package {
                    package,
                    phase,
                    sub_progress,
                } => Some((package, phase, sub_progress)),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
