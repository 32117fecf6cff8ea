// src/status/machine.rs

//! Package lifecycle state machine driven by decoded status lines
//!
//! dpkg's status output is scraped progress text with a fixed English
//! vocabulary, not a real protocol. The machine assumes at most one package
//! is active at a time and closes out the previous package whenever a line
//! names a different one.
//!
//! ```text
//! INSTALL / UPGRADE (per package)          REMOVE (per package)
//!   0  Installing pkg (sometimes skipped)    25  Removing pkg
//!  25  Preparing pkg                         50  Preparing for removal of pkg
//!  50  Unpacking pkg                         75  Removing pkg
//!  75  Preparing to configure pkg           100  Removed pkg
//!   0  Configuring pkg (+25 on repeats)
//! 100  Installed pkg
//! ```
//!
//! `Running ...` lines (maintainer scripts, triggers, the dpkg call itself)
//! are never attributed to a package.

use super::line::{StatusChannel, StatusLine};
use crate::progress::{EventSink, PackagePhase, ProgressEvent};
use std::collections::HashSet;
use std::time::Instant;
use tracing::debug;

/// Mutable tracking state for one transaction
#[derive(Debug, Clone, Default)]
pub struct ProgressState {
    /// Last package referenced by a non-`Running` status line
    pub current_package: Option<String>,
    /// Progress attributed to the current package
    pub sub_progress: u32,
    /// Set once the first status line has been decoded
    pub started_receiving_status: bool,
    /// When the last status line was decoded
    pub last_activity: Option<Instant>,
}

/// What the supervisor must do after a line was processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineAction {
    Continue,
    /// dpkg is blocked on a conffile question
    Conffile { package: String, text: String },
}

/// Turns status lines into ordered [`ProgressEvent`]s
#[derive(Debug, Default)]
pub struct ProgressStateMachine {
    state: ProgressState,
    /// The current package has been opened and not yet finished
    pending: bool,
    finished: HashSet<String>,
    errors: Vec<(String, String)>,
}

impl ProgressStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    /// Whether any `pmerror` line has been seen
    pub fn error_emitted(&self) -> bool {
        !self.errors.is_empty()
    }

    /// `(package, message)` for every `pmerror` line, in arrival order
    pub fn errors(&self) -> &[(String, String)] {
        &self.errors
    }

    /// Feed one decoded line
    pub fn process(&mut self, line: &StatusLine, sink: &dyn EventSink) -> LineAction {
        self.state.started_receiving_status = true;
        self.state.last_activity = Some(Instant::now());

        let action = match line.channel {
            StatusChannel::Error => {
                sink.emit(ProgressEvent::PackageError {
                    package: line.package.clone(),
                    message: line.text.clone(),
                });
                self.errors.push((line.package.clone(), line.text.clone()));
                LineAction::Continue
            }
            StatusChannel::Conffile => LineAction::Conffile {
                package: self
                    .state
                    .current_package
                    .clone()
                    .unwrap_or_else(|| line.package.clone()),
                text: line.text.clone(),
            },
            StatusChannel::Status => {
                self.apply_status(&line.package, &line.text, sink);
                LineAction::Continue
            }
        };

        sink.emit(ProgressEvent::Percentage {
            percent: line.percent,
        });

        action
    }

    /// Finish the package still active when the transaction completes
    pub fn close(&mut self, sink: &dyn EventSink) {
        self.finish_pending(sink);
    }

    fn apply_status(&mut self, package: &str, text: &str, sink: &dyn EventSink) {
        let running = text.starts_with("Running");
        if !running {
            self.switch_to(package, sink);
        }

        if text.starts_with("Preparing to configure") {
            // The next line is usually "Configuring"; arm the wrap
            self.open(package, PackagePhase::Preparing, 75, sink);
            self.state.sub_progress = 100;
        } else if text.starts_with("Preparing for removal") {
            self.state.sub_progress = 50;
            self.open(package, PackagePhase::Removing, 50, sink);
        } else if text.starts_with("Preparing") {
            self.open(package, PackagePhase::Preparing, 25, sink);
        } else if text.starts_with("Unpacking") {
            self.report(package, PackagePhase::Decompressing, 50, sink);
        } else if text.starts_with("Configuring") {
            if self.state.sub_progress >= 100 {
                self.state.sub_progress = 0;
            }
            self.open(package, PackagePhase::Installing, self.state.sub_progress, sink);
            self.state.sub_progress += 25;
        } else if text.starts_with("Running dpkg") {
            // noise
        } else if running {
            sink.emit(ProgressEvent::Commit);
        } else if text.starts_with("Installing") {
            self.state.sub_progress = 0;
            self.open(package, PackagePhase::Installing, 0, sink);
        } else if text.starts_with("Removing") {
            if self.state.sub_progress >= 100 {
                self.state.sub_progress = 0;
            }
            self.state.sub_progress += 25;
            self.open(package, PackagePhase::Removing, self.state.sub_progress, sink);
        } else if text.starts_with("Installed") || text.starts_with("Removed") {
            self.state.sub_progress = 100;
            self.finish_pending(sink);
        } else {
            debug!("Unmapped status text for {}: {}", package, text);
        }

        if !running {
            self.state.current_package = Some(package.to_string());
        }
    }

    /// Close the previous package when a line names a different one
    fn switch_to(&mut self, package: &str, sink: &dyn EventSink) {
        match self.state.current_package.as_deref() {
            Some(current) if current == package => {}
            Some(_) => {
                self.finish_pending(sink);
                self.state.sub_progress = 0;
                self.state.current_package = Some(package.to_string());
            }
            None => {
                self.state.sub_progress = 0;
                self.state.current_package = Some(package.to_string());
            }
        }
    }

    /// Emit an opening phase and mark the package active
    fn open(&mut self, package: &str, phase: PackagePhase, sub: u32, sink: &dyn EventSink) {
        if self.report(package, phase, sub, sink) {
            self.pending = true;
        }
    }

    /// Emit a phase event unless the package already finished
    fn report(&mut self, package: &str, phase: PackagePhase, sub: u32, sink: &dyn EventSink) -> bool {
        if self.finished.contains(package) {
            debug!("Ignoring {} for already finished package {}", phase, package);
            return false;
        }
        let sub = sub.min(100) as u8;
        sink.emit(ProgressEvent::package(package, phase, Some(sub)));
        true
    }

    fn finish_pending(&mut self, sink: &dyn EventSink) {
        if !self.pending {
            return;
        }
        self.pending = false;
        if let Some(package) = self.state.current_package.clone() {
            sink.emit(ProgressEvent::finished(package.as_str()));
            self.finished.insert(package);
        }
    }
}
