// src/supervisor/mod.rs

//! Transaction supervisor
//!
//! Runs the planned apt-get invocations one after another and drives a single
//! polling loop per invocation. apt-get runs dpkg on the same terminal and
//! writes the `pmstatus` stream to the status pipe:
//!
//! ```text
//! while apt-get alive (plus one pass after it exits):
//!     drain pty master   -> OutputTail (diagnostics only)
//!     drain status pipe  -> StatusLine -> ProgressStateMachine -> EventSink
//!                                         pmconffile -> ConffileResolver -> pty master
//!     watchdog check
//!     sleep poll_interval
//! ```
//!
//! Everything runs on the calling thread. The only cross-thread input is the
//! [`CancelToken`], checked once per pass.

mod child;
mod tail;

pub use child::{ChildExit, ChildHandle};
pub use tail::OutputTail;

use crate::conffile::ConffileResolver;
use crate::config::ExecutorConfig;
use crate::error::Result;
use crate::progress::EventSink;
use crate::status::{LineAccumulator, LineAction, ProgressStateMachine, StatusLine};
use crate::transaction::{AptInvocation, InvocationPlan, Transaction, TransactionResult};
use crate::watchdog::Watchdog;
use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Cooperative cancellation flag shared with other threads
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a single apt-get run
struct RunOutcome {
    exit: ChildExit,
    terminated: bool,
    tail: OutputTail,
    errors_from: usize,
}

/// Executes transactions by supervising apt-get and dpkg
#[derive(Debug)]
pub struct TransactionSupervisor {
    config: ExecutorConfig,
    resolver: ConffileResolver,
    cancel: CancelToken,
}

impl TransactionSupervisor {
    pub fn new(config: ExecutorConfig) -> Self {
        let resolver = ConffileResolver::new(&config.conffile_helper, config.debconf_frontend())
            .with_timeout(config.conffile_helper_timeout())
            .with_path_env(config.path.clone());
        Self {
            config,
            resolver,
            cancel: CancelToken::new(),
        }
    }

    /// Use an existing token, e.g. one already wired to a signal handler
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run a transaction to completion
    ///
    /// Returns `Err` only when apt-get could not be started or supervised at
    /// all; everything apt and dpkg do ends up in the [`TransactionResult`].
    pub fn execute(&self, txn: &Transaction, sink: &dyn EventSink) -> Result<TransactionResult> {
        let flags = txn.flags();
        if flags.download_only {
            info!("Download-only transaction, archives are already fetched; not running apt-get");
            return Ok(TransactionResult::Success);
        }
        if flags.auto_remove {
            info!("Auto-removable packages are part of the removal set");
        }

        let plan = InvocationPlan::for_transaction(
            txn,
            &self.config.dpkg_options,
            &self.config.apt_options,
        );
        if plan.is_empty() {
            info!("Nothing to do");
            return Ok(TransactionResult::Success);
        }

        info!(
            "Executing transaction: {} package(s) in {} apt-get run(s){}",
            txn.package_count(),
            plan.len(),
            if flags.simulate_only { " (simulated)" } else { "" }
        );

        let mut machine = ProgressStateMachine::new();
        let mut prompts = Vec::new();

        for invocation in &plan.invocations {
            if self.cancel.is_cancelled() {
                info!("Cancelled before apt-get {}", invocation.action);
                summarize_prompts(&prompts);
                return Ok(TransactionResult::Cancelled);
            }

            let outcome = self.run_invocation(invocation, &mut machine, sink, &mut prompts)?;
            let result = self.classify(&outcome, &machine);
            if !result.is_success() {
                match &result {
                    TransactionResult::Failed(diagnostic) => {
                        error!("apt-get {} failed: {}", invocation.action, diagnostic)
                    }
                    _ => info!("apt-get {} cancelled", invocation.action),
                }
                summarize_prompts(&prompts);
                return Ok(result);
            }
        }

        machine.close(sink);
        summarize_prompts(&prompts);
        info!("Transaction completed successfully");
        Ok(TransactionResult::Success)
    }

    fn run_invocation(
        &self,
        invocation: &AptInvocation,
        machine: &mut ProgressStateMachine,
        sink: &dyn EventSink,
        prompts: &mut Vec<String>,
    ) -> Result<RunOutcome> {
        let mut child = ChildHandle::spawn(
            &self.config.apt_get_path,
            invocation,
            &self.config.child_env(),
        )?;
        debug!("apt-get {} started as pid {}", invocation.action, child.pid());

        let mut accumulator = LineAccumulator::new();
        let mut tail = OutputTail::new(self.config.tail_capacity);
        let mut watchdog = Watchdog::new(self.config.watchdog_timeout());
        let errors_from = machine.errors().len();
        let mut terminated = false;
        let mut exit = None;

        loop {
            if !terminated && self.cancel.is_cancelled() {
                info!("Cancellation requested, sending SIGTERM to apt-get (pid {})", child.pid());
                if let Err(e) = child.terminate() {
                    warn!("Failed to signal apt-get: {}", e);
                }
                terminated = true;
            }

            drain_terminal(child.pty_master(), &mut tail);
            self.drain_status(&mut child, &mut accumulator, machine, sink, prompts);

            // One extra pass after exit flushes what was still buffered
            if let Some(exit) = exit {
                let pending = accumulator.pending();
                if !pending.is_empty() {
                    debug!(
                        "Discarding unterminated status output: {}",
                        String::from_utf8_lossy(pending)
                    );
                }
                if watchdog.stalls() > 0 {
                    info!(
                        "apt-get {} went quiet {} time(s) for more than {} seconds",
                        invocation.action,
                        watchdog.stalls(),
                        self.config.watchdog_timeout_secs
                    );
                }
                return Ok(RunOutcome {
                    exit,
                    terminated,
                    tail,
                    errors_from,
                });
            }

            exit = child.try_wait()?;
            watchdog.check(machine.state(), Instant::now());
            if exit.is_none() {
                std::thread::sleep(self.config.poll_interval());
            }
        }
    }

    fn drain_status(
        &self,
        child: &mut ChildHandle,
        accumulator: &mut LineAccumulator,
        machine: &mut ProgressStateMachine,
        sink: &dyn EventSink,
        prompts: &mut Vec<String>,
    ) {
        let (status, pty) = child.streams();
        for raw in accumulator.lines(status) {
            let line = match StatusLine::parse(&raw) {
                Ok(line) => line,
                Err(e) => {
                    warn!("Discarding status line: {}", e);
                    continue;
                }
            };

            if let LineAction::Conffile { package, text } = machine.process(&line, sink) {
                prompts.push(format!("{}: {}", package, text));
                if let Err(e) = self.resolver.resolve(&package, &text, pty, sink) {
                    error!("Malformed conffile prompt for {}: {}", package, e);
                }
            }
        }
    }

    fn classify(&self, outcome: &RunOutcome, machine: &ProgressStateMachine) -> TransactionResult {
        if outcome.exit.success() {
            return TransactionResult::Success;
        }
        if outcome.terminated {
            return TransactionResult::Cancelled;
        }

        let errors = &machine.errors()[outcome.errors_from..];
        if !errors.is_empty() {
            let joined: Vec<String> = errors
                .iter()
                .map(|(package, message)| format!("{}: {}", package, message))
                .collect();
            return TransactionResult::Failed(joined.join("\n"));
        }

        let diagnostic = outcome.tail.diagnostic(self.config.fallback_excerpt_len);
        if diagnostic.is_empty() {
            TransactionResult::Failed(format!("apt-get exited with status {}", outcome.exit.code()))
        } else {
            TransactionResult::Failed(diagnostic)
        }
    }
}

/// Read whatever the terminal has buffered; EAGAIN and EIO both mean "no more"
fn drain_terminal<R: Read>(pty: &mut R, tail: &mut OutputTail) {
    let mut buf = [0u8; 4096];
    loop {
        match pty.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                trace!("apt-get: {}", String::from_utf8_lossy(&buf[..n]).trim_end());
                tail.push(&buf[..n]);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

fn summarize_prompts(prompts: &[String]) {
    if !prompts.is_empty() {
        info!("Conffile prompts seen during this transaction:\n{}", prompts.join("\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::RecordingSink;
    use crate::transaction::{PackageRef, TransactionFlags};

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!token.is_cancelled());
        other.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_download_only_skips_dpkg() {
        let config = ExecutorConfig {
            apt_get_path: "/nonexistent/apt-get".into(),
            ..Default::default()
        };
        let supervisor = TransactionSupervisor::new(config);
        let txn = Transaction::new(
            vec![PackageRef::archive("foo", "/cache/foo.deb")],
            vec![],
            vec![],
            TransactionFlags {
                download_only: true,
                ..Default::default()
            },
        )
        .unwrap();
        let sink = RecordingSink::new();

        assert_eq!(supervisor.execute(&txn, &sink).unwrap(), TransactionResult::Success);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_empty_transaction_succeeds() {
        let supervisor = TransactionSupervisor::new(ExecutorConfig::default());
        let txn = Transaction::new(vec![], vec![], vec![], TransactionFlags::default()).unwrap();
        assert!(supervisor.execute(&txn, &RecordingSink::new()).unwrap().is_success());
    }

    #[test]
    fn test_drain_terminal_reads_everything() {
        let mut tail = OutputTail::new(64);
        let mut input: &[u8] = b"E: oops\r\n";
        drain_terminal(&mut input, &mut tail);
        assert_eq!(tail.diagnostic(10), "E: oops");
    }
}
