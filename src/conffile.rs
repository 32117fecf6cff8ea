// src/conffile.rs

//! Conffile prompt handling
//!
//! When dpkg finds a locally modified configuration file whose packaged
//! version changed, it reports a `pmconffile` line and stops until it reads
//! an answer from its terminal. The answer comes from an external decision
//! helper:
//!
//! ```text
//! helper <package> <orig_file> <new_file>
//!   exit 10 -> "Y\n" (install the package maintainer's version)
//!   exit 20 -> "N\n" (keep the current file)
//!   other   -> "N\n" and the user is told to merge by hand
//! ```
//!
//! The helper runs synchronously: dpkg is paused anyway until it gets the
//! answer, so nothing else can make progress in the meantime.

use crate::progress::{EventSink, ProgressEvent};
use regex::Regex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Helper exit code: use the new conffile
pub const EXIT_USE_NEW: i32 = 10;
/// Helper exit code: keep the current conffile
pub const EXIT_KEEP_CURRENT: i32 = 20;

/// Default time a user gets to answer a conffile question
pub const DEFAULT_HELPER_TIMEOUT: Duration = Duration::from_secs(3600);

static QUOTED_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'(?P<path>[^']*)'").unwrap());

/// Errors from decoding the free text of a `pmconffile` line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConffileParseError {
    #[error("no quoted original path in {0:?}")]
    MissingOriginal(String),

    #[error("no quoted new path in {0:?}")]
    MissingNew(String),
}

/// The two files dpkg asks about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConffilePrompt {
    pub original: String,
    pub new: String,
}

impl ConffilePrompt {
    /// Extract the first two single-quoted paths
    ///
    /// An unterminated quote is an error, not a best-effort guess.
    pub fn parse(text: &str) -> Result<Self, ConffileParseError> {
        let mut paths = QUOTED_PATH
            .captures_iter(text)
            .filter_map(|caps| caps.name("path"))
            .map(|m| m.as_str().to_string());

        let original = paths
            .next()
            .ok_or_else(|| ConffileParseError::MissingOriginal(text.to_string()))?;
        let new = paths
            .next()
            .ok_or_else(|| ConffileParseError::MissingNew(text.to_string()))?;

        Ok(Self { original, new })
    }
}

/// How debconf questions reach the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebconfFrontend {
    /// Forward questions over the caller's debconf socket
    Passthrough { socket: PathBuf },
    /// No one to ask; take defaults
    Noninteractive,
}

impl DebconfFrontend {
    pub fn from_socket(socket: Option<&Path>) -> Self {
        match socket {
            Some(socket) => Self::Passthrough {
                socket: socket.to_path_buf(),
            },
            None => Self::Noninteractive,
        }
    }

    /// Environment variables selecting this frontend
    pub fn env(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Passthrough { socket } => vec![
                ("DEBIAN_FRONTEND", "passthrough".to_string()),
                ("DEBCONF_PIPE", socket.to_string_lossy().into_owned()),
            ],
            Self::Noninteractive => vec![("DEBIAN_FRONTEND", "noninteractive".to_string())],
        }
    }
}

/// Outcome of asking the helper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConffileDecision {
    UseNew,
    KeepCurrent,
    /// Helper failed, timed out, or gave no answer
    Undecided,
}

impl ConffileDecision {
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(EXIT_USE_NEW) => Self::UseNew,
            Some(EXIT_KEEP_CURRENT) => Self::KeepCurrent,
            _ => Self::Undecided,
        }
    }

    /// Bytes written back to dpkg
    pub fn answer(&self) -> &'static [u8] {
        match self {
            Self::UseNew => b"Y\n",
            Self::KeepCurrent | Self::Undecided => b"N\n",
        }
    }
}

/// Runs the decision helper and answers dpkg
#[derive(Debug, Clone)]
pub struct ConffileResolver {
    helper: PathBuf,
    frontend: DebconfFrontend,
    path_env: String,
    timeout: Duration,
}

impl ConffileResolver {
    pub fn new(helper: impl Into<PathBuf>, frontend: DebconfFrontend) -> Self {
        Self {
            helper: helper.into(),
            frontend,
            path_env: crate::config::DEFAULT_PATH.to_string(),
            timeout: DEFAULT_HELPER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_path_env(mut self, path: impl Into<String>) -> Self {
        self.path_env = path.into();
        self
    }

    /// Handle one `pmconffile` line end to end
    ///
    /// Parses `text`, asks the helper about `package`, writes the answer to
    /// `answer_to` and reports undecided prompts to `sink`. On a parse
    /// failure dpkg is still answered with "keep current" so it does not hang.
    pub fn resolve<W: Write>(
        &self,
        package: &str,
        text: &str,
        answer_to: &mut W,
        sink: &dyn EventSink,
    ) -> Result<ConffileDecision, ConffileParseError> {
        let prompt = match ConffilePrompt::parse(text) {
            Ok(prompt) => prompt,
            Err(e) => {
                write_answer(answer_to, ConffileDecision::KeepCurrent);
                return Err(e);
            }
        };

        let decision = self.decide(package, &prompt);
        info!(
            "Conffile {} of {}: {:?}",
            prompt.original, package, decision
        );

        if decision == ConffileDecision::Undecided {
            sink.emit(ProgressEvent::ConfigFileChanged {
                package: package.to_string(),
                original: prompt.original.clone(),
                new: prompt.new.clone(),
            });
        }

        write_answer(answer_to, decision);
        Ok(decision)
    }

    /// Spawn the helper and wait for its verdict
    pub fn decide(&self, package: &str, prompt: &ConffilePrompt) -> ConffileDecision {
        debug!(
            "Running {} {} {} {}",
            self.helper.display(),
            package,
            prompt.original,
            prompt.new
        );

        let spawned = Command::new(&self.helper)
            .arg(package)
            .arg(&prompt.original)
            .arg(&prompt.new)
            .env_clear()
            .env("PATH", &self.path_env)
            .envs(self.frontend.env())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn conffile helper {}: {}", self.helper.display(), e);
                return ConffileDecision::Undecided;
            }
        };

        match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => ConffileDecision::from_exit_code(status.code()),
            Ok(None) => {
                warn!(
                    "Conffile helper timed out after {} seconds",
                    self.timeout.as_secs()
                );
                let _ = child.kill();
                let _ = child.wait();
                ConffileDecision::Undecided
            }
            Err(e) => {
                warn!("Failed to wait for conffile helper: {}", e);
                let _ = child.kill();
                let _ = child.wait();
                ConffileDecision::Undecided
            }
        }
    }
}

/// Single write of the two-byte answer; a short write is only logged
fn write_answer<W: Write>(out: &mut W, decision: ConffileDecision) {
    let answer = decision.answer();
    match out.write(answer) {
        Ok(n) if n == answer.len() => {
            let _ = out.flush();
        }
        Ok(n) => warn!("Short write answering conffile prompt ({} of {} bytes)", n, answer.len()),
        Err(e) => warn!("Failed to answer conffile prompt: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::RecordingSink;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    const PROMPT: &str = "'/etc/a.conf' -> '/etc/a.conf.dpkg-new'";

    fn helper(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("conffile-helper");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn answer_for(body: &str) -> (Vec<u8>, RecordingSink) {
        let dir = TempDir::new().unwrap();
        let resolver = ConffileResolver::new(helper(&dir, body), DebconfFrontend::Noninteractive);
        let sink = RecordingSink::new();
        let mut out = Vec::new();
        resolver.resolve("pkgA", PROMPT, &mut out, &sink).unwrap();
        (out, sink)
    }

    #[test]
    fn test_parse_prompt() {
        let prompt = ConffilePrompt::parse(PROMPT).unwrap();
        assert_eq!(prompt.original, "/etc/a.conf");
        assert_eq!(prompt.new, "/etc/a.conf.dpkg-new");

        let prompt = ConffilePrompt::parse("'/etc/x' '/etc/x.dpkg-dist' 1 1").unwrap();
        assert_eq!(prompt.new, "/etc/x.dpkg-dist");
    }

    #[test]
    fn test_parse_prompt_with_colons() {
        let prompt = ConffilePrompt::parse("'/etc/odd:name' '/etc/odd:name.dpkg-new'").unwrap();
        assert_eq!(prompt.original, "/etc/odd:name");
        assert_eq!(prompt.new, "/etc/odd:name.dpkg-new");
    }

    #[test]
    fn test_parse_unterminated_quotes() {
        assert!(matches!(
            ConffilePrompt::parse("'/etc/a.conf"),
            Err(ConffileParseError::MissingOriginal(_))
        ));
        assert!(matches!(
            ConffilePrompt::parse("no quotes at all"),
            Err(ConffileParseError::MissingOriginal(_))
        ));
        assert!(matches!(
            ConffilePrompt::parse("'/etc/a.conf' '/etc/a.conf.dpkg-new"),
            Err(ConffileParseError::MissingNew(_))
        ));
    }

    #[test]
    fn test_decision_from_exit_code() {
        assert_eq!(ConffileDecision::from_exit_code(Some(10)), ConffileDecision::UseNew);
        assert_eq!(ConffileDecision::from_exit_code(Some(20)), ConffileDecision::KeepCurrent);
        assert_eq!(ConffileDecision::from_exit_code(Some(1)), ConffileDecision::Undecided);
        assert_eq!(ConffileDecision::from_exit_code(None), ConffileDecision::Undecided);
    }

    #[test]
    fn test_helper_use_new() {
        let (out, sink) = answer_for("exit 10");
        assert_eq!(out, b"Y\n");
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_helper_keep_current() {
        let (out, sink) = answer_for("exit 20");
        assert_eq!(out, b"N\n");
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_helper_other_exit_keeps_current() {
        let (out, sink) = answer_for("exit 1");
        assert_eq!(out, b"N\n");
        assert!(matches!(
            &sink.events()[..],
            [ProgressEvent::ConfigFileChanged { original, .. }] if original == "/etc/a.conf"
        ));
    }

    #[test]
    fn test_missing_helper_keeps_current() {
        let resolver = ConffileResolver::new("/nonexistent/helper", DebconfFrontend::Noninteractive);
        let sink = RecordingSink::new();
        let mut out = Vec::new();
        let decision = resolver.resolve("pkgA", PROMPT, &mut out, &sink).unwrap();
        assert_eq!(decision, ConffileDecision::Undecided);
        assert_eq!(out, b"N\n");
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn test_parse_failure_still_answers() {
        let resolver = ConffileResolver::new("/nonexistent/helper", DebconfFrontend::Noninteractive);
        let sink = RecordingSink::new();
        let mut out = Vec::new();
        let result = resolver.resolve("pkgA", "'/etc/a.conf", &mut out, &sink);
        assert!(result.is_err());
        assert_eq!(out, b"N\n");
    }

    #[test]
    fn test_helper_arguments_and_environment() {
        let dir = TempDir::new().unwrap();
        let record = dir.path().join("record");
        let body = format!(
            "echo \"$1|$2|$3|$DEBIAN_FRONTEND|$DEBCONF_PIPE\" > {}\nexit 20",
            record.display()
        );
        let frontend = DebconfFrontend::from_socket(Some(Path::new("/run/debconf.sock")));
        let resolver = ConffileResolver::new(helper(&dir, &body), frontend);

        let mut out = Vec::new();
        resolver
            .resolve("pkgA", PROMPT, &mut out, &RecordingSink::new())
            .unwrap();

        let recorded = fs::read_to_string(&record).unwrap();
        assert_eq!(
            recorded.trim(),
            "pkgA|/etc/a.conf|/etc/a.conf.dpkg-new|passthrough|/run/debconf.sock"
        );
    }

    #[test]
    fn test_helper_timeout() {
        let dir = TempDir::new().unwrap();
        let resolver = ConffileResolver::new(helper(&dir, "sleep 5\nexit 10"), DebconfFrontend::Noninteractive)
            .with_timeout(Duration::from_millis(100));
        let prompt = ConffilePrompt::parse(PROMPT).unwrap();
        assert_eq!(resolver.decide("pkgA", &prompt), ConffileDecision::Undecided);
    }

    #[test]
    fn test_frontend_env() {
        assert_eq!(
            DebconfFrontend::Noninteractive.env(),
            vec![("DEBIAN_FRONTEND", "noninteractive".to_string())]
        );
        let env = DebconfFrontend::from_socket(Some(Path::new("/tmp/s"))).env();
        assert_eq!(env[0].1, "passthrough");
        assert_eq!(env[1], ("DEBCONF_PIPE", "/tmp/s".to_string()));
    }
}
