// tests/common/mod.rs

//! Shared helpers for the executor integration tests.
//!
//! The executor wipes the child environment, so fake apt-get scripts get every
//! path they need baked into their body.

#![allow(dead_code)]

use debexec::ExecutorConfig;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Write an executable `/bin/sh` script into `dir`
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A fake apt-get that takes its status fd from `-o APT::Status-Fd=N`,
/// insists on `-o Dpkg::Use-Pty=0`, logs every argument to `args.log` and
/// then runs `body` with `$fd` and `$action` set.
///
/// dpkg's own `--status-fd` speaks a different protocol, so seeing it is an
/// immediate failure.
pub fn fake_apt_get(dir: &Path, body: &str) -> PathBuf {
    let args_log = dir.join("args.log");
    let script = format!(
        r#"fd=""
action=""
direct_pty=""
while [ $# -gt 0 ]; do
    printf '%s\n' "$1" >> "{log}"
    case "$1" in
        --status-fd) exit 98 ;;
        -o)
            printf '%s\n' "$2" >> "{log}"
            case "$2" in
                APT::Status-Fd=*) fd="${{2#APT::Status-Fd=}}" ;;
                Dpkg::Use-Pty=0) direct_pty=1 ;;
            esac
            shift 2 ;;
        install|remove) action="$1"; shift ;;
        *) shift ;;
    esac
done
[ -n "$fd" ] || exit 99
[ -n "$direct_pty" ] || exit 97
{body}
"#,
        log = args_log.display(),
        body = body
    );
    write_script(dir, "apt-get", &script)
}

/// Arguments the fake apt-get saw, one per entry, across all invocations
pub fn logged_args(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("args.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Config pointing at a fake apt-get and helper with a fast poll loop
pub fn test_config(apt_get: PathBuf, helper: PathBuf) -> ExecutorConfig {
    ExecutorConfig {
        apt_get_path: apt_get,
        conffile_helper: helper,
        conffile_helper_timeout_secs: 10,
        poll_interval_ms: 1,
        ..Default::default()
    }
}

pub fn tempdir() -> TempDir {
    tempfile::tempdir().unwrap()
}

/// Containers without /dev/ptmx cannot run these tests
pub fn pty_available() -> bool {
    nix::pty::openpty(None, None).is_ok() && Path::new("/bin/sh").exists()
}

/// Early-return from a test when no pty can be allocated
#[macro_export]
macro_rules! require_pty {
    () => {
        if !common::pty_available() {
            eprintln!("skipping: no pseudo-terminal available");
            return;
        }
    };
}
