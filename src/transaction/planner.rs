// src/transaction/planner.rs

//! Turns a transaction into apt-get command lines
//!
//! dpkg itself only writes `processing:`/`status:` records on its status fd.
//! The `pmstatus`/`pmerror`/`pmconffile` stream comes from apt's dpkg driver,
//! so every pass runs through `apt-get` with `APT::Status-Fd` pointing at the
//! status pipe and `Dpkg::Use-Pty=0` so dpkg talks to our terminal directly
//! (conffile questions included).
//!
//! A transaction becomes at most two invocations, always in this order:
//!
//! 1. `apt-get -o APT::Status-Fd=N ... remove <names>`
//! 2. `apt-get -o APT::Status-Fd=N ... install <archives>` (installs and upgrades)

use super::Transaction;
use std::ffi::OsString;
use std::fmt;
use std::os::fd::RawFd;
use std::path::{Component, Path};

/// The apt-get command of one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageAction {
    Remove,
    Install,
}

impl PackageAction {
    pub fn as_command(&self) -> &'static str {
        match self {
            Self::Remove => "remove",
            Self::Install => "install",
        }
    }
}

impl fmt::Display for PackageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_command())
    }
}

/// One planned apt-get run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AptInvocation {
    pub action: PackageAction,
    /// Package names for removals, archive paths for installs
    pub targets: Vec<OsString>,
    /// Passed to dpkg as `-o Dpkg::Options::=<opt>`
    pub dpkg_options: Vec<String>,
    /// Raw apt configuration items passed as `-o <item>`
    pub apt_options: Vec<String>,
    pub no_act: bool,
}

impl AptInvocation {
    /// Full argument list once the status pipe fd is known
    pub fn args(&self, status_fd: RawFd) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        let mut config = |item: String| {
            args.push("-o".into());
            args.push(item.into());
        };

        config(format!("APT::Status-Fd={}", status_fd));
        config("Dpkg::Use-Pty=0".to_string());
        for opt in &self.dpkg_options {
            config(format!("Dpkg::Options::={}", opt));
        }
        for item in &self.apt_options {
            config(item.clone());
        }

        args.push("--yes".into());
        if self.no_act {
            args.push("--simulate".into());
        }
        if self.action == PackageAction::Install {
            // The resolved set is final; never let apt remove anything on the side
            args.push("--no-remove".into());
        }
        args.push(self.action.as_command().into());
        args.extend(self.targets.iter().cloned());
        args
    }
}

/// Ordered apt-get runs for a transaction
#[derive(Debug, Clone, Default)]
pub struct InvocationPlan {
    pub invocations: Vec<AptInvocation>,
}

impl InvocationPlan {
    pub fn for_transaction(txn: &Transaction, dpkg_options: &[String], apt_options: &[String]) -> Self {
        let no_act = txn.flags().simulate_only;
        let invocation = |action, targets| AptInvocation {
            action,
            targets,
            dpkg_options: dpkg_options.to_vec(),
            apt_options: apt_options.to_vec(),
            no_act,
        };
        let mut invocations = Vec::new();

        if !txn.to_remove().is_empty() {
            let names = txn
                .to_remove()
                .iter()
                .map(|pkg| OsString::from(&pkg.name))
                .collect();
            invocations.push(invocation(PackageAction::Remove, names));
        }

        let archives: Vec<OsString> = txn
            .to_install()
            .iter()
            .chain(txn.to_upgrade())
            .filter_map(|pkg| pkg.archive_path())
            .map(archive_arg)
            .collect();
        if !archives.is_empty() {
            invocations.push(invocation(PackageAction::Install, archives));
        }

        Self { invocations }
    }

    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.invocations.len()
    }
}

/// apt-get only treats an argument as a file when it looks like a path
fn archive_arg(path: &Path) -> OsString {
    match path.components().next() {
        Some(Component::RootDir | Component::CurDir | Component::ParentDir) => {
            path.as_os_str().to_os_string()
        }
        _ => Path::new(".").join(path).into_os_string(),
    }
}
