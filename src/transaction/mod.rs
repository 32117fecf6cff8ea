// src/transaction/mod.rs

//! Resolved transactions and their outcome
//!
//! A `Transaction` arrives fully decided: dependency resolution, trust
//! checks and archive downloads all happened upstream. This module only
//! checks that the sets are coherent and turns them into apt-get calls
//! (see [`planner`]).
//!
//! # Transaction Lifecycle
//!
//! ```text
//! resolver -> Transaction::new -> InvocationPlan -> apt-get/dpkg (remove pass, install pass) -> TransactionResult
//! ```

pub mod planner;

pub use planner::{AptInvocation, InvocationPlan, PackageAction};

use crate::error::{Error, Result};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// A package named by the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRef {
    pub name: String,
    /// Downloaded `.deb`; required for installs and upgrades
    pub archive: Option<PathBuf>,
}

impl PackageRef {
    /// A package that is already installed (removals)
    pub fn installed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            archive: None,
        }
    }

    /// A package backed by a fetched archive (installs and upgrades)
    pub fn archive(name: impl Into<String>, archive: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            archive: Some(archive.into()),
        }
    }

    pub fn archive_path(&self) -> Option<&Path> {
        self.archive.as_deref()
    }
}

/// Execution flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionFlags {
    /// Ask apt-get to report what it would do without doing it
    pub simulate_only: bool,
    /// Archives were only meant to be fetched; nothing is executed
    pub download_only: bool,
    /// The resolver already folded auto-removable packages into `to_remove`
    pub auto_remove: bool,
}

/// Immutable, validated install/remove/upgrade set
#[derive(Debug, Clone)]
pub struct Transaction {
    to_install: Vec<PackageRef>,
    to_remove: Vec<PackageRef>,
    to_upgrade: Vec<PackageRef>,
    flags: TransactionFlags,
}

impl Transaction {
    /// Validate and build a transaction
    ///
    /// The three sets must be disjoint by package name, and every install or
    /// upgrade must point at an archive.
    pub fn new(
        to_install: Vec<PackageRef>,
        to_remove: Vec<PackageRef>,
        to_upgrade: Vec<PackageRef>,
        flags: TransactionFlags,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for pkg in to_install.iter().chain(&to_remove).chain(&to_upgrade) {
            if pkg.name.is_empty() {
                return Err(Error::InvalidTransaction("empty package name".to_string()));
            }
            if !seen.insert(pkg.name.as_str()) {
                return Err(Error::InvalidTransaction(format!(
                    "package {} appears more than once",
                    pkg.name
                )));
            }
        }

        if let Some(pkg) = to_install
            .iter()
            .chain(&to_upgrade)
            .find(|pkg| pkg.archive.is_none())
        {
            return Err(Error::InvalidTransaction(format!(
                "package {} has no downloaded archive",
                pkg.name
            )));
        }

        Ok(Self {
            to_install,
            to_remove,
            to_upgrade,
            flags,
        })
    }

    pub fn to_install(&self) -> &[PackageRef] {
        &self.to_install
    }

    pub fn to_remove(&self) -> &[PackageRef] {
        &self.to_remove
    }

    pub fn to_upgrade(&self) -> &[PackageRef] {
        &self.to_upgrade
    }

    pub fn flags(&self) -> TransactionFlags {
        self.flags
    }

    pub fn is_empty(&self) -> bool {
        self.to_install.is_empty() && self.to_remove.is_empty() && self.to_upgrade.is_empty()
    }

    pub fn package_count(&self) -> usize {
        self.to_install.len() + self.to_remove.len() + self.to_upgrade.len()
    }
}

/// Terminal outcome of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionResult {
    Success,
    Cancelled,
    /// Carries a best-effort diagnostic excerpt
    Failed(String),
}

impl TransactionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for TransactionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Failed(diagnostic) => write!(f, "failed: {}", diagnostic),
        }
    }
}
