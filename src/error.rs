// src/error.rs

//! Crate-wide error type
//!
//! Errors returned here are setup failures: a transaction that cannot be
//! planned, a config file that does not parse, a pty or pipe that cannot be
//! allocated, a child that cannot be spawned. Anything that goes wrong after
//! apt-get is running is reported through `TransactionResult` instead.

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("System call failed: {0}")]
    Nix(#[from] nix::errno::Errno),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Failed to spawn {0}")]
    SpawnError(String),
}
