// src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use debexec::{
    CallbackSink, CancelToken, EventSink, ExecutorConfig, LogSink, PackageRef, ProgressEvent,
    Transaction, TransactionFlags, TransactionResult, TransactionSupervisor,
};
use nix::sys::signal::{SigSet, Signal};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "debexec")]
#[command(author, version, about = "Privileged dpkg transaction executor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a resolved transaction through apt-get and dpkg
    Run {
        /// Config file (default: /etc/debexec/executor.toml if present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Install a package from a downloaded archive
        #[arg(long, value_name = "PKG=ARCHIVE", value_parser = parse_archive_ref)]
        install: Vec<PackageRef>,

        /// Upgrade a package from a downloaded archive
        #[arg(long, value_name = "PKG=ARCHIVE", value_parser = parse_archive_ref)]
        upgrade: Vec<PackageRef>,

        /// Remove an installed package
        #[arg(long, value_name = "PKG")]
        remove: Vec<String>,

        /// Ask apt-get what it would do without changing anything
        #[arg(long)]
        simulate: bool,

        /// Archives were only downloaded; do not run anything
        #[arg(long)]
        download_only: bool,

        /// The removal set includes auto-removable packages
        #[arg(long)]
        auto_remove: bool,

        /// Print progress events as JSON lines on stdout
        #[arg(long)]
        json: bool,
    },
}

fn parse_archive_ref(s: &str) -> std::result::Result<PackageRef, String> {
    match s.split_once('=') {
        Some((name, archive)) if !name.is_empty() && !archive.is_empty() => {
            Ok(PackageRef::archive(name, archive))
        }
        _ => Err(format!("expected PKG=ARCHIVE, got '{}'", s)),
    }
}

/// Route SIGINT and SIGTERM to the cancel token instead of killing the process
fn install_cancel_handler(token: CancelToken) -> Result<()> {
    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    signals.thread_block().context("Failed to block termination signals")?;

    std::thread::spawn(move || {
        if let Ok(sig) = signals.wait() {
            warn!("Received {:?}, cancelling transaction", sig);
            token.cancel();
        }
    });
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match run(cli.command) {
        Ok(TransactionResult::Success) => ExitCode::SUCCESS,
        Ok(TransactionResult::Cancelled) => ExitCode::from(130),
        Ok(TransactionResult::Failed(diagnostic)) => {
            eprintln!("Transaction failed:\n{}", diagnostic);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<TransactionResult> {
    match command {
        Commands::Run {
            config,
            install,
            upgrade,
            remove,
            simulate,
            download_only,
            auto_remove,
            json,
        } => {
            let config = ExecutorConfig::load(config.as_deref()).context("Failed to load config")?;
            let txn = Transaction::new(
                install,
                remove.into_iter().map(PackageRef::installed).collect(),
                upgrade,
                TransactionFlags {
                    simulate_only: simulate,
                    download_only,
                    auto_remove,
                },
            )?;

            let token = CancelToken::new();
            install_cancel_handler(token.clone())?;
            let supervisor = TransactionSupervisor::new(config).with_cancel_token(token);

            info!("Running transaction with {} package(s)", txn.package_count());
            let sink: Box<dyn EventSink> = if json {
                Box::new(CallbackSink::new(print_json))
            } else {
                Box::new(LogSink::new())
            };

            Ok(supervisor.execute(&txn, sink.as_ref())?)
        }
    }
}

fn print_json(event: ProgressEvent) {
    match serde_json::to_string(&event) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("Failed to serialize event: {}", e),
    }
}
