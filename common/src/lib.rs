//! Common library for the `rmirror` replication agent
//!
//! `rmirror` keeps one or more destination folders caught up with a source folder that
//! is still being written to, for example an acquisition machine dumping files into a
//! local directory that must end up on network storage.
//!
//! # Overview
//!
//! The actual byte copying is delegated to an external mirror-copy program (robocopy or a
//! compatible one) behind the [`invoke::CopyPrimitive`] trait. This crate decides *when*
//! to call it:
//!
//! - [`task::Task`] runs the polling loop: it copies to every destination once, then
//!   periodically compares each destination with the source and relaunches the copy for
//!   destinations that drifted. It stops after a configurable time without new data.
//! - [`tree`] holds the filetree comparison used for drift detection and reporting.
//! - [`prune`] optionally removes source files once every destination holds an identical
//!   copy.
//! - [`notify::Notifier`] receives copy failures and the end of the task.
//!
//! # Exclusions
//!
//! Files with a configurable suffix (`tmp` unless told otherwise) are never copied,
//! never count as drift and are never deleted. Acquisition software typically writes
//! under such a name and renames the file once it is complete.
//!
//! # Logging
//!
//! Everything is logged through `tracing`. [`run`] installs the subscriber, with the
//! level taken from `RUST_LOG` or else from [`OutputConfig`], and optionally mirrors the
//! log into a file.

pub mod config;
pub mod error;
pub mod filecmp;
pub mod filter;
pub mod invoke;
pub mod job;
pub mod notify;
pub mod prune;
pub mod report;
pub mod task;
pub mod tree;

#[cfg(test)]
mod testutils;

pub use config::{OutputConfig, RuntimeConfig, TracingConfig};
pub use error::{ConfigurationError, FilesystemError};
pub use filter::Exclusion;
pub use invoke::{CopyError, CopyOutcome, CopyPrimitive, ProcessCopier};
pub use notify::{LogNotifier, Notifier};
pub use report::Report;
pub use task::{Task, TaskHandle, TaskState};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_tracing(output: &OutputConfig, config: &TracingConfig) -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(output.level_directive()));
    let file_layer = match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| anyhow::anyhow!("cannot open log file {:?}: {}", path, err))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_thread_ids(true)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .try_init()?;
    Ok(())
}

/// Set up logging and the tokio runtime, then drive `func` to completion.
///
/// Returns `None` if anything failed; the error was logged already. The summary is
/// printed to stdout when requested or when running verbose.
pub fn run<Fut, Summary>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    tracing_config: TracingConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Summary: std::fmt::Display,
    Fut: std::future::Future<Output = anyhow::Result<Summary>>,
{
    if let Err(error) = init_tracing(&output, &tracing_config) {
        if !output.quiet {
            eprintln!("{error:#}");
        }
        return None;
    }
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let runtime = match builder.build() {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!("failed to start tokio runtime: {}", error);
            return None;
        }
    };
    match runtime.block_on(func()) {
        Ok(summary) => {
            if output.print_summary || output.verbose > 0 {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            tracing::error!("{:#}", error);
            None
        }
    }
}
