use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rmirror",
    version,
    about = "Keep destination folders caught up with a source folder that is still being written to",
    long_about = "`rmirror` mirrors SRC into every DST by repeatedly running a robocopy-compatible
copy program. After the initial copy, each destination is compared with the source every
--time-interval and copied again when new or changed files show up. The program exits once
nothing changed for --wait-exit.

Files ending in --skip-files (default: .tmp) are neither copied nor compared, so files which
are still being written can use that suffix until they are complete.

EXIT CODES:
    0 - Replication finished (individual copy failures are logged and retried)
    1 - Invalid configuration or no usable destination

EXAMPLES:
    # Mirror to two shares in parallel, stop after 1 hour without new data
    rmirror D:\\acquisition \\\\nas1\\data \\\\nas2\\data --multithread --wait-exit 60

    # Move data: delete source files once both copies are confirmed
    rmirror D:\\acquisition \\\\nas1\\data \\\\nas2\\data --delete-source --summary

    # Check every 30 seconds using a different copy program
    rmirror /data/in /mnt/backup --time-interval 30s --robocopy /opt/bin/robocopy"
)]
struct Args {
    // Replication options
    /// Run up to two copy jobs in parallel (requires at least two destinations)
    #[arg(long, help_heading = "Replication options")]
    multithread: bool,

    /// Delay between two checks for new files
    ///
    /// A plain number is taken as minutes, otherwise a human readable duration such as
    /// "30s", "5min" or "1h" is accepted.
    #[arg(
        long,
        default_value = "1",
        value_name = "DURATION",
        value_parser = parse_duration,
        help_heading = "Replication options"
    )]
    time_interval: Duration,

    /// Stop after this long without new files and without a running copy
    ///
    /// A plain number is taken as minutes, otherwise a human readable duration such as
    /// "30s", "5min" or "1h" is accepted.
    #[arg(
        long,
        default_value = "30",
        value_name = "DURATION",
        value_parser = parse_duration,
        help_heading = "Replication options"
    )]
    wait_exit: Duration,

    /// Delete files from the source once they are identical in every destination
    #[arg(long, help_heading = "Replication options")]
    delete_source: bool,

    // Copy options
    /// Suffix of files that are never copied, compared or deleted, empty to copy everything
    #[arg(
        long,
        default_value = "tmp",
        value_name = "SUFFIX",
        help_heading = "Copy options"
    )]
    skip_files: String,

    /// Log the output of the copy program at DEBUG instead of INFO level
    #[arg(long, help_heading = "Copy options")]
    silent: bool,

    /// No retries, restartable mode and copied directory timestamps
    #[arg(long, help_heading = "Copy options")]
    secure_mode: bool,

    /// Copy program to run, must accept robocopy arguments and exit codes
    #[arg(
        long,
        default_value = "robocopy",
        value_name = "PROGRAM",
        help_heading = "Copy options"
    )]
    robocopy: std::path::PathBuf,

    // Progress & output
    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    /// Also write the log to this file
    #[arg(long, value_name = "PATH", help_heading = "Progress & output")]
    log_file: Option<std::path::PathBuf>,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    // ARGUMENTS
    /// Folder to replicate
    #[arg()]
    src: std::path::PathBuf,

    /// Folders to replicate into
    #[arg(required = true)]
    dst: Vec<std::path::PathBuf>,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if let Ok(minutes) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(minutes * 60.0)
            .map_err(|err| format!("invalid number of minutes {value:?}: {err}"));
    }
    humantime::parse_duration(value).map_err(|err| format!("invalid duration {value:?}: {err}"))
}

async fn async_main(args: Args) -> Result<common::Report> {
    let task = common::Task::new(
        common::ProcessCopier::new(&args.robocopy),
        Arc::new(common::LogNotifier),
    );
    let handle = task.handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("rmirror: interrupted, finishing running copies");
                handle.terminate();
            }
            Err(error) => tracing::warn!("rmirror: cannot listen for Ctrl-C: {}", error),
        }
    });
    let settings = common::task::Settings {
        multithread: args.multithread,
        interval: args.time_interval,
        wait_exit: args.wait_exit,
        delete_source: args.delete_source,
        copy: common::invoke::Settings {
            exclude_suffix: args.skip_files.clone(),
            secure_mode: args.secure_mode,
            silent: args.silent,
        },
    };
    let report = task
        .run(&args.src, &args.dst, &settings)
        .await
        .with_context(|| format!("rmirror: cannot replicate {:?}", &args.src))?;
    Ok(report)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let tracing = common::TracingConfig {
        log_file: args.log_file.clone(),
    };
    let res = common::run(output, runtime, tracing, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
