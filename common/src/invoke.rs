//! Single invocation of the external mirror-copy primitive
//!
//! The primitive (robocopy or a compatible program) reports its outcome through the exit
//! status:
//!
//! | status | outcome                                                  |
//! |--------|----------------------------------------------------------|
//! | 0-1    | [`CopyOutcome::Success`]                                 |
//! | 2-7    | [`CopyOutcome::Benign`], some files skipped or mismatched |
//! | >= 8   | [`CopyOutcome::Failure`] carrying a [`CopyError`]        |
//!
//! On failure the textual output is scanned for error blocks of the form
//!
//! ```text
//! 2024/05/01 10:00:00 ERROR 5 (0x00000005) Copying File D:\scans\a.tif
//! Access is denied.
//! ```
//!
//! and each block becomes one [`ErrorRecord`].

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::LazyLock;

use tracing::instrument;

use crate::filter::Exclusion;

static ERROR_BLOCK: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?m)ERROR\s+(\d+)\s+\(0x[0-9a-fA-F]+\)[ \t]+(.*)\n(.*)$")
        .expect("error block pattern must compile")
});

/// Per-invocation options of the copy primitive
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// files named `*.<exclude_suffix>` are not copied, empty disables exclusion
    pub exclude_suffix: String,
    /// zero retries, longer per-file wait, restartable mode and directory timestamps
    pub secure_mode: bool,
    /// keep the per-file output of the primitive out of the INFO log
    pub silent: bool,
}

/// Everything one copy job needs to mirror `source` into `destination`
#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub exclusion: Exclusion,
    pub secure_mode: bool,
    pub silent: bool,
}

impl CopyRequest {
    #[must_use]
    pub fn new(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        exclusion: &Exclusion,
        settings: &Settings,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            exclusion: exclusion.clone(),
            secure_mode: settings.secure_mode,
            silent: settings.silent,
        }
    }

    /// Command line arguments in robocopy syntax:
    /// `<source> <destination> [/XF <pattern>] /E /COPY:DT [secure flags] /V /NJH /NJS`
    #[must_use]
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            self.source.clone().into_os_string(),
            self.destination.clone().into_os_string(),
        ];
        if let Some(pattern) = self.exclusion.pattern() {
            args.push("/XF".into());
            args.push(pattern.into());
        }
        // copy subdirectories (including empty ones), data and timestamps
        args.push("/E".into());
        args.push("/COPY:DT".into());
        if self.secure_mode {
            args.extend(["/R:0", "/W:30", "/DCOPY:T", "/Z"].map(OsString::from));
        }
        // no job header or summary, but list every file
        args.extend(["/V", "/NJH", "/NJS"].map(OsString::from));
        args
    }
}

/// What the primitive left behind after it exited
#[derive(Debug, Clone, Default)]
pub struct RawOutput {
    /// `None` when the process was terminated by a signal
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// The external directory-mirroring capability
pub trait CopyPrimitive: Send + Sync + 'static {
    /// Run one mirror copy to completion. An `Err` means the primitive could not be run.
    fn execute(
        &self,
        request: &CopyRequest,
    ) -> impl std::future::Future<Output = std::io::Result<RawOutput>> + Send;
}

/// Runs a robocopy-compatible program as a child process
#[derive(Debug, Clone)]
pub struct ProcessCopier {
    program: PathBuf,
}

impl ProcessCopier {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for ProcessCopier {
    fn default() -> Self {
        Self::new("robocopy")
    }
}

impl CopyPrimitive for ProcessCopier {
    fn execute(
        &self,
        request: &CopyRequest,
    ) -> impl std::future::Future<Output = std::io::Result<RawOutput>> + Send {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(request.args())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        tracing::debug!("running {:?}", &command);
        async move {
            let output = command.output().await?;
            Ok(RawOutput {
                code: output.status.code(),
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
    }
}

/// One parsed error block of the primitive's output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub code: u64,
    pub action: String,
    pub reason: String,
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "[Code {}] {}: {}", self.code, self.action, self.reason)
    }
}

fn describe_failure(returncode: &i32, records: &[ErrorRecord]) -> String {
    let mut msg = format!("copy primitive returned with exit code {returncode}.");
    if records.is_empty() {
        msg.push_str(" No detailed information available.");
        return msg;
    }
    msg.push_str(" The following issues were encountered:");
    for record in records {
        msg.push_str("\n  ");
        msg.push_str(&record.to_string());
    }
    msg
}

/// A copy job that did not succeed
#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    /// the primitive could not be started at all
    #[error("failed to launch copy of {from:?} to {destination:?}: {source}")]
    Launch {
        from: PathBuf,
        destination: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// the primitive ran and reported a failure status
    #[error("copy to {destination:?} failed: {}", describe_failure(.returncode, .records))]
    Failed {
        destination: PathBuf,
        /// exit status, -1 when the process was killed by a signal
        returncode: i32,
        /// error blocks parsed from the output, possibly none
        records: Vec<ErrorRecord>,
    },
}

impl CopyError {
    #[must_use]
    pub fn destination(&self) -> &std::path::Path {
        match self {
            CopyError::Launch { destination, .. } | CopyError::Failed { destination, .. } => {
                destination
            }
        }
    }
}

/// Tri-state result of one invocation
#[derive(Debug)]
pub enum CopyOutcome {
    Success,
    /// non-fatal advisory status, carries the exit code
    Benign(i32),
    Failure(CopyError),
}

/// Exit status category, before any output parsing
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Success,
    Benign(i32),
    Failure(i32),
}

impl Status {
    /// A missing status (killed by a signal) is a failure.
    #[must_use]
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(0..=1) => Status::Success,
            Some(code @ 2..=7) => Status::Benign(code),
            Some(code) => Status::Failure(code),
            None => Status::Failure(-1),
        }
    }
}

/// Extract every error block of `output` in document order
#[must_use]
pub fn parse_error_records(output: &str) -> Vec<ErrorRecord> {
    let records: Vec<ErrorRecord> = ERROR_BLOCK
        .captures_iter(output)
        .map(|caps| ErrorRecord {
            // robocopy codes are win32 error numbers, anything longer is saturated
            code: caps[1].parse::<u64>().unwrap_or(u64::MAX),
            action: caps[2].trim().to_string(),
            reason: caps[3].trim().to_string(),
        })
        .collect();
    if records.is_empty() {
        tracing::debug!("could not parse any errors from the copy output");
        tracing::debug!("raw copy output:\n {}", output);
    }
    records
}

fn log_output(request: &CopyRequest, output: &RawOutput, failed: bool) {
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if request.silent {
            tracing::debug!("{}", line);
        } else {
            tracing::info!("{}", line);
        }
    }
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        if line.trim().is_empty() {
            continue;
        }
        if failed {
            tracing::warn!("{}", line.trim_end());
        } else {
            tracing::debug!("{}", line.trim_end());
        }
    }
}

/// Run the primitive once and translate its exit status
#[instrument(skip_all, fields(source = ?request.source, destination = ?request.destination))]
pub async fn invoke<P: CopyPrimitive>(primitive: &P, request: &CopyRequest) -> CopyOutcome {
    let output = match primitive.execute(request).await {
        Ok(output) => output,
        Err(source) => {
            return CopyOutcome::Failure(CopyError::Launch {
                from: request.source.clone(),
                destination: request.destination.clone(),
                source,
            });
        }
    };
    let status = Status::from_code(output.code);
    log_output(request, &output, matches!(status, Status::Failure(_)));
    match status {
        Status::Success => CopyOutcome::Success,
        Status::Benign(code) => {
            tracing::debug!("copy exited with code {}. This is not a failure.", code);
            CopyOutcome::Benign(code)
        }
        Status::Failure(returncode) => {
            tracing::debug!("copy nonzero exit code: {}", returncode);
            let records = parse_error_records(&String::from_utf8_lossy(&output.stdout));
            CopyOutcome::Failure(CopyError::Failed {
                destination: request.destination.clone(),
                returncode,
                records,
            })
        }
    }
}
