use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::filter::Exclusion;
use crate::invoke::{CopyError, CopyPrimitive, CopyRequest, RawOutput};
use crate::notify::Notifier;

pub async fn create_temp_dir() -> anyhow::Result<std::path::PathBuf> {
    let mut idx = 0;
    loop {
        let tmp_dir = std::env::temp_dir().join(format!("rmirror_test{}", &idx));
        if let Err(error) = tokio::fs::create_dir(&tmp_dir).await {
            match error.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    idx += 1;
                }
                _ => return Err(error.into()),
            }
        } else {
            return Ok(tmp_dir);
        }
    }
}

pub async fn setup_test_dir() -> anyhow::Result<std::path::PathBuf> {
    // create a temporary directory
    let tmp_dir = create_temp_dir().await?;
    // src
    // |- 0.txt
    // |- bar
    //    |- 1.txt
    //    |- 2.txt
    let src_path = tmp_dir.join("src");
    tokio::fs::create_dir(&src_path).await.unwrap();
    tokio::fs::write(src_path.join("0.txt"), "0").await.unwrap();
    let bar_path = src_path.join("bar");
    tokio::fs::create_dir(&bar_path).await.unwrap();
    tokio::fs::write(bar_path.join("1.txt"), "1").await.unwrap();
    tokio::fs::write(bar_path.join("2.txt"), "2").await.unwrap();
    Ok(tmp_dir)
}

pub fn copy_preserving_mtime(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::copy(src, dst)?;
    let metadata = std::fs::metadata(src)?;
    filetime::set_file_mtime(dst, filetime::FileTime::from_last_modification_time(&metadata))
}

/// What robocopy /E /COPY:DT does, minus the output
pub fn mirror_tree(src: &Path, dst: &Path, exclusion: &Exclusion) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let dst_path = dst.join(entry.file_name());
        if file_type.is_dir() {
            mirror_tree(&entry.path(), &dst_path, exclusion)?;
        } else if file_type.is_file() && !exclusion.is_excluded(&entry.path()) {
            copy_preserving_mtime(&entry.path(), &dst_path)?;
        }
    }
    Ok(())
}

/// In-process copy primitive that mirrors the tree and reports status 1 ("files copied")
#[derive(Default)]
pub struct MirrorPrimitive {
    pub calls: AtomicUsize,
    pub delay: std::time::Duration,
}

impl MirrorPrimitive {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CopyPrimitive for MirrorPrimitive {
    async fn execute(&self, request: &CopyRequest) -> std::io::Result<RawOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let request = request.clone();
        tokio::task::spawn_blocking(move || {
            mirror_tree(&request.source, &request.destination, &request.exclusion)
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(RawOutput {
            code: Some(1),
            ..Default::default()
        })
    }
}

/// Copy primitive that touches nothing and always exits with the same status and output
pub struct StatusPrimitive {
    pub calls: AtomicUsize,
    code: Option<i32>,
    stdout: String,
    stderr: String,
    delay: std::time::Duration,
}

impl StatusPrimitive {
    pub fn new(code: Option<i32>, stdout: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            code,
            stdout: stdout.to_string(),
            stderr: String::new(),
            delay: std::time::Duration::ZERO,
        }
    }

    pub fn with_stderr(mut self, stderr: &str) -> Self {
        self.stderr = stderr.to_string();
        self
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CopyPrimitive for StatusPrimitive {
    async fn execute(&self, _request: &CopyRequest) -> std::io::Result<RawOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(RawOutput {
            code: self.code,
            stdout: self.stdout.clone().into_bytes(),
            stderr: self.stderr.clone().into_bytes(),
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub failed: AtomicUsize,
    pub finished: AtomicUsize,
    pub errors: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn failed_count(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn finished_count(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

impl Notifier for RecordingNotifier {
    fn failed(&self, error: &CopyError) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.errors.lock().unwrap().push(error.to_string());
    }

    fn finished(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}
