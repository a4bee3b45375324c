use std::path::{Path, PathBuf};

use crate::filter::Exclusion;
use crate::tree;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderCount {
    /// `identical` is only set for destinations
    Counted { files: u64, identical: Option<u64> },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderReport {
    pub path: PathBuf,
    pub count: FolderCount,
}

impl FolderReport {
    #[must_use]
    pub fn files(&self) -> Option<u64> {
        match self.count {
            FolderCount::Counted { files, .. } => Some(files),
            FolderCount::Failed(_) => None,
        }
    }

    #[must_use]
    pub fn identical(&self) -> Option<u64> {
        match self.count {
            FolderCount::Counted { identical, .. } => identical,
            FolderCount::Failed(_) => None,
        }
    }
}

impl std::fmt::Display for FolderReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.count {
            FolderCount::Counted {
                files,
                identical: None,
            } => write!(f, "{} files (total) in {}", files, self.path.display()),
            FolderCount::Counted {
                files,
                identical: Some(identical),
            } => write!(
                f,
                "{} files (total) in {}, {} identical to source",
                files,
                self.path.display(),
                identical
            ),
            FolderCount::Failed(error) => {
                write!(f, "could not count files in {}: {}", self.path.display(), error)
            }
        }
    }
}

/// Summary of a finished replication task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub source: FolderReport,
    /// files removed from the source over the whole run
    pub deleted: u64,
    pub destinations: Vec<FolderReport>,
}

impl Report {
    fn lines(&self) -> Vec<String> {
        let mut lines = vec![self.source.to_string()];
        if self.deleted > 0 {
            lines.push(format!(
                "{} files were deleted from {}",
                self.deleted,
                self.source.path.display()
            ));
        }
        lines.extend(self.destinations.iter().map(ToString::to_string));
        lines
    }

    /// Write every line of the report at INFO level
    pub fn log(&self) {
        for line in self.lines() {
            tracing::info!("{}", line);
        }
    }
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.lines().join("\n"))
    }
}

fn failed(path: &Path, error: crate::error::FilesystemError) -> FolderCount {
    let error = anyhow::Error::from(error);
    tracing::warn!("could not count files in {:?}: {:#}", path, &error);
    FolderCount::Failed(format!("{error:#}"))
}

async fn count_destination(source: &Path, destination: &Path, exclusion: &Exclusion) -> FolderCount {
    let files = match tree::count_files(destination).await {
        Ok(files) => files,
        Err(error) => return failed(destination, error),
    };
    match tree::count_identical(source, destination, exclusion).await {
        Ok(identical) => FolderCount::Counted {
            files,
            identical: Some(identical),
        },
        Err(error) => failed(destination, error),
    }
}

/// Count files in every folder. Counting failures end up in the report, they are not errors.
pub async fn build(
    source: &Path,
    destinations: &[PathBuf],
    exclusion: &Exclusion,
    deleted: u64,
) -> Report {
    let source_count = match tree::count_files(source).await {
        Ok(files) => FolderCount::Counted {
            files,
            identical: None,
        },
        Err(error) => failed(source, error),
    };
    let mut folders = Vec::with_capacity(destinations.len());
    for destination in destinations {
        folders.push(FolderReport {
            path: destination.clone(),
            count: count_destination(source, destination, exclusion).await,
        });
    }
    Report {
        source: FolderReport {
            path: source.to_owned(),
            count: source_count,
        },
        deleted,
        destinations: folders,
    }
}
