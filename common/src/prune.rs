use std::path::{Path, PathBuf};

use tracing::instrument;

use crate::filter::Exclusion;
use crate::tree;

async fn confirmed_everywhere(
    src_path: &Path,
    relative: &Path,
    destinations: &[PathBuf],
) -> bool {
    for destination in destinations {
        match tree::is_identical(src_path, &destination.join(relative)).await {
            Ok(true) => {}
            Ok(false) => return false,
            Err(error) => {
                tracing::warn!("prune: cannot confirm {:?}: {:#}", src_path, error);
                return false;
            }
        }
    }
    true
}

/// Remove every non-excluded file of `source` that has an identical copy in *all*
/// `destinations`. Returns the number of files removed. Failures are logged and skipped.
#[instrument(skip(exclusion))]
pub async fn prune(source: &Path, destinations: &[PathBuf], exclusion: &Exclusion) -> u64 {
    if destinations.is_empty() {
        return 0;
    }
    let files = match tree::list_files(source).await {
        Ok(files) => files,
        Err(error) => {
            tracing::warn!("prune: {:#}", error);
            return 0;
        }
    };
    let mut deleted = 0;
    for relative in files {
        if exclusion.is_excluded(&relative) {
            continue;
        }
        let src_path = source.join(&relative);
        if !confirmed_everywhere(&src_path, &relative, destinations).await {
            continue;
        }
        match tokio::fs::remove_file(&src_path).await {
            Ok(()) => {
                tracing::debug!("prune: removed {:?}", &src_path);
                deleted += 1;
            }
            Err(error) => {
                tracing::warn!("prune: failed removing {:?}: {}", &src_path, error);
            }
        }
    }
    deleted
}
