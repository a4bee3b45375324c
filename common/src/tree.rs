//! Filetree comparison
//!
//! Every check here walks the *source* tree and looks the same relative path up in the
//! destination, so a destination is allowed to hold extra files. Two files count as
//! identical according to [`filecmp::content_equal`] (size and modification time).

use std::path::{Path, PathBuf};

use async_recursion::async_recursion;
use tracing::instrument;

use crate::error::FilesystemError;
use crate::filecmp;
use crate::filter::Exclusion;

#[async_recursion]
async fn walk_dir(
    root: &Path,
    relative: &Path,
    files: &mut Vec<PathBuf>,
) -> Result<(), FilesystemError> {
    let dir = root.join(relative);
    let mut entries = tokio::fs::read_dir(&dir)
        .await
        .map_err(|err| FilesystemError::new("opening directory", &dir, err))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| FilesystemError::new("traversing directory", &dir, err))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|err| FilesystemError::new("reading file type of", entry.path(), err))?;
        let entry_relative = relative.join(entry.file_name());
        if file_type.is_dir() {
            walk_dir(root, &entry_relative, files).await?;
        } else if file_type.is_file() {
            files.push(entry_relative);
        }
        // symlinks and special files are not part of the mirrored content
    }
    Ok(())
}

/// Relative paths of all regular files below `root`, in no particular order
#[instrument]
pub async fn list_files(root: &Path) -> Result<Vec<PathBuf>, FilesystemError> {
    let mut files = vec![];
    walk_dir(root, Path::new(""), &mut files).await?;
    Ok(files)
}

async fn metadata_if_exists(path: &Path) -> Result<Option<std::fs::Metadata>, FilesystemError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(Some(metadata)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(FilesystemError::new("reading metadata from", path, err)),
    }
}

/// Whether `dst` holds a file identical to `src`. A missing file on either side is
/// reported as `false`, not as an error.
#[instrument]
pub async fn is_identical(src: &Path, dst: &Path) -> Result<bool, FilesystemError> {
    let Some(src_metadata) = metadata_if_exists(src).await? else {
        return Ok(false);
    };
    let Some(dst_metadata) = metadata_if_exists(dst).await? else {
        return Ok(false);
    };
    Ok(filecmp::content_equal(&src_metadata, &dst_metadata))
}

/// True iff every non-excluded file of `source` exists under `destination` with equal
/// content. A destination that does not exist is never a subset, even for an empty source.
#[instrument(skip(exclusion))]
pub async fn is_subset(
    source: &Path,
    destination: &Path,
    exclusion: &Exclusion,
) -> Result<bool, FilesystemError> {
    match metadata_if_exists(destination).await? {
        Some(metadata) if metadata.is_dir() => {}
        _ => {
            tracing::debug!("destination {:?} is not a directory", destination);
            return Ok(false);
        }
    }
    for relative in list_files(source).await? {
        if exclusion.is_excluded(&relative) {
            continue;
        }
        let src_path = source.join(&relative);
        let dst_path = destination.join(&relative);
        if metadata_if_exists(&src_path).await?.is_none() {
            // removed from the source while we were walking it
            continue;
        }
        if !is_identical(&src_path, &dst_path).await? {
            tracing::debug!("{:?} differs from {:?}", &dst_path, &src_path);
            return Ok(false);
        }
    }
    Ok(true)
}

/// Number of regular files below `tree`
#[instrument]
pub async fn count_files(tree: &Path) -> Result<u64, FilesystemError> {
    let count = list_files(tree).await?.len();
    Ok(count as u64)
}

/// Number of non-excluded files of `source` that have an identical copy in `destination`
#[instrument(skip(exclusion))]
pub async fn count_identical(
    source: &Path,
    destination: &Path,
    exclusion: &Exclusion,
) -> Result<u64, FilesystemError> {
    let mut identical = 0;
    for relative in list_files(source).await? {
        if exclusion.is_excluded(&relative) {
            continue;
        }
        if is_identical(&source.join(&relative), &destination.join(&relative)).await? {
            identical += 1;
        }
    }
    Ok(identical)
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::testutils;

    fn tmp() -> Exclusion {
        Exclusion::from_suffix("tmp").unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn literal_copy_is_subset_for_any_suffix() -> anyhow::Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let (src, dst) = (tmp_dir.join("src"), tmp_dir.join("dst"));
        testutils::mirror_tree(&src, &dst, &Exclusion::none())?;
        for suffix in ["", "tmp", "txt", "dat"] {
            let exclusion = Exclusion::from_suffix(suffix)?;
            assert!(is_subset(&src, &dst, &exclusion).await?, "suffix {suffix:?}");
            // and the other way around, the trees are the same
            assert!(is_subset(&dst, &src, &exclusion).await?, "suffix {suffix:?}");
        }
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn missing_file_breaks_subset() -> anyhow::Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let (src, dst) = (tmp_dir.join("src"), tmp_dir.join("dst"));
        testutils::mirror_tree(&src, &dst, &Exclusion::none())?;
        tokio::fs::remove_file(dst.join("bar").join("2.txt")).await?;
        assert!(!is_subset(&src, &dst, &tmp()).await?);
        assert!(!is_subset(&src, &dst, &Exclusion::none()).await?);
        // the destination still holds everything that is left in it
        assert!(is_subset(&dst, &src, &tmp()).await?);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn modified_file_breaks_subset() -> anyhow::Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let (src, dst) = (tmp_dir.join("src"), tmp_dir.join("dst"));
        testutils::mirror_tree(&src, &dst, &Exclusion::none())?;
        tokio::fs::write(dst.join("0.txt"), "changed").await?;
        assert!(!is_subset(&src, &dst, &tmp()).await?);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn excluded_files_do_not_matter() -> anyhow::Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let (src, dst) = (tmp_dir.join("src"), tmp_dir.join("dst"));
        testutils::mirror_tree(&src, &dst, &Exclusion::none())?;
        tokio::fs::write(src.join("bar").join("x.tmp"), "partial").await?;
        assert!(is_subset(&src, &dst, &tmp()).await?);
        assert!(!is_subset(&src, &dst, &Exclusion::none()).await?);
        Ok(())
    }

    #[tokio::test]
    async fn missing_destination_is_not_a_subset() -> anyhow::Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let empty = tmp_dir.join("empty");
        tokio::fs::create_dir(&empty).await?;
        assert!(!is_subset(&tmp_dir.join("src"), &tmp_dir.join("nope"), &tmp()).await?);
        assert!(!is_subset(&empty, &tmp_dir.join("nope"), &tmp()).await?);
        assert!(is_subset(&empty, &tmp_dir.join("src"), &tmp()).await?);
        Ok(())
    }

    #[tokio::test]
    async fn counting() -> anyhow::Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let (src, dst) = (tmp_dir.join("src"), tmp_dir.join("dst"));
        assert_eq!(count_files(&src).await?, 3);
        tokio::fs::create_dir(&dst).await?;
        assert_eq!(count_identical(&src, &dst, &Exclusion::none()).await?, 0);
        testutils::mirror_tree(&src, &dst, &Exclusion::none())?;
        assert_eq!(
            count_identical(&src, &dst, &Exclusion::none()).await?,
            count_files(&src).await?
        );
        tokio::fs::write(src.join("3.tmp"), "partial").await?;
        tokio::fs::remove_file(dst.join("0.txt")).await?;
        assert_eq!(count_files(&src).await?, 4);
        let identical = count_identical(&src, &dst, &tmp()).await?;
        assert_eq!(identical, 2);
        assert!(identical <= count_files(&src).await?);
        Ok(())
    }

    #[tokio::test]
    async fn counting_missing_tree_fails() {
        let err = count_files(Path::new("/nonexistent/rmirror/tree"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
