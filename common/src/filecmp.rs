use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::instrument;

fn since_epoch(time: SystemTime) -> (i128, u32) {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => (i128::from(elapsed.as_secs()), elapsed.subsec_nanos()),
        Err(err) => {
            // pre-epoch timestamps, keep them totally ordered
            let before: Duration = err.duration();
            (-i128::from(before.as_secs()), before.subsec_nanos())
        }
    }
}

fn mtime_equal(time1: SystemTime, time2: SystemTime) -> bool {
    let (secs1, nsec1) = since_epoch(time1);
    let (secs2, nsec2) = since_epoch(time2);
    if secs1 != secs2 {
        return false;
    }
    // some filesystems do not support nanosecond precision, so we only compare nanoseconds if both files have them
    nsec1 == 0 || nsec2 == 0 || nsec1 == nsec2
}

/// Content equality used by the subset check, the identical-file count and the pruner:
/// both entries are regular files of the same size and modification time.
#[instrument]
pub fn content_equal(metadata1: &std::fs::Metadata, metadata2: &std::fs::Metadata) -> bool {
    if !metadata1.is_file() || !metadata2.is_file() {
        return false;
    }
    if metadata1.len() != metadata2.len() {
        return false;
    }
    match (metadata1.modified(), metadata2.modified()) {
        (Ok(time1), Ok(time2)) => mtime_equal(time1, time2),
        // without timestamps there is no way to rule out a false positive
        _ => false,
    }
}
