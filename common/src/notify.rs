use crate::invoke::CopyError;

/// Receives the terminal events of a replication task.
///
/// `failed` is called from the worker that ran the job, once per failed job and as soon
/// as it resolves. `finished` is called exactly once when the task stops.
pub trait Notifier: Send + Sync {
    fn failed(&self, error: &CopyError);
    fn finished(&self);
}

/// Notifier that only writes to the log. The task logs the failure itself at ERROR.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn failed(&self, error: &CopyError) {
        tracing::info!("notify: copy to {:?} failed", error.destination());
    }

    fn finished(&self) {
        tracing::info!("notify: replication finished");
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tracing_test::traced_test;

    use super::*;
    use crate::invoke::ErrorRecord;

    #[test]
    #[traced_test]
    fn failure_is_not_logged_twice() {
        let error = CopyError::Failed {
            destination: PathBuf::from("/mnt/share"),
            returncode: 8,
            records: vec![ErrorRecord {
                code: 5,
                action: "Copying File a.tif".to_string(),
                reason: "Access is denied.".to_string(),
            }],
        };
        LogNotifier.failed(&error);
        assert!(logs_contain("notify: copy to \"/mnt/share\" failed"));
        assert!(!logs_contain("Access is denied."));
        assert!(!logs_contain("ERROR"));
    }
}
