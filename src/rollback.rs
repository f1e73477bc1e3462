use std::path::PathBuf;

use tokio::fs;

#[derive(Debug)]
enum Created {
    File(PathBuf),
    /// Only removed while empty.
    Dir(PathBuf),
}

/// Filesystem entries created by an operation that has not succeeded yet.
///
/// Call [`Rollback::commit`] once the operation succeeds, or
/// [`Rollback::unwind`] to remove everything in reverse creation order. A
/// rollback dropped without either unwinds synchronously.
#[derive(Debug, Default)]
pub struct Rollback {
    created: Vec<Created>,
}

impl Rollback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(&mut self, path: impl Into<PathBuf>) {
        self.created.push(Created::File(path.into()));
    }

    pub fn dir(&mut self, path: impl Into<PathBuf>) {
        self.created.push(Created::Dir(path.into()));
    }

    /// Keeps everything created so far.
    pub fn commit(mut self) {
        self.created.clear();
    }

    pub async fn unwind(mut self) {
        while let Some(entry) = self.created.pop() {
            let result = match &entry {
                Created::File(path) => fs::remove_file(path).await,
                Created::Dir(path) => fs::remove_dir(path).await,
            };
            log_failure(&entry, result);
        }
    }
}

impl Drop for Rollback {
    fn drop(&mut self) {
        while let Some(entry) = self.created.pop() {
            let result = match &entry {
                Created::File(path) => std::fs::remove_file(path),
                Created::Dir(path) => std::fs::remove_dir(path),
            };
            log_failure(&entry, result);
        }
    }
}

fn log_failure(entry: &Created, result: std::io::Result<()>) {
    match result {
        Ok(()) => tracing::debug!(?entry, "rolled back"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => tracing::error!(?entry, error = %err, "rollback failed"),
    }
}
