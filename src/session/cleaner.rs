//! Session store cleanup
//!
//! The browser automation behind the provider keeps file handles on the session
//! directory for a moment after teardown. Removal retries only while the error
//! says the resource is busy; anything else aborts the attempt.

use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::utils::{RetryConfig, retry_with_check};

/// Filesystem operations the cleaner needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirRemover: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;
    async fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// [`DirRemover`] backed by `tokio::fs`.
pub struct FsRemover;

#[async_trait]
impl DirRemover for FsRemover {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_dir_all(path).await
    }
}

/// Whether an I/O error means "someone still holds this file".
pub fn is_busy_error(error: &io::Error) -> bool {
    if matches!(
        error.kind(),
        io::ErrorKind::ResourceBusy | io::ErrorKind::DirectoryNotEmpty
    ) {
        return true;
    }
    // EBUSY on unix; sharing/lock violations on Windows
    match error.raw_os_error() {
        Some(16) => cfg!(unix),
        Some(32) | Some(33) => cfg!(windows),
        _ => false,
    }
}

/// Removes the on-disk session store.
#[derive(Clone)]
pub struct StoreCleaner {
    remover: Arc<dyn DirRemover>,
}

impl Default for StoreCleaner {
    fn default() -> Self {
        Self::new(Arc::new(FsRemover))
    }
}

impl StoreCleaner {
    pub fn new(remover: Arc<dyn DirRemover>) -> Self {
        Self { remover }
    }

    /// Delete `path` recursively.
    ///
    /// Busy errors are retried up to `max_attempts` times, `delay` apart. A
    /// missing path counts as success and is never touched.
    pub async fn clean(&self, path: &Path, max_attempts: u32, delay: Duration) -> bool {
        if !self.remover.exists(path).await {
            tracing::debug!("Session store {} already absent", path.display());
            return true;
        }

        let remover = &self.remover;
        let result = retry_with_check(
            RetryConfig::new(max_attempts, delay),
            move |_| remover.remove_dir_all(path),
            is_busy_error,
        )
        .await;

        match result {
            Ok(()) => {
                tracing::info!("Removed session store {}", path.display());
                true
            }
            Err(e) if e.error.kind() == io::ErrorKind::NotFound => {
                // Raced with another remover
                true
            }
            Err(e) if e.exhausted => {
                tracing::error!(
                    "Session store {} still locked after {} attempt(s): {}",
                    path.display(),
                    e.attempts,
                    e.error
                );
                false
            }
            Err(e) => {
                tracing::error!("Failed to remove session store {}: {}", path.display(), e.error);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;
    use std::path::PathBuf;

    fn busy() -> io::Error {
        io::Error::new(io::ErrorKind::ResourceBusy, "EBUSY: resource busy or locked")
    }

    #[tokio::test]
    async fn test_missing_path_skips_removal() {
        let mut remover = MockDirRemover::new();
        remover.expect_exists().times(1).returning(|_| false);
        remover.expect_remove_dir_all().times(0);

        let cleaner = StoreCleaner::new(Arc::new(remover));
        assert!(cleaner.clean(Path::new("/nope"), 3, Duration::ZERO).await);
    }

    #[tokio::test]
    async fn test_busy_twice_then_success() {
        let mut seq = Sequence::new();
        let mut remover = MockDirRemover::new();
        remover.expect_exists().returning(|_| true);
        remover
            .expect_remove_dir_all()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(busy()));
        remover
            .expect_remove_dir_all()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let cleaner = StoreCleaner::new(Arc::new(remover));
        assert!(cleaner.clean(Path::new("/store"), 3, Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn test_busy_exhausts_attempts() {
        let mut remover = MockDirRemover::new();
        remover.expect_exists().returning(|_| true);
        remover
            .expect_remove_dir_all()
            .times(3)
            .returning(|_| Err(busy()));

        let cleaner = StoreCleaner::new(Arc::new(remover));
        assert!(!cleaner.clean(Path::new("/store"), 3, Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn test_other_errors_abort_immediately() {
        let mut remover = MockDirRemover::new();
        remover.expect_exists().returning(|_| true);
        remover
            .expect_remove_dir_all()
            .times(1)
            .returning(|_| Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied")));

        let cleaner = StoreCleaner::new(Arc::new(remover));
        assert!(!cleaner.clean(Path::new("/store"), 5, Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn test_real_directory_is_removed() {
        let dir = tempfile::TempDir::new().unwrap();
        let store: PathBuf = dir.path().join("session");
        std::fs::create_dir_all(store.join("Default/IndexedDB")).unwrap();
        std::fs::write(store.join("Default/Cookies"), b"x").unwrap();

        let cleaner = StoreCleaner::default();
        assert!(cleaner.clean(&store, 3, Duration::from_millis(1)).await);
        assert!(!store.exists());
        // Idempotent
        assert!(cleaner.clean(&store, 3, Duration::from_millis(1)).await);
    }

    #[test]
    fn test_busy_classification() {
        assert!(is_busy_error(&busy()));
        assert!(is_busy_error(&io::Error::from(io::ErrorKind::DirectoryNotEmpty)));
        assert!(!is_busy_error(&io::Error::from(io::ErrorKind::PermissionDenied)));
        #[cfg(unix)]
        assert!(is_busy_error(&io::Error::from_raw_os_error(16)));
    }
}
