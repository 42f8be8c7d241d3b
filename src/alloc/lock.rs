use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use tracing::{debug, warn};

use crate::Result;

/// Exclusive advisory lock on `<lock dir>/<port>.lock`.
///
/// Held for the lifetime of the value and released on drop. The lock file
/// itself is left behind; only the OS lock matters.
#[derive(Debug)]
pub struct PortLock {
    port: u16,
    path: PathBuf,
    file: File,
}

impl PortLock {
    /// Try to take the lock for `port` without blocking.
    ///
    /// Returns `Ok(None)` when another holder has it.
    pub fn try_acquire(dir: &Path, port: u16) -> Result<Option<Self>> {
        fs::create_dir_all(dir)?;
        let path = lock_path(dir, port);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                // holder info for humans only
                let _ = file.set_len(0);
                let _ = writeln!(file, "{} {}", std::process::id(), Utc::now().to_rfc3339());
                debug!(port, path = %path.display(), "acquired port lock");
                Ok(Some(Self { port, path, file }))
            }
            Err(e) if is_contended(&e) => {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                debug!(port, holder = holder.trim(), "port lock held elsewhere");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(self) -> Result<()> {
        FileExt::unlock(&self.file)?;
        debug!(port = self.port, "released port lock");
        Ok(())
    }
}

impl Drop for PortLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(port = self.port, error = %e, "failed to unlock port lock");
        }
    }
}

pub fn lock_path(dir: &Path, port: u16) -> PathBuf {
    dir.join(format!("{port}.lock"))
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let lock = PortLock::try_acquire(dir.path(), 3000).unwrap().unwrap();
        assert_eq!(lock.port(), 3000);
        assert_eq!(lock.path(), dir.path().join("3000.lock"));

        assert!(PortLock::try_acquire(dir.path(), 3000).unwrap().is_none());
        assert!(PortLock::try_acquire(dir.path(), 3001).unwrap().is_some());
    }

    #[test]
    fn test_release_allows_reacquire() {
        let dir = tempdir().unwrap();
        let lock = PortLock::try_acquire(dir.path(), 4000).unwrap().unwrap();
        lock.release().unwrap();
        assert!(PortLock::try_acquire(dir.path(), 4000).unwrap().is_some());
    }

    #[test]
    fn test_drop_releases_and_keeps_file() {
        let dir = tempdir().unwrap();
        {
            let _lock = PortLock::try_acquire(dir.path(), 4001).unwrap().unwrap();
        }
        assert!(dir.path().join("4001.lock").exists());
        assert!(PortLock::try_acquire(dir.path(), 4001).unwrap().is_some());
    }

    #[test]
    fn test_lock_file_records_holder() {
        let dir = tempdir().unwrap();
        let _lock = PortLock::try_acquire(dir.path(), 4002).unwrap().unwrap();
        let contents = fs::read_to_string(dir.path().join("4002.lock")).unwrap();
        let pid = contents.split_whitespace().next().unwrap();
        assert_eq!(pid, std::process::id().to_string());
    }

    #[test]
    fn test_creates_missing_lock_dir() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        assert!(PortLock::try_acquire(&nested, 5000).unwrap().is_some());
        assert!(nested.is_dir());
    }
}
