use std::path::PathBuf;

use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, System};

/// File-based single instance lock
///
/// The lock file holds the owning PID. A file left behind by a process that
/// is no longer alive is reclaimed, so a crash never wedges the next
/// launch. Acquisition trouble is reported as "already running" rather than
/// an error; this mirrors the conservative behavior users expect from a
/// background utility.
pub struct InstanceLock {
    path: PathBuf,
    acquired: bool,
}

impl InstanceLock {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            acquired: false,
        }
    }

    /// Attempts to acquire the lock without blocking
    ///
    /// Returns `false` when another live process holds it.
    pub fn acquire(&mut self) -> bool {
        if self.acquired {
            return true;
        }

        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                if let Ok(pid) = contents.trim().parse::<u32>() {
                    if pid != std::process::id() && process_alive(pid) {
                        tracing::debug!("lock file {} held by live pid {}", self.path.display(), pid);
                        return false;
                    }
                }
                tracing::info!("reclaiming stale lock file at {}", self.path.display());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!("could not read lock file: {}", e);
                return false;
            }
        }

        match std::fs::write(&self.path, std::process::id().to_string()) {
            Ok(()) => {
                self.acquired = true;
                true
            }
            Err(e) => {
                tracing::warn!("could not write lock file: {}", e);
                false
            }
        }
    }

    /// Releases the lock; safe to call repeatedly
    pub fn release(&mut self) {
        if !self.acquired {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("could not remove lock file: {}", e);
        }
        self.acquired = false;
    }

    /// Whether this instance currently holds the lock
    pub fn is_locked(&self) -> bool {
        self.acquired
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn process_alive(pid: u32) -> bool {
    let system =
        System::new_with_specifics(RefreshKind::new().with_processes(ProcessRefreshKind::new()));
    system.process(Pid::from_u32(pid)).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("unidle.lock");

        let mut lock = InstanceLock::new(path.clone());
        assert!(!lock.is_locked());
        assert!(lock.acquire());
        assert!(lock.is_locked());
        assert!(path.exists());

        lock.release();
        assert!(!lock.is_locked());
        assert!(!path.exists());
    }

    #[test]
    fn test_acquire_is_idempotent_for_the_holder() {
        let temp_dir = TempDir::new().expect("temp dir");
        let mut lock = InstanceLock::new(temp_dir.path().join("unidle.lock"));

        assert!(lock.acquire());
        assert!(lock.acquire());
    }

    #[test]
    fn test_lock_held_by_live_process_is_refused() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("unidle.lock");

        // PID 1 is always alive and never us.
        std::fs::write(&path, "1").expect("write");

        let mut lock = InstanceLock::new(path);
        assert!(!lock.acquire());
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("unidle.lock");

        // A PID far above any real process table.
        std::fs::write(&path, "4000000000").expect("write");

        let mut lock = InstanceLock::new(path);
        assert!(lock.acquire());
    }

    #[test]
    fn test_garbage_lock_content_is_reclaimed() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("unidle.lock");
        std::fs::write(&path, "not a pid").expect("write");

        let mut lock = InstanceLock::new(path);
        assert!(lock.acquire());
    }

    #[test]
    fn test_release_on_drop() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("unidle.lock");

        {
            let mut lock = InstanceLock::new(path.clone());
            assert!(lock.acquire());
        }
        assert!(!path.exists());
    }
}
