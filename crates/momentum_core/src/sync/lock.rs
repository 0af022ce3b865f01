//! Advisory per-path locks shared by every engine touching the same files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Registry {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

/// Cloneable registry; clones share the same lock set.
#[derive(Clone, Default)]
pub struct PathLocks {
    inner: Arc<Registry>,
}

/// Held lock; released on drop.
pub struct PathGuard {
    inner: Arc<Registry>,
    path: PathBuf,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires `path`, waiting at most `timeout`. `None` on timeout.
    pub fn acquire(&self, path: &Path, timeout: Duration) -> Option<PathGuard> {
        let deadline = Instant::now() + timeout;
        let mut held = lock_set(&self.inner.held);
        while held.contains(path) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            held = match self.inner.released.wait_timeout(held, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        held.insert(path.to_path_buf());
        Some(PathGuard {
            inner: Arc::clone(&self.inner),
            path: path.to_path_buf(),
        })
    }

    pub fn is_held(&self, path: &Path) -> bool {
        lock_set(&self.inner.held).contains(path)
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        lock_set(&self.inner.held).remove(&self.path);
        self.inner.released.notify_all();
    }
}

fn lock_set(mutex: &Mutex<HashSet<PathBuf>>) -> MutexGuard<'_, HashSet<PathBuf>> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::PathLocks;
    use std::path::Path;
    use std::time::Duration;

    #[test]
    fn second_acquire_times_out_until_release() {
        let locks = PathLocks::new();
        let shared = locks.clone();
        let path = Path::new("/notes/launch.md");

        let guard = locks
            .acquire(path, Duration::from_millis(10))
            .expect("first acquire");
        assert!(shared.acquire(path, Duration::from_millis(20)).is_none());
        assert!(shared
            .acquire(Path::new("/notes/other.md"), Duration::from_millis(20))
            .is_some());

        drop(guard);
        assert!(!locks.is_held(path));
        assert!(shared.acquire(path, Duration::from_millis(10)).is_some());
    }

    #[test]
    fn waiter_wakes_when_holder_releases() {
        let locks = PathLocks::new();
        let path = Path::new("/notes/launch.md");
        let guard = locks
            .acquire(path, Duration::from_millis(10))
            .expect("first acquire");

        let waiter = {
            let locks = locks.clone();
            std::thread::spawn(move || {
                locks
                    .acquire(Path::new("/notes/launch.md"), Duration::from_secs(5))
                    .is_some()
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        drop(guard);
        assert!(waiter.join().expect("waiter thread"));
    }
}
