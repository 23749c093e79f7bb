//! Locking and atomic writes for ideaflow
//!
//! Two layers serialize state transitions for a task:
//! - [`TaskLocks`]: in-process per-task exclusion (threads of one process)
//! - [`FileLock`]: advisory file lock (fs2/flock) for separate processes
//!
//! Both guards release on drop, so every exit path (including `?` returns)
//! gives the task back.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{Error, Result};
use crate::task::TaskId;

/// Default lock timeout in milliseconds
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

/// Default retry interval when waiting for a lock
const LOCK_RETRY_INTERVAL_MS: u64 = 50;

fn is_lock_contended(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }

    // On Windows, fs2/libc can surface lock/sharing violations as "Other".
    #[cfg(windows)]
    {
        matches!(err.raw_os_error(), Some(32) | Some(33))
    }
    #[cfg(not(windows))]
    {
        false
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    Ok(file)
}

/// A file lock guard that releases the lock when dropped
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Acquire an exclusive lock on a file with timeout
    ///
    /// The lock file is created if missing.
    pub fn acquire(path: impl AsRef<Path>, timeout_ms: u64) -> Result<Self> {
        let path = path.as_ref();
        let file = open_lock_file(path)?;

        let start = Instant::now();
        let timeout = Duration::from_millis(timeout_ms);
        let retry_interval = Duration::from_millis(LOCK_RETRY_INTERVAL_MS);

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(FileLock { file }),
                Err(e) if is_lock_contended(&e) => {
                    if start.elapsed() >= timeout {
                        return Err(Error::LockFailed(path.to_path_buf()));
                    }
                    std::thread::sleep(retry_interval);
                }
                Err(e) => {
                    return Err(Error::Io(e));
                }
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Atomically write data to a file
///
/// Writes a temp file in the same directory, then renames it over the
/// target, so readers see either the old or the new contents.
///
/// Does NOT acquire a lock.
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension(format!(
        "{}.tmp.{}",
        path.extension().and_then(|e| e.to_str()).unwrap_or(""),
        std::process::id()
    ));

    let mut temp_file = File::create(&temp_path)?;
    temp_file.write_all(data)?;
    temp_file.sync_all()?;
    drop(temp_file);

    fs::rename(&temp_path, path)?;

    Ok(())
}

/// In-process per-task mutual exclusion.
///
/// Tasks currently held are kept in a busy set; waiters park on a condvar
/// until the holder's guard drops. Different tasks never block each other.
#[derive(Debug, Default)]
pub struct TaskLocks {
    busy: Mutex<HashSet<TaskId>>,
    released: Condvar,
}

impl TaskLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn busy(&self) -> MutexGuard<'_, HashSet<TaskId>> {
        self.busy.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until `task_id` is free, then hold it until the guard drops.
    pub fn acquire(&self, task_id: TaskId) -> TaskLockGuard<'_> {
        let mut busy = self.busy();
        while busy.contains(&task_id) {
            busy = self
                .released
                .wait(busy)
                .unwrap_or_else(|e| e.into_inner());
        }
        busy.insert(task_id);
        TaskLockGuard {
            locks: self,
            task_id,
        }
    }

}

/// Guard for one task's exclusive section.
#[derive(Debug)]
pub struct TaskLockGuard<'a> {
    locks: &'a TaskLocks,
    task_id: TaskId,
}

impl Drop for TaskLockGuard<'_> {
    fn drop(&mut self) {
        self.locks.busy().remove(&self.task_id);
        self.locks.released.notify_all();
    }
}

/// Exclusive section handed out by a persistence backend.
///
/// Holds the in-process guard and, for file-backed stores, the cross-process
/// file lock.
#[derive(Debug)]
pub struct TaskGuard<'a> {
    _file: Option<FileLock>,
    _process: TaskLockGuard<'a>,
}

impl<'a> TaskGuard<'a> {
    pub fn in_process(process: TaskLockGuard<'a>) -> Self {
        Self {
            _file: None,
            _process: process,
        }
    }

    pub fn with_file(process: TaskLockGuard<'a>, file: FileLock) -> Self {
        Self {
            _file: Some(file),
            _process: process,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn file_lock_times_out_until_released() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("state.lock");

        let lock = FileLock::acquire(&lock_path, 1000).unwrap();
        assert!(lock_path.exists());
        let result = FileLock::acquire(&lock_path, 50);
        assert!(matches!(result, Err(Error::LockFailed(_))));

        drop(lock);
        assert!(FileLock::acquire(&lock_path, 50).is_ok());
    }

    #[test]
    fn test_atomic_write() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.txt");

        write_atomic(&file_path, b"Hello, World!").unwrap();
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "Hello, World!");

        write_atomic(&file_path, b"Updated!").unwrap();
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "Updated!");
    }

    #[test]
    fn task_lock_is_per_task() {
        let locks = Arc::new(TaskLocks::new());
        let first = locks.acquire(1);

        let other = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || drop(locks.acquire(2)))
        };
        other.join().unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                let _guard = locks.acquire(1);
                tx.send(()).unwrap();
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        drop(first);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn stress_single_task_holder() {
        let locks = Arc::new(TaskLocks::new());
        let threads = 12;
        let barrier = Arc::new(Barrier::new(threads));
        let in_lock = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(threads);
        for _ in 0..threads {
            let locks = Arc::clone(&locks);
            let barrier = Arc::clone(&barrier);
            let in_lock = Arc::clone(&in_lock);
            let max_concurrent = Arc::clone(&max_concurrent);

            handles.push(thread::spawn(move || {
                barrier.wait();
                let _guard = locks.acquire(7);
                let current = in_lock.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = max_concurrent.fetch_max(current, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
                in_lock.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
        drop(locks.acquire(7));
    }
}
