//! Advisory locking for documents and the audit ledger.
//!
//! Stores only see the [`Lock`] trait. [`FileLock`] takes `fs2` advisory locks
//! on a sentinel file so cooperating processes serialize; [`MemoryLock`] gives
//! the same contract inside one process.
//!
//! Acquisition is always non-blocking first. On contention the caller polls
//! with exponential backoff plus jitter until the timeout runs out, then gets
//! [`TeamError::LockTimeout`].

use fs2::FileExt;
use rand::Rng;
use std::fs::File;
use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

use crate::error::Result;
use crate::error::TeamError;

// =============================================================================
// Lock trait
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// A cooperative lock with bounded acquisition.
pub trait Lock: Send + Sync {
    /// Acquire in `mode`, giving up once `timeout` has elapsed.
    fn acquire(&self, mode: LockMode, timeout: Duration) -> Result<LockGuard>;

    /// Path (or label) used in error messages.
    fn path(&self) -> &Path;
}

/// The release half of a held lock.
pub trait LockRelease: Send {
    fn release(&mut self) -> std::io::Result<()>;
}

/// A held lock. Released by [`LockGuard::release`] or on drop.
pub struct LockGuard {
    held: Option<Box<dyn LockRelease>>,
    mode: LockMode,
    path: PathBuf,
}

impl LockGuard {
    pub fn new(mode: LockMode, path: impl Into<PathBuf>, held: Box<dyn LockRelease>) -> Self {
        Self {
            held: Some(held),
            mode,
            path: path.into(),
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Release now and surface any unlock error.
    pub fn release(mut self) -> Result<()> {
        match self.held.take() {
            Some(mut held) => held.release().map_err(|e| TeamError::io(&self.path, e)),
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(mut held) = self.held.take()
            && let Err(e) = held.release()
        {
            tracing::warn!(path = %self.path.display(), error = %e, "lock_release_failed");
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("mode", &self.mode)
            .field("path", &self.path)
            .field("held", &self.held.is_some())
            .finish()
    }
}

// =============================================================================
// Polling backoff
// =============================================================================

/// Sleep schedule between contended acquisition attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct PollBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(250),
            multiplier: 2.0,
            jitter_factor: 0.25,
        }
    }
}

impl PollBackoff {
    fn next(&self, current: Duration) -> Duration {
        let grown = current.as_millis() as f64 * self.multiplier.max(1.0);
        Duration::from_millis(grown as u64).min(self.max)
    }
}

fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }
    let jitter = rand::rng().random_range(-jitter_factor..=jitter_factor);
    let jittered_ms = (duration.as_millis() as f64 * (1.0 + jitter)).max(1.0) as u64;
    Duration::from_millis(jittered_ms)
}

/// Call `attempt` until it returns `Ok(true)` or the timeout runs out.
fn poll_until(
    path: &Path,
    timeout: Duration,
    backoff: &PollBackoff,
    mut attempt: impl FnMut() -> std::io::Result<bool>,
) -> Result<()> {
    let started = Instant::now();
    let mut delay = backoff.initial;
    loop {
        if attempt().map_err(|e| TeamError::io(path, e))? {
            return Ok(());
        }
        let waited = started.elapsed();
        if waited >= timeout {
            tracing::warn!(path = %path.display(), waited_ms = waited.as_millis() as u64, "lock_timeout");
            return Err(TeamError::LockTimeout {
                path: path.to_path_buf(),
                waited,
            });
        }
        let remaining = timeout - waited;
        std::thread::sleep(apply_jitter(delay, backoff.jitter_factor).min(remaining));
        delay = backoff.next(delay);
    }
}

// =============================================================================
// FileLock - advisory OS lock on a sentinel file
// =============================================================================

/// Advisory lock on a dedicated lock file. The file is created on first use
/// and never read or written.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
    backoff: PollBackoff,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backoff: PollBackoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: PollBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    fn open(&self) -> Result<File> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| TeamError::io(parent, e))?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| TeamError::io(&self.path, e))
    }
}

struct HeldFile {
    file: File,
}

impl LockRelease for HeldFile {
    fn release(&mut self) -> std::io::Result<()> {
        FileExt::unlock(&self.file)
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Lock for FileLock {
    fn acquire(&self, mode: LockMode, timeout: Duration) -> Result<LockGuard> {
        let file = self.open()?;
        poll_until(&self.path, timeout, &self.backoff, || {
            let attempt = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&file),
                LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
            };
            match attempt {
                Ok(()) => Ok(true),
                Err(e) if is_contended(&e) => Ok(false),
                Err(e) => Err(e),
            }
        })?;
        tracing::trace!(path = %self.path.display(), ?mode, "lock_acquired");
        Ok(LockGuard::new(mode, &self.path, Box::new(HeldFile { file })))
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

// =============================================================================
// MemoryLock - in-process reader/writer lock
// =============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    readers: usize,
    writer: bool,
}

impl MemoryState {
    fn try_take(&mut self, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared if !self.writer => {
                self.readers += 1;
                true
            }
            LockMode::Exclusive if !self.writer && self.readers == 0 => {
                self.writer = true;
                true
            }
            _ => false,
        }
    }
}

type SharedState = Arc<(Mutex<MemoryState>, Condvar)>;

/// Reader/writer lock that lives in memory. Lets multi-threaded tests drive
/// the same store logic without touching OS lock primitives.
#[derive(Debug, Clone)]
pub struct MemoryLock {
    label: PathBuf,
    state: SharedState,
}

impl MemoryLock {
    pub fn new(label: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            state: Arc::new((Mutex::new(MemoryState::default()), Condvar::new())),
        }
    }
}

struct HeldMemory {
    state: SharedState,
    mode: LockMode,
}

impl LockRelease for HeldMemory {
    fn release(&mut self) -> std::io::Result<()> {
        let (mutex, cvar) = &*self.state;
        let mut state = mutex.lock().unwrap_or_else(PoisonError::into_inner);
        match self.mode {
            LockMode::Shared => state.readers = state.readers.saturating_sub(1),
            LockMode::Exclusive => state.writer = false,
        }
        cvar.notify_all();
        Ok(())
    }
}

impl Lock for MemoryLock {
    fn acquire(&self, mode: LockMode, timeout: Duration) -> Result<LockGuard> {
        let started = Instant::now();
        let (mutex, cvar) = &*self.state;
        let mut state = mutex.lock().unwrap_or_else(PoisonError::into_inner);
        while !state.try_take(mode) {
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(TeamError::LockTimeout {
                    path: self.label.clone(),
                    waited,
                });
            }
            let (next, _) = cvar
                .wait_timeout(state, timeout - waited)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
        drop(state);
        Ok(LockGuard::new(
            mode,
            &self.label,
            Box::new(HeldMemory {
                state: Arc::clone(&self.state),
                mode,
            }),
        ))
    }

    fn path(&self) -> &Path {
        &self.label
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn fast() -> PollBackoff {
        PollBackoff {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(5),
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn exclusive_file_lock_times_out_while_held() {
        let dir = TempDir::new().unwrap();
        let lock = FileLock::new(dir.path().join("p.lock")).with_backoff(fast());

        let held = lock
            .acquire(LockMode::Exclusive, Duration::from_millis(50))
            .unwrap();
        let err = lock
            .acquire(LockMode::Exclusive, Duration::from_millis(30))
            .unwrap_err();
        assert!(matches!(err, TeamError::LockTimeout { .. }));

        held.release().unwrap();
        lock.acquire(LockMode::Exclusive, Duration::from_millis(30))
            .unwrap();
    }

    #[test]
    fn shared_file_locks_coexist() {
        let dir = TempDir::new().unwrap();
        let lock = FileLock::new(dir.path().join("p.lock")).with_backoff(fast());

        let a = lock.acquire(LockMode::Shared, Duration::from_millis(30)).unwrap();
        let b = lock.acquire(LockMode::Shared, Duration::from_millis(30)).unwrap();
        assert_eq!(a.mode(), LockMode::Shared);
        assert!(
            lock.acquire(LockMode::Exclusive, Duration::from_millis(20))
                .is_err()
        );
        drop(a);
        drop(b);
        lock.acquire(LockMode::Exclusive, Duration::from_millis(30))
            .unwrap();
    }

    #[test]
    fn file_lock_creates_missing_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("p.lock");
        let lock = FileLock::new(&path);
        lock.acquire(LockMode::Exclusive, Duration::from_millis(10))
            .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn memory_lock_waiter_wakes_on_release() {
        let lock = Arc::new(MemoryLock::new("mem"));
        let held = lock
            .acquire(LockMode::Exclusive, Duration::from_millis(10))
            .unwrap();

        let waiter = {
            let lock = Arc::clone(&lock);
            std::thread::spawn(move || {
                lock.acquire(LockMode::Shared, Duration::from_secs(5))
                    .map(|g| g.mode())
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        drop(held);

        assert_eq!(waiter.join().unwrap().unwrap(), LockMode::Shared);
    }

    #[test]
    fn memory_lock_reports_timeout_with_label() {
        let lock = MemoryLock::new("project.lock");
        let _reader = lock.acquire(LockMode::Shared, Duration::ZERO).unwrap();
        match lock.acquire(LockMode::Exclusive, Duration::from_millis(5)) {
            Err(TeamError::LockTimeout { path, .. }) => {
                assert_eq!(path, PathBuf::from("project.lock"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn backoff_grows_to_cap() {
        let backoff = PollBackoff {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(35),
            multiplier: 2.0,
            jitter_factor: 0.0,
        };
        let second = backoff.next(backoff.initial);
        let third = backoff.next(second);
        assert_eq!(second, Duration::from_millis(20));
        assert_eq!(third, Duration::from_millis(35));
        assert_eq!(apply_jitter(third, 0.0), third);
    }
}
