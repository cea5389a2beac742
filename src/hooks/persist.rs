//! File primitives shared by the context store, retry queue and event log
//!
//! Every shared file is rewritten through a temp file and a rename so readers
//! never observe partial data, and read-modify-write cycles hold a lock file
//! for the duration of the cycle.

use crate::hooks::{HookError, HookResult};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

/// How long to wait for a contended lock
pub const LOCK_WAIT: Duration = Duration::from_secs(2);

/// Locks older than this are assumed to belong to a dead process
pub const LOCK_STALE_AFTER: Duration = Duration::from_secs(10);

/// Pause between attempts on a contended lock
const LOCK_POLL: Duration = Duration::from_millis(20);

/// Held for the duration of a read-modify-write cycle; removes the lock file on drop
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Acquire `<target>.lock`, blocking the thread up to `wait`.
    ///
    /// For synchronous callers only; async code uses [`FileLock::acquire_async`].
    pub fn acquire(target: &Path, wait: Duration) -> HookResult<Self> {
        let path = lock_path(target);
        ensure_parent(&path)?;

        let start = Instant::now();
        loop {
            if let Some(lock) = Self::try_acquire(&path)? {
                return Ok(lock);
            }
            if start.elapsed() >= wait {
                return Err(HookError::LockTimeout(path));
            }
            thread::sleep(LOCK_POLL);
        }
    }

    /// Acquire `<target>.lock`, yielding to the runtime up to `wait`.
    ///
    /// A zero `wait` makes a single attempt.
    pub async fn acquire_async(target: &Path, wait: Duration) -> HookResult<Self> {
        let path = lock_path(target);
        ensure_parent(&path)?;

        let start = tokio::time::Instant::now();
        loop {
            if let Some(lock) = Self::try_acquire(&path)? {
                return Ok(lock);
            }
            if start.elapsed() >= wait {
                return Err(HookError::LockTimeout(path));
            }
            tokio::time::sleep(LOCK_POLL).await;
        }
    }

    /// One attempt; `None` while a live holder has the lock
    fn try_acquire(path: &Path) -> HookResult<Option<Self>> {
        for _ in 0..2 {
            match OpenOptions::new().create_new(true).write(true).open(path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Some(Self {
                        path: path.to_path_buf(),
                    }));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if !reclaim_stale_lock(path, LOCK_STALE_AFTER) {
                        return Ok(None);
                    }
                    debug!("Reclaimed stale lock {}", path.display());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

fn lock_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "state".into());
    name.push(".lock");
    target.with_file_name(name)
}

fn reclaim_stale_lock(path: &Path, stale_after: Duration) -> bool {
    let modified = match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(_) => return false,
    };
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);
    if age < stale_after {
        return false;
    }
    fs::remove_file(path).is_ok()
}

/// Create the parent directory of `path` if needed
pub fn ensure_parent(path: &Path) -> HookResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Replace `path` with `content` via a temp file and rename
pub fn write_atomic(path: &Path, content: &[u8]) -> HookResult<()> {
    if path.is_dir() {
        return Err(HookError::custom(format!(
            "destination '{}' is a directory",
            path.display()
        )));
    }
    ensure_parent(path)?;

    let temp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("state"),
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    );
    let temp_path = path.with_file_name(temp_name);

    fs::write(&temp_path, content)?;
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

/// Read a file, treating "not found" as `None`
pub fn read_optional(path: &Path) -> HookResult<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Append one line to a line-delimited file
pub fn append_line(path: &Path, line: &str) -> HookResult<()> {
    ensure_parent(path)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    file.write_all(buf.as_bytes())?;
    Ok(())
}
