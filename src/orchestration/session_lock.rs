use crate::shared::SessionId;
use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("session `{session_id}` is already running{}", holder_suffix(*.holder))]
    Busy {
        session_id: String,
        holder: Option<u32>,
    },
    #[error("session lock io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn holder_suffix(holder: Option<u32>) -> String {
    holder
        .map(|pid| format!(" in process {pid}"))
        .unwrap_or_default()
}

/// Exclusive per-session ownership. Runs inside this process are tracked in
/// memory; other processes are kept out by a `<session>.lock` file holding
/// the owner's pid. A lock file whose pid is no longer alive is reclaimed.
#[derive(Debug)]
pub struct SessionLocks {
    lock_dir: PathBuf,
    held: Mutex<HashSet<SessionId>>,
}

impl SessionLocks {
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
            held: Mutex::new(HashSet::new()),
        }
    }

    pub fn lock_path(&self, session_id: &SessionId) -> PathBuf {
        self.lock_dir.join(format!("{session_id}.lock"))
    }

    pub fn acquire(&self, session_id: &SessionId) -> Result<SessionGuard<'_>, LockError> {
        if !self.held().insert(session_id.clone()) {
            return Err(LockError::Busy {
                session_id: session_id.to_string(),
                holder: Some(std::process::id()),
            });
        }
        let path = self.lock_path(session_id);
        match reserve_lock_file(&path) {
            Ok(()) => Ok(SessionGuard {
                locks: self,
                session_id: session_id.clone(),
                path,
            }),
            Err(err) => {
                self.held().remove(session_id);
                Err(match err {
                    ReserveError::Held(holder) => LockError::Busy {
                        session_id: session_id.to_string(),
                        holder,
                    },
                    ReserveError::Io(source) => LockError::Io {
                        path: path.display().to_string(),
                        source,
                    },
                })
            }
        }
    }

    fn held(&self) -> std::sync::MutexGuard<'_, HashSet<SessionId>> {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases the session when dropped.
#[derive(Debug)]
pub struct SessionGuard<'a> {
    locks: &'a SessionLocks,
    session_id: SessionId,
    path: PathBuf,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to remove session lock");
            }
        }
        self.locks.held().remove(&self.session_id);
    }
}

enum ReserveError {
    Held(Option<u32>),
    Io(std::io::Error),
}

fn reserve_lock_file(path: &Path) -> Result<(), ReserveError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(ReserveError::Io)?;
    }
    for _ in 0..2 {
        match create_lock_file(path) {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => return Err(ReserveError::Io(err)),
        }
        let holder = read_lock_pid(path).map_err(ReserveError::Io)?;
        match holder {
            Some(pid) if pid == std::process::id() || is_process_alive(pid) => {
                return Err(ReserveError::Held(Some(pid)));
            }
            _ => {
                tracing::warn!(path = %path.display(), pid = ?holder, "reclaiming stale session lock");
                match fs::remove_file(path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => return Err(ReserveError::Io(err)),
                }
            }
        }
    }
    Err(ReserveError::Held(None))
}

fn create_lock_file(path: &Path) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(path)?;
    file.write_all(std::process::id().to_string().as_bytes())
}

fn read_lock_pid(path: &Path) -> std::io::Result<Option<u32>> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(raw.trim().parse::<u32>().ok()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    #[cfg(unix)]
    {
        use std::process::{Command, Stdio};

        Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_in_process_is_refused_until_release() {
        let dir = tempfile::tempdir().expect("tempdir");
        let locks = SessionLocks::new(dir.path());
        let id = SessionId::parse("locked").expect("session");

        let guard = locks.acquire(&id).expect("first");
        assert!(locks.lock_path(&id).is_file());
        assert!(matches!(locks.acquire(&id), Err(LockError::Busy { .. })));

        drop(guard);
        assert!(!locks.lock_path(&id).exists());
        locks.acquire(&id).expect("after release");
    }

    #[test]
    fn dead_owner_lock_is_reclaimed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let locks = SessionLocks::new(dir.path());
        let id = SessionId::parse("stale").expect("session");
        fs::write(locks.lock_path(&id), "0").expect("write stale lock");
        locks.acquire(&id).expect("reclaimed");
    }
}
