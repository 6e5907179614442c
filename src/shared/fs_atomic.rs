use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static STAGE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Replaces `path` with `content` so readers see either the old document or
/// the new one. The bytes are staged in a hidden sibling and renamed into
/// place; a failed write leaves no staging file behind.
pub fn atomic_write_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .ok_or_else(|| std::io::Error::other(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(dir)?;

    let staged = StagedFile::create(dir, path, content)?;
    staged.commit(path)?;
    sync_dir(dir)
}

/// Uncommitted staging file, removed on drop.
struct StagedFile {
    path: PathBuf,
    committed: bool,
}

impl StagedFile {
    fn create(dir: &Path, target: &Path, content: &[u8]) -> std::io::Result<Self> {
        let stem = target
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("document");
        let seq = STAGE_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!(".{stem}.staged-{}-{seq}", std::process::id()));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)?;
        let staged = Self {
            path,
            committed: false,
        };
        file.write_all(content)?;
        file.sync_all()?;
        Ok(staged)
    }

    fn commit(mut self, target: &Path) -> std::io::Result<()> {
        fs::rename(&self.path, target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
