//! Crash-safe vault file IO: advisory locking, write-temp/fsync/rename, and
//! a `.backup` copy of whatever was previously on disk (spec §4.9, §6.3).
//! Lifted nearly verbatim from the corpus's `vault/io.rs` writer, with a
//! backup-before-rename step added for the multi-user format's stronger
//! durability requirement.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Error)]
pub enum AtomicWriteError {
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("failed to write backup file")]
    BackupFailed,
}

#[derive(Debug)]
pub struct VaultLock {
    #[allow(dead_code)]
    file: File,
}

impl VaultLock {
    pub fn acquire(lock_path: &Path, mode: LockMode) -> Result<Self, AtomicWriteError> {
        ensure_parent_dir(lock_path)?;

        #[cfg(unix)]
        let file = OpenOptions::new().read(true).write(true).create(true).mode(0o600).open(lock_path)?;
        #[cfg(not(unix))]
        let file = OpenOptions::new().read(true).write(true).create(true).open(lock_path)?;

        set_permissions_0600(lock_path)?;
        lock_file(&file, mode)?;
        Ok(Self { file })
    }
}

pub fn lock_path_for(vault_path: &Path) -> PathBuf {
    let mut p = vault_path.as_os_str().to_os_string();
    p.push(".lock");
    PathBuf::from(p)
}

pub fn backup_path_for(vault_path: &Path, suffix: &str) -> PathBuf {
    let mut p = vault_path.as_os_str().to_os_string();
    p.push(suffix);
    PathBuf::from(p)
}

pub fn read_bytes(vault_path: &Path) -> Result<Vec<u8>, AtomicWriteError> {
    let _lock = VaultLock::acquire(&lock_path_for(vault_path), LockMode::Shared)?;
    let mut file = File::open(vault_path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Write `bytes` to `vault_path`, backing up whatever file was previously
/// there to `<vault_path><backup_suffix>` before the rename lands. The
/// backup step runs under the same exclusive lock as the write so a crash
/// mid-backup never races a concurrent writer.
pub fn write_bytes_atomic(vault_path: &Path, bytes: &[u8], backup_suffix: &str) -> Result<(), AtomicWriteError> {
    let _lock = VaultLock::acquire(&lock_path_for(vault_path), LockMode::Exclusive)?;
    ensure_parent_dir(vault_path)?;

    if vault_path.exists() {
        let backup_path = backup_path_for(vault_path, backup_suffix);
        fs::copy(vault_path, &backup_path).map_err(|_| AtomicWriteError::BackupFailed)?;
        set_permissions_0600(&backup_path)?;
    }

    let dir = vault_path.parent().expect("ensure_parent_dir already validated this");
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;

    tmp.as_file_mut().write_all(bytes)?;
    tmp.as_file_mut().sync_all()?;

    #[cfg(unix)]
    tmp.as_file().set_permissions(fs::Permissions::from_mode(0o600))?;

    let _persisted = tmp.persist(vault_path).map_err(std::io::Error::from)?;
    set_permissions_0600(vault_path)?;
    fsync_dir(dir)?;
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<(), AtomicWriteError> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    Ok(())
}

fn set_permissions_0600(path: &Path) -> Result<(), AtomicWriteError> {
    #[cfg(unix)]
    {
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

fn fsync_dir(dir: &Path) -> Result<(), AtomicWriteError> {
    #[cfg(unix)]
    {
        let file = File::open(dir)?;
        file.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

fn lock_file(file: &File, mode: LockMode) -> Result<(), AtomicWriteError> {
    #[cfg(unix)]
    unsafe {
        let op = match mode {
            LockMode::Shared => libc::LOCK_SH,
            LockMode::Exclusive => libc::LOCK_EX,
        };
        let rc = libc::flock(file.as_raw_fd(), op);
        if rc == 0 {
            return Ok(());
        }
        return Err(AtomicWriteError::Io(std::io::Error::last_os_error()));
    }
    #[cfg(not(unix))]
    {
        let _ = (file, mode);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_is_atomic_and_backs_up_prior_contents() {
        let dir = tempfile::tempdir().unwrap();
        let vault_path = dir.path().join("vault.twlt");

        write_bytes_atomic(&vault_path, b"first", ".backup").unwrap();
        assert!(!backup_path_for(&vault_path, ".backup").exists());

        write_bytes_atomic(&vault_path, b"second", ".backup").unwrap();
        let backup = backup_path_for(&vault_path, ".backup");
        assert_eq!(fs::read(&backup).unwrap(), b"first");
        assert_eq!(fs::read(&vault_path).unwrap(), b"second");
    }

    #[test]
    fn permissions_are_restrictive() {
        let dir = tempfile::tempdir().unwrap();
        let vault_path = dir.path().join("vault.twlt");
        write_bytes_atomic(&vault_path, b"data", ".backup").unwrap();

        #[cfg(unix)]
        {
            let mode = fs::metadata(&vault_path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }
}
