use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Snapshot of `versions/<id>/` taken before a (re)install. The previous
/// directory sits in `backups/<id>/` until the install is committed or rolled
/// back, so a failed reinstall never loses the last good manifest.
#[derive(Debug)]
pub struct InstallTransaction {
    version_id: String,
    live: PathBuf,
    backup: PathBuf,
    had_previous: bool,
}

impl InstallTransaction {
    /// Moves the current version directory aside. A backup left behind by an
    /// install that crashed is put back first so it is not lost.
    pub fn begin(version_id: &str, data_root: &Path) -> Result<Self> {
        let live = data_root.join("versions").join(version_id);
        let backup = data_root.join("backups").join(version_id);

        if backup.exists() {
            if live.exists() {
                log::warn!("[txn:{}] discarding leftover backup {:?}", version_id, backup);
                fs::remove_dir_all(&backup).with_context(|| format!("Remove stale backup {:?}", backup))?;
            } else {
                log::warn!("[txn:{}] restoring backup of an interrupted install", version_id);
                move_dir(&backup, &live)?;
            }
        }

        let had_previous = live.exists();
        if had_previous {
            move_dir(&live, &backup)
                .with_context(|| format!("Snapshot {:?} before reinstalling", live))?;
        }
        log::info!("[txn:{}] begin (previous install: {})", version_id, had_previous);
        Ok(Self {
            version_id: version_id.to_string(),
            live,
            backup,
            had_previous,
        })
    }

    pub fn commit(self) -> Result<()> {
        if self.backup.exists() {
            fs::remove_dir_all(&self.backup)
                .with_context(|| format!("Remove backup {:?}", self.backup))?;
        }
        log::info!("[txn:{}] commit", self.version_id);
        Ok(())
    }

    /// Deletes whatever the failed install wrote and restores the snapshot.
    pub fn rollback(self, reason: &str) -> Result<()> {
        log::warn!("[txn:{}] rollback: {}", self.version_id, reason);
        if self.live.exists() {
            fs::remove_dir_all(&self.live)
                .with_context(|| format!("Remove failed install {:?}", self.live))?;
        }
        if self.had_previous {
            move_dir(&self.backup, &self.live)
                .with_context(|| format!("Restore {:?} from backup", self.live))?;
        }
        Ok(())
    }
}

fn move_dir(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Create {:?}", parent))?;
    }
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(err) if is_cross_device(&err) => {
            log::debug!("{:?} and {:?} are on different devices, copying", src, dest);
            copy_tree(src, dest)?;
            fs::remove_dir_all(src).with_context(|| format!("Remove {:?} after copy", src))
        }
        Err(err) => Err(err).with_context(|| format!("Move {:?} -> {:?}", src, dest)),
    }
}

fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    let mut pending = vec![(src.to_path_buf(), dest.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        fs::create_dir_all(&to).with_context(|| format!("Create {:?}", to))?;
        for entry in fs::read_dir(&from).with_context(|| format!("Read {:?}", from))? {
            let entry = entry?;
            let target = to.join(entry.file_name());
            if entry.file_type()?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                fs::copy(entry.path(), &target)
                    .with_context(|| format!("Copy {:?} -> {:?}", entry.path(), target))?;
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
fn is_cross_device(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(not(unix))]
fn is_cross_device(_err: &std::io::Error) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_version(root: &Path, body: &str) -> PathBuf {
        let dir = root.join("versions/v1");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("v1.json"), body).unwrap();
        dir
    }

    #[test]
    fn rollback_restores_previous_version() {
        let tmp = tempdir().unwrap();
        let version_dir = write_version(tmp.path(), "old");

        let txn = InstallTransaction::begin("v1", tmp.path()).unwrap();
        assert!(!version_dir.exists());

        write_version(tmp.path(), "half-written");
        txn.rollback("test").unwrap();

        assert_eq!(fs::read_to_string(version_dir.join("v1.json")).unwrap(), "old");
        assert!(!tmp.path().join("backups/v1").exists());
    }

    #[test]
    fn rollback_of_first_install_leaves_nothing() {
        let tmp = tempdir().unwrap();
        let txn = InstallTransaction::begin("v1", tmp.path()).unwrap();
        let version_dir = write_version(tmp.path(), "partial");
        txn.rollback("test").unwrap();
        assert!(!version_dir.exists());
    }

    #[test]
    fn commit_drops_backup() {
        let tmp = tempdir().unwrap();
        write_version(tmp.path(), "old");

        let txn = InstallTransaction::begin("v1", tmp.path()).unwrap();
        let version_dir = write_version(tmp.path(), "new");
        txn.commit().unwrap();

        assert_eq!(fs::read_to_string(version_dir.join("v1.json")).unwrap(), "new");
        assert!(!tmp.path().join("backups/v1").exists());
    }

    #[test]
    fn interrupted_install_backup_is_recovered() {
        let tmp = tempdir().unwrap();
        let backup = tmp.path().join("backups/v1");
        fs::create_dir_all(&backup).unwrap();
        fs::write(backup.join("v1.json"), "good").unwrap();

        // crash left only the backup; the next begin snapshots it again
        let txn = InstallTransaction::begin("v1", tmp.path()).unwrap();
        write_version(tmp.path(), "broken");
        txn.rollback("test").unwrap();

        let restored = tmp.path().join("versions/v1/v1.json");
        assert_eq!(fs::read_to_string(restored).unwrap(), "good");
    }
}
