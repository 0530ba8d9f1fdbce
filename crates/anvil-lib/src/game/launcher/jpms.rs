//! Hiding jars from NeoForge's module discovery for the lifetime of a game
//! process.
//!
//! NeoForge scans `versions/<mc>/` and the `net/minecraft/client` library
//! tree; the vanilla jar and the slim/extra client variants there would split
//! packages with the module it builds from the SRG jar. They are renamed out
//! of the way before spawn and renamed back after exit. A journal next to the
//! instance records every rename so a crash in between is repaired by
//! [`JarHider::recover`].

use crate::game::config_store::write_json_atomic;
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;

pub const JOURNAL_FILE: &str = "hidden-jars.json";
const HIDDEN_SUFFIX: &str = ".anvil-hidden";

static INSTANCE_LOCKS: Lazy<Mutex<LockMap>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

type LockMap = HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>;

fn lock_map() -> MutexGuard<'static, LockMap> {
    match INSTANCE_LOCKS.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn instance_lock(key: &Path) -> Arc<tokio::sync::Mutex<()>> {
    lock_map()
        .entry(key.to_path_buf())
        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
        .clone()
}

/// Forgets the lock of an instance nobody holds or waits on. Holders and
/// waiters keep their own `Arc`, so a count of one means only the map is left.
fn prune_instance_lock(key: &Path) {
    let mut locks = lock_map();
    if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
        locks.remove(key);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenJar {
    pub original: PathBuf,
    pub hidden: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Journal {
    entries: Vec<HiddenJar>,
}

/// Jars currently renamed away. Restored by [`HiddenJars::restore`], or on
/// drop if that never ran. Holds the instance lock until restored, so a
/// second launch of the same instance waits for the first to exit.
pub struct HiddenJars {
    entries: Vec<HiddenJar>,
    journal: PathBuf,
    restored: bool,
    lock_key: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl fmt::Debug for HiddenJars {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HiddenJars")
            .field("entries", &self.entries)
            .field("journal", &self.journal)
            .field("restored", &self.restored)
            .finish()
    }
}

impl HiddenJars {
    pub fn entries(&self) -> &[HiddenJar] {
        &self.entries
    }

    pub fn is_restored(&self) -> bool {
        self.restored
    }

    fn release_lock(&mut self) {
        if self.guard.take().is_some() {
            prune_instance_lock(&self.lock_key);
        }
    }

    /// Renames every jar back. Runs once; later calls are no-ops. The journal
    /// is kept when any rename fails so the next recovery can retry.
    pub fn restore(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        let mut failures = Vec::new();
        for entry in &self.entries {
            if let Err(e) = restore_entry(entry) {
                failures.push(format!("{:?}: {}", entry.original, e));
            }
        }
        self.release_lock();
        if !failures.is_empty() {
            anyhow::bail!("Failed to restore hidden jars: {}", failures.join("; "));
        }
        remove_journal(&self.journal);
        log::debug!("Restored {} hidden jar(s)", self.entries.len());
        Ok(())
    }
}

impl Drop for HiddenJars {
    fn drop(&mut self) {
        if !self.restored {
            if let Err(e) = self.restore() {
                log::warn!("{:#}", e);
            }
        }
    }
}

fn restore_entry(entry: &HiddenJar) -> std::io::Result<()> {
    if !entry.hidden.exists() {
        return Ok(());
    }
    if entry.original.exists() {
        // something recreated the jar meanwhile; keep the newer one
        log::warn!(
            "{:?} reappeared while hidden, discarding {:?}",
            entry.original,
            entry.hidden
        );
        return std::fs::remove_file(&entry.hidden);
    }
    std::fs::rename(&entry.hidden, &entry.original)
}

fn remove_journal(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Failed to remove journal {:?}: {}", path, e);
        }
    }
}

fn hidden_path(original: &Path) -> PathBuf {
    let mut name = original.as_os_str().to_os_string();
    name.push(HIDDEN_SUFFIX);
    PathBuf::from(name)
}

/// Locates and hides the jars NeoForge must not see.
pub struct JarHider {
    /// Instance directory; holds the journal and keys the lock
    pub journal_dir: PathBuf,
    pub versions_dir: PathBuf,
    pub libraries_dir: PathBuf,
    pub minecraft_version: String,
}

impl JarHider {
    pub fn journal_path(journal_dir: &Path) -> PathBuf {
        journal_dir.join(JOURNAL_FILE)
    }

    /// The vanilla jar plus every `client-*.jar` for this game version
    /// except the SRG one, limited to files that exist.
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mc = &self.minecraft_version;
        let mut out = Vec::new();
        let vanilla = self.versions_dir.join(mc).join(format!("{}.jar", mc));
        if vanilla.is_file() {
            out.push(vanilla);
        }

        let client_root = self
            .libraries_dir
            .join("net")
            .join("minecraft")
            .join("client");
        let Ok(dirs) = std::fs::read_dir(&client_root) else {
            return out;
        };
        let prefix = format!("{}-", mc);
        let mut version_dirs: Vec<PathBuf> = dirs
            .flatten()
            .filter(|d| {
                let name = d.file_name().to_string_lossy().to_string();
                name == *mc || name.starts_with(&prefix)
            })
            .map(|d| d.path())
            .collect();
        version_dirs.sort();
        for dir in version_dirs {
            let Ok(files) = std::fs::read_dir(&dir) else {
                continue;
            };
            let mut jars: Vec<PathBuf> = files
                .flatten()
                .map(|f| f.path())
                .filter(|p| {
                    let name = p
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    name.starts_with("client-") && name.ends_with(".jar") && !name.ends_with("-srg.jar")
                })
                .collect();
            jars.sort();
            out.extend(jars);
        }
        out
    }

    /// Takes the instance lock, repairs any leftover journal, then hides the
    /// candidates. A failed rename undoes the ones already made.
    pub async fn hide(&self) -> Result<HiddenJars> {
        let guard = instance_lock(&self.journal_dir).lock_owned().await;
        if let Err(e) = Self::recover(&self.journal_dir) {
            drop(guard);
            prune_instance_lock(&self.journal_dir);
            return Err(e);
        }

        let entries: Vec<HiddenJar> = self
            .candidates()
            .into_iter()
            .map(|original| HiddenJar {
                hidden: hidden_path(&original),
                original,
            })
            .collect();
        let journal = Self::journal_path(&self.journal_dir);
        let mut hidden = HiddenJars {
            entries: Vec::new(),
            journal: journal.clone(),
            restored: false,
            lock_key: self.journal_dir.clone(),
            guard: Some(guard),
        };
        if entries.is_empty() {
            hidden.restored = true;
            hidden.release_lock();
            return Ok(hidden);
        }

        write_json_atomic(
            &journal,
            &Journal {
                entries: entries.clone(),
            },
        )?;
        for entry in entries {
            if let Err(e) = tokio::fs::rename(&entry.original, &entry.hidden).await {
                // Drop of `hidden` puts back what was already moved
                return Err(e).with_context(|| format!("Failed to hide {:?}", entry.original));
            }
            log::debug!("Hid {:?}", entry.original);
            hidden.entries.push(entry);
        }
        log::info!(
            "Hid {} jar(s) from module discovery for {}",
            hidden.entries.len(),
            self.minecraft_version
        );
        Ok(hidden)
    }

    /// [`recover`](Self::recover) unless a launch of this instance currently
    /// holds its jars hidden, in which case the journal is live and left alone.
    pub fn recover_if_idle(journal_dir: &Path) -> Result<usize> {
        let lock = instance_lock(journal_dir);
        let result = match lock.try_lock() {
            Ok(_guard) => Self::recover(journal_dir),
            Err(_) => {
                log::debug!("{:?} has a running launch, skipping jar recovery", journal_dir);
                Ok(0)
            }
        };
        drop(lock);
        prune_instance_lock(journal_dir);
        result
    }

    /// Puts back everything a leftover journal in `journal_dir` lists, then
    /// removes the journal. Returns how many jars were restored. Callers
    /// must hold the instance lock or know no launch is running.
    pub fn recover(journal_dir: &Path) -> Result<usize> {
        let path = Self::journal_path(journal_dir);
        if !path.exists() {
            return Ok(0);
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        let journal: Journal = match serde_json::from_str(&text) {
            Ok(j) => j,
            Err(e) => {
                log::warn!("Discarding unreadable journal {:?}: {}", path, e);
                remove_journal(&path);
                return Ok(0);
            }
        };
        let mut restored = 0;
        for entry in &journal.entries {
            if !entry.hidden.exists() {
                continue;
            }
            restore_entry(entry)
                .with_context(|| format!("Failed to restore {:?}", entry.original))?;
            restored += 1;
        }
        remove_journal(&path);
        if restored > 0 {
            log::warn!(
                "Recovered {} jar(s) left hidden by an interrupted launch",
                restored
            );
        }
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"jar").unwrap();
    }

    struct Layout {
        _tmp: tempfile::TempDir,
        hider: JarHider,
        vanilla: PathBuf,
        slim: PathBuf,
        extra: PathBuf,
        srg: PathBuf,
        other_version: PathBuf,
    }

    fn layout() -> Layout {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        let client = root.join("libraries/net/minecraft/client/1.20.4-20231207.154220");
        let layout = Layout {
            vanilla: root.join("versions/1.20.4/1.20.4.jar"),
            slim: client.join("client-1.20.4-20231207.154220-slim.jar"),
            extra: client.join("client-1.20.4-20231207.154220-extra.jar"),
            srg: client.join("client-1.20.4-20231207.154220-srg.jar"),
            other_version: root
                .join("libraries/net/minecraft/client/1.20.1-20230612.114412/client-1.20.1-20230612.114412-extra.jar"),
            hider: JarHider {
                journal_dir: root.join("instances/neo"),
                versions_dir: root.join("versions"),
                libraries_dir: root.join("libraries"),
                minecraft_version: "1.20.4".into(),
            },
            _tmp: tmp,
        };
        for p in [
            &layout.vanilla,
            &layout.slim,
            &layout.extra,
            &layout.srg,
            &layout.other_version,
        ] {
            touch(p);
        }
        layout
    }

    #[test]
    fn candidates_skip_srg_and_other_versions() {
        let l = layout();
        assert_eq!(
            l.hider.candidates(),
            vec![l.vanilla.clone(), l.extra.clone(), l.slim.clone()]
        );
    }

    #[tokio::test]
    async fn hide_then_restore() {
        let l = layout();
        let mut hidden = l.hider.hide().await.unwrap();
        assert_eq!(hidden.entries().len(), 3);
        assert!(!l.vanilla.exists());
        assert!(!l.slim.exists());
        assert!(l.srg.exists());
        assert!(l.other_version.exists());
        assert!(JarHider::journal_path(&l.hider.journal_dir).exists());

        hidden.restore().unwrap();
        assert!(l.vanilla.exists());
        assert!(l.slim.exists());
        assert!(l.extra.exists());
        assert!(!JarHider::journal_path(&l.hider.journal_dir).exists());
        // idempotent
        hidden.restore().unwrap();
    }

    #[tokio::test]
    async fn drop_restores() {
        let l = layout();
        {
            let _hidden = l.hider.hide().await.unwrap();
            assert!(!l.vanilla.exists());
        }
        assert!(l.vanilla.exists());
        assert!(l.slim.exists());
    }

    #[test]
    fn recover_repairs_interrupted_launch() {
        let l = layout();
        let entry = HiddenJar {
            hidden: hidden_path(&l.vanilla),
            original: l.vanilla.clone(),
        };
        std::fs::rename(&entry.original, &entry.hidden).unwrap();
        let journal = JarHider::journal_path(&l.hider.journal_dir);
        write_json_atomic(
            &journal,
            &Journal {
                entries: vec![
                    entry,
                    HiddenJar {
                        original: l.slim.clone(),
                        hidden: hidden_path(&l.slim),
                    },
                ],
            },
        )
        .unwrap();

        assert_eq!(JarHider::recover(&l.hider.journal_dir).unwrap(), 1);
        assert!(l.vanilla.exists());
        assert!(l.slim.exists());
        assert!(!journal.exists());
        assert_eq!(JarHider::recover(&l.hider.journal_dir).unwrap(), 0);
    }

    #[tokio::test]
    async fn second_launch_waits_for_restore() {
        let l = layout();
        let mut first = l.hider.hide().await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(100), l.hider.hide()).await;
        assert!(blocked.is_err());

        // the running launch's journal is not touched by startup recovery
        assert_eq!(JarHider::recover_if_idle(&l.hider.journal_dir).unwrap(), 0);
        assert!(!l.vanilla.exists());

        first.restore().unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), l.hider.hide())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.entries().len(), 3);
    }

    #[tokio::test]
    async fn instance_lock_is_forgotten_once_released() {
        let l = layout();
        let key = l.hider.journal_dir.clone();
        let known = || lock_map().contains_key(&key);

        let mut hidden = l.hider.hide().await.unwrap();
        assert!(known());
        hidden.restore().unwrap();
        assert!(!known());

        drop(l.hider.hide().await.unwrap());
        assert!(!known());
        JarHider::recover_if_idle(&key).unwrap();
        assert!(!known());
    }
}
