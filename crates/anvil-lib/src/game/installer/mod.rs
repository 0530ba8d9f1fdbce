pub mod config;
pub mod core;
pub mod manifest;
pub mod modloaders;
pub mod transaction;
pub mod types;
pub mod vanilla;

#[cfg(test)]
mod tests;

use anyhow::Result;
use types::{InstallSpec, LoaderDescriptor, ModloaderType, ProgressReporter};

use crate::game::installer::core::downloader::ArtifactFetcher;
use crate::game::installer::core::traits::LoaderInstaller;
use crate::game::installer::modloaders::fabric::KnotInstaller;
use crate::game::installer::modloaders::forge::ForgeInstaller;
use crate::game::installer::vanilla::VanillaInstaller;
use crate::utils::cache::{Clock, SystemClock, TtlCache};
use std::sync::Arc;
use transaction::InstallTransaction;

/// Shared by every installer: the HTTP fetcher and the meta-API game
/// version cache.
#[derive(Clone)]
pub struct InstallerContext {
    pub fetcher: ArtifactFetcher,
    pub game_versions: Arc<TtlCache<String, Arc<Vec<String>>>>,
}

impl InstallerContext {
    pub fn new() -> Result<Self> {
        Self::with_clock(ArtifactFetcher::new()?, Arc::new(SystemClock))
    }

    pub fn with_clock(fetcher: ArtifactFetcher, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            fetcher,
            game_versions: Arc::new(TtlCache::new(
                chrono::Duration::minutes(config::GAME_VERSION_CACHE_TTL_MINUTES),
                clock,
            )),
        })
    }

    pub fn with_fetcher(mut self, fetcher: ArtifactFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }
}

/// Picks the installer for a descriptor. This is the only place the loader
/// type is matched on.
pub fn get_installer(descriptor: &LoaderDescriptor, ctx: InstallerContext) -> Box<dyn LoaderInstaller> {
    let descriptor = descriptor.clone();
    match descriptor.loader_type {
        ModloaderType::Vanilla => Box::new(VanillaInstaller::new(descriptor, ctx)),
        ModloaderType::Fabric => Box::new(KnotInstaller::fabric(descriptor, ctx)),
        ModloaderType::Quilt => Box::new(KnotInstaller::quilt(descriptor, ctx)),
        ModloaderType::Forge => Box::new(ForgeInstaller::forge(descriptor, ctx)),
        ModloaderType::NeoForge => Box::new(ForgeInstaller::neoforge(descriptor, ctx)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    NotInstalled,
    Validating,
    Valid,
    Installing,
    Installed,
}

impl std::fmt::Display for InstallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InstallState::NotInstalled => "not installed",
            InstallState::Validating => "validating",
            InstallState::Valid => "valid",
            InstallState::Installing => "installing",
            InstallState::Installed => "installed",
        };
        f.write_str(name)
    }
}

fn transition(id: &str, from: &mut InstallState, to: InstallState) {
    log::debug!("[{}] {} -> {}", id, from, to);
    *from = to;
}

/// Validates the install and installs it when that fails. Returns `Valid`
/// when nothing had to be done, `Installed` after a fresh install.
///
/// The version directory is snapshotted first and restored on failure, so a
/// failed reinstall keeps the previous manifest.
pub async fn ensure_installed(
    installer: &dyn LoaderInstaller,
    spec: &InstallSpec,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<InstallState> {
    installer.descriptor().validate()?;
    let id = installer.version_id();
    let mut state = InstallState::NotInstalled;

    transition(&id, &mut state, InstallState::Validating);
    reporter.set_message("Checking installation...");
    match installer.validate_installation(spec).await {
        Ok(true) => {
            transition(&id, &mut state, InstallState::Valid);
            log::info!("{} is installed and valid", id);
            reporter.done(true, Some("Already installed"));
            return Ok(state);
        }
        Ok(false) => log::info!("{} needs installation", id),
        Err(e) => log::warn!("Validation of {} failed, reinstalling: {:#}", id, e),
    }

    installer.check_compatibility(spec).await?;

    transition(&id, &mut state, InstallState::Installing);
    std::fs::create_dir_all(spec.libraries_dir())?;
    std::fs::create_dir_all(spec.versions_dir())?;
    let txn = InstallTransaction::begin(&id, &spec.data_dir)?;

    reporter.set_percent(0);
    let result = async {
        installer.install(spec, Arc::clone(&reporter)).await?;
        if !installer.validate_installation(spec).await? {
            anyhow::bail!("{} failed validation right after install", id);
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    if let Err(err) = result {
        if let Err(rollback_err) = txn.rollback(&format!("{:#}", err)) {
            log::error!("Rollback of {} failed: {:#}", id, rollback_err);
        }
        reporter.done(false, Some("Installation failed"));
        return Err(err);
    }

    txn.commit()?;
    transition(&id, &mut state, InstallState::Installed);
    reporter.done(true, Some("Installation complete"));
    log::info!("Installation completed successfully: {}", id);
    Ok(state)
}
