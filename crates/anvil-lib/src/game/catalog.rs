//! User installations persisted in `installations.json`, and their mapping to
//! the server descriptors the launcher consumes.

use crate::game::config_store::write_json_atomic;
use crate::game::installer::config::Endpoints;
use crate::game::installer::types::{InstallSpec, LoaderDescriptor, ModloaderType, ProgressReporter};
use crate::game::installer::{ensure_installed, get_installer, InstallState, InstallerContext};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    /// Extra jar for the classpath
    Library,
    Mod,
}

/// A library or mod attached to an installation. `id` is a Maven coordinate
/// for libraries and Forge mods, or a plain name for mods given by path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRef {
    pub id: String,
    pub kind: ModuleKind,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub sha1: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

impl ModuleRef {
    pub fn library(coordinate: impl Into<String>) -> Self {
        Self {
            id: coordinate.into(),
            kind: ModuleKind::Library,
            enabled: true,
            path: None,
            url: None,
            sha1: None,
        }
    }

    pub fn mod_file(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            kind: ModuleKind::Mod,
            enabled: true,
            path: Some(path.into()),
            url: None,
            sha1: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptifineRef {
    pub version: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Installation {
    pub id: String,
    pub name: String,
    pub loader: LoaderDescriptor,
    #[serde(default)]
    pub modules: Vec<ModuleRef>,
    #[serde(default)]
    pub optifine: Option<OptifineRef>,
    /// Legacy per-installation JVM options.
    #[serde(default)]
    pub java_options: Option<JavaOptions>,
    #[serde(default)]
    pub server_address: Option<String>,
    #[serde(default)]
    pub effective_version_id: Option<String>,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub last_played: Option<DateTime<Utc>>,
    /// Seconds
    #[serde(default)]
    pub playtime: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JavaOptions {
    #[serde(default)]
    pub jvm_args: Vec<String>,
    #[serde(default)]
    pub java_path: Option<PathBuf>,
}

impl Installation {
    pub fn new(name: impl Into<String>, loader: LoaderDescriptor) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            loader,
            modules: Vec::new(),
            optifine: None,
            java_options: None,
            server_address: None,
            effective_version_id: None,
            created: Utc::now(),
            last_played: None,
            playtime: 0,
        }
    }

    pub fn enabled_modules(&self, kind: ModuleKind) -> impl Iterator<Item = &ModuleRef> {
        self.modules
            .iter()
            .filter(move |m| m.kind == kind && m.enabled)
    }
}

/// What the launcher sees of an installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub id: String,
    pub name: String,
    pub loader: LoaderDescriptor,
    pub version_id: String,
    pub libraries: Vec<ModuleRef>,
    pub mods: Vec<ModuleRef>,
    pub optifine: Option<OptifineRef>,
    pub server_address: Option<String>,
    pub jvm_args: Vec<String>,
}

impl ServerDescriptor {
    pub fn minecraft_version(&self) -> &str {
        &self.loader.minecraft_version
    }

    pub fn loader_type(&self) -> ModloaderType {
        self.loader.loader_type
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    installations: Vec<Installation>,
}

pub struct InstallationCatalog {
    path: PathBuf,
    installations: Vec<Installation>,
}

impl InstallationCatalog {
    /// Reads `path`, starting empty when the file does not exist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let installations = if path.is_file() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {:?}", path))?;
            let file: CatalogFile = serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse {:?}", path))?;
            file.installations
        } else {
            Vec::new()
        };
        log::debug!("Loaded {} installations from {:?}", installations.len(), path);
        Ok(Self {
            path,
            installations,
        })
    }

    pub fn save(&self) -> Result<()> {
        let file = CatalogFile {
            installations: self.installations.clone(),
        };
        write_json_atomic(&self.path, &file)
    }

    pub fn list(&self) -> &[Installation] {
        &self.installations
    }

    pub fn get(&self, id: &str) -> Option<&Installation> {
        self.installations.iter().find(|i| i.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Installation> {
        self.installations
            .iter_mut()
            .find(|i| i.id == id)
            .with_context(|| format!("Installation not found: {}", id))
    }

    pub fn create(&mut self, installation: Installation) -> Result<&Installation> {
        check_id(&installation.id)?;
        installation.loader.validate()?;
        if self.get(&installation.id).is_some() {
            anyhow::bail!("Installation {} already exists", installation.id);
        }
        log::info!(
            "Creating installation '{}' ({} {})",
            installation.name,
            installation.loader.loader_type,
            installation.loader.minecraft_version
        );
        self.installations.push(installation);
        self.save()?;
        let idx = self.installations.len() - 1;
        Ok(&self.installations[idx])
    }

    /// Applies an edit. Changing the loader clears the resolved version id.
    pub fn update(&mut self, id: &str, edit: impl FnOnce(&mut Installation)) -> Result<()> {
        let installation = self.get_mut(id)?;
        let before = installation.loader.clone();
        edit(installation);
        installation.id = id.to_string();
        installation.loader.validate()?;
        if installation.loader != before {
            installation.effective_version_id = None;
        }
        self.save()
    }

    pub fn record_session(&mut self, id: &str, played: chrono::Duration) -> Result<()> {
        let installation = self.get_mut(id)?;
        installation.last_played = Some(Utc::now());
        installation.playtime += played.num_seconds().max(0) as u64;
        self.save()
    }

    /// Removes the record, and optionally its game directory under
    /// `instances_root`.
    pub fn delete(&mut self, id: &str, instances_root: &Path, delete_instance_dir: bool) -> Result<Installation> {
        let idx = self
            .installations
            .iter()
            .position(|i| i.id == id)
            .with_context(|| format!("Installation not found: {}", id))?;
        if delete_instance_dir {
            check_id(id)?;
        }
        let removed = self.installations.remove(idx);
        self.save()?;

        if delete_instance_dir {
            let dir = instances_root.join(&removed.id);
            if dir.exists() {
                std::fs::remove_dir_all(&dir)
                    .with_context(|| format!("Failed to delete instance directory {:?}", dir))?;
            }
        }
        log::info!("Deleted installation '{}'", removed.name);
        Ok(removed)
    }

    pub fn to_server_descriptor(&self, id: &str) -> Result<ServerDescriptor> {
        let installation = self
            .get(id)
            .with_context(|| format!("Installation not found: {}", id))?;
        Ok(ServerDescriptor {
            id: installation.id.clone(),
            name: installation.name.clone(),
            loader: installation.loader.clone(),
            version_id: installation
                .effective_version_id
                .clone()
                .unwrap_or_else(|| installation.loader.effective_version_id()),
            libraries: installation
                .enabled_modules(ModuleKind::Library)
                .cloned()
                .collect(),
            mods: installation.enabled_modules(ModuleKind::Mod).cloned().collect(),
            optifine: installation.optifine.clone(),
            server_address: installation.server_address.clone(),
            jvm_args: installation
                .java_options
                .as_ref()
                .map(|o| o.jvm_args.clone())
                .unwrap_or_default(),
        })
    }

    /// Validates or installs the installation's loader under `data_dir`, then
    /// records the resulting version id.
    pub async fn resolve(
        &mut self,
        id: &str,
        data_dir: &Path,
        endpoints: &Endpoints,
        ctx: InstallerContext,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<String> {
        let installation = self
            .get(id)
            .with_context(|| format!("Installation not found: {}", id))?;
        let descriptor = installation.loader.clone();
        let mut spec = InstallSpec::new(descriptor.clone(), data_dir.to_path_buf())
            .with_endpoints(endpoints.clone());
        if let Some(java) = installation.java_options.as_ref().and_then(|o| o.java_path.clone()) {
            spec = spec.with_java(java);
        }

        let installer = get_installer(&descriptor, ctx);
        let state = ensure_installed(installer.as_ref(), &spec, reporter).await?;
        let version_id = installer.version_id();
        if state == InstallState::Installed {
            log::info!("Installed {} for '{}'", version_id, installation.name);
        }

        let entry = self.get_mut(id)?;
        if entry.effective_version_id.as_deref() != Some(version_id.as_str()) {
            entry.effective_version_id = Some(version_id.clone());
            self.save()?;
        }
        Ok(version_id)
    }
}

/// Ids name the instance directory, so they must be a single plain path
/// component.
fn check_id(id: &str) -> Result<()> {
    let plain = !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\', ':'])
        && !id.chars().any(char::is_control);
    if !plain {
        anyhow::bail!("Invalid installation id {:?}", id);
    }
    Ok(())
}
