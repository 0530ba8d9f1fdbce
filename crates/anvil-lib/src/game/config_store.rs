//! Launcher settings the pipeline reads: accounts, memory, JVM options, Java
//! paths and per-installation mod choices.

use crate::utils::hardware::default_max_ram_mb;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    Mojang,
    Microsoft,
    Offline,
}

/// The signed-in player a launch runs as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPrincipal {
    pub display_name: String,
    pub uuid: String,
    pub access_token: String,
    #[serde(rename = "type")]
    pub kind: AuthKind,
}

impl AuthPrincipal {
    pub fn offline(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            uuid: uuid::Uuid::new_v4().simple().to_string(),
            access_token: "0".to_string(),
            kind: AuthKind::Offline,
        }
    }

    /// `${user_type}` value.
    pub fn user_type(&self) -> &'static str {
        match self.kind {
            AuthKind::Microsoft => "msa",
            AuthKind::Mojang => "mojang",
            AuthKind::Offline => "legacy",
        }
    }
}

/// Per-installation mod toggles, keyed by module id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModConfiguration {
    #[serde(default)]
    pub mods: HashMap<String, bool>,
}

impl ModConfiguration {
    /// Mods are on unless explicitly switched off.
    pub fn is_enabled(&self, id: &str) -> bool {
        self.mods.get(id).copied().unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSettings {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub fullscreen: bool,
    #[serde(default = "default_true")]
    pub launch_detached: bool,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            width: Some(1280),
            height: Some(720),
            fullscreen: false,
            launch_detached: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Read access to launcher settings.
pub trait ConfigStore: Send + Sync {
    fn auth_account(&self, uuid: &str) -> Option<AuthPrincipal>;
    fn selected_account(&self) -> Option<AuthPrincipal>;
    fn java_executable(&self, server_id: &str) -> Option<PathBuf>;
    fn global_jvm_options(&self) -> Vec<String>;
    fn jvm_options(&self, server_id: &str) -> Vec<String>;
    fn max_ram_mb(&self, server_id: &str) -> u64;
    fn min_ram_mb(&self, server_id: &str) -> u64;
    /// Shared root holding `libraries/` and `versions/`.
    fn common_directory(&self) -> PathBuf;
    /// Parent of every per-installation game directory.
    fn instance_directory(&self) -> PathBuf;
    fn mod_configuration(&self, server_id: &str) -> ModConfiguration;
    fn game_settings(&self) -> GameSettings;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSettings {
    #[serde(default)]
    pub java_executable: Option<PathBuf>,
    #[serde(default)]
    pub jvm_options: Vec<String>,
    #[serde(default)]
    pub max_ram_mb: Option<u64>,
    #[serde(default)]
    pub min_ram_mb: Option<u64>,
    #[serde(default)]
    pub mods: ModConfiguration,
}

/// On-disk layout of [`JsonConfigStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigData {
    #[serde(default)]
    pub common_directory: Option<PathBuf>,
    #[serde(default)]
    pub instance_directory: Option<PathBuf>,
    #[serde(default)]
    pub accounts: Vec<AuthPrincipal>,
    #[serde(default)]
    pub selected_account: Option<String>,
    #[serde(default)]
    pub global_jvm_options: Vec<String>,
    #[serde(default)]
    pub servers: HashMap<String, ServerSettings>,
    #[serde(default)]
    pub game: GameSettings,
}

/// `ConfigStore` backed by one JSON file. Missing fields fall back to
/// defaults rooted next to the file.
pub struct JsonConfigStore {
    path: PathBuf,
    data: RwLock<ConfigData>,
}

impl JsonConfigStore {
    /// Loads `path`, or starts empty when it does not exist yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.is_file() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config {:?}", path))?;
            serde_json::from_str(&text).with_context(|| format!("Failed to parse config {:?}", path))?
        } else {
            log::debug!("No config at {:?}, using defaults", path);
            ConfigData::default()
        };
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ConfigData> {
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> ConfigData {
        self.read().clone()
    }

    /// Applies `edit` and writes the result.
    pub fn update(&self, edit: impl FnOnce(&mut ConfigData)) -> Result<()> {
        let snapshot = {
            let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
            edit(&mut data);
            data.clone()
        };
        write_json_atomic(&self.path, &snapshot)
    }

    pub fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.snapshot())
    }

    fn root(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn server(&self, server_id: &str) -> ServerSettings {
        self.read().servers.get(server_id).cloned().unwrap_or_default()
    }
}

impl ConfigStore for JsonConfigStore {
    fn auth_account(&self, uuid: &str) -> Option<AuthPrincipal> {
        self.read().accounts.iter().find(|a| a.uuid == uuid).cloned()
    }

    fn selected_account(&self) -> Option<AuthPrincipal> {
        let data = self.read();
        let uuid = data.selected_account.as_deref()?;
        data.accounts.iter().find(|a| a.uuid == uuid).cloned()
    }

    fn java_executable(&self, server_id: &str) -> Option<PathBuf> {
        self.server(server_id).java_executable
    }

    fn global_jvm_options(&self) -> Vec<String> {
        self.read().global_jvm_options.clone()
    }

    fn jvm_options(&self, server_id: &str) -> Vec<String> {
        self.server(server_id).jvm_options
    }

    fn max_ram_mb(&self, server_id: &str) -> u64 {
        self.server(server_id)
            .max_ram_mb
            .unwrap_or_else(default_max_ram_mb)
    }

    fn min_ram_mb(&self, server_id: &str) -> u64 {
        let max = self.max_ram_mb(server_id);
        self.server(server_id)
            .min_ram_mb
            .unwrap_or(max)
            .min(max)
    }

    fn common_directory(&self) -> PathBuf {
        self.read()
            .common_directory
            .clone()
            .unwrap_or_else(|| self.root().join("common"))
    }

    fn instance_directory(&self) -> PathBuf {
        self.read()
            .instance_directory
            .clone()
            .unwrap_or_else(|| self.root().join("instances"))
    }

    fn mod_configuration(&self, server_id: &str) -> ModConfiguration {
        self.server(server_id).mods
    }

    fn game_settings(&self) -> GameSettings {
        self.read().game.clone()
    }
}

/// Serializes `value` next to `path` and renames it into place.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("Failed to write {:?}", tmp))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to replace {:?}", path))?;
    Ok(())
}
