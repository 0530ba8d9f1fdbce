//! Core types for game launching
use crate::game::catalog::ServerDescriptor;
use crate::game::config_store::{AuthPrincipal, ConfigStore, GameSettings, ModConfiguration};
use crate::game::installer::types::OsType;
use crate::game::launcher::jpms::HiddenJars;
use crate::utils::process::command_line;
use crate::utils::redact::redact_args;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const LAUNCHER_NAME: &str = "Anvil";
pub const LAUNCHER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything a launch needs besides the manifests on disk.
#[derive(Debug, Clone)]
pub struct LaunchContext {
    pub server: ServerDescriptor,

    /// Shared root holding `libraries/`, `versions/`, `assets/` and `natives/`
    pub common_dir: PathBuf,

    /// Instance-specific game directory, also the child's cwd
    pub game_dir: PathBuf,

    pub java_path: PathBuf,

    pub auth: AuthPrincipal,

    pub min_ram_mb: u64,
    pub max_ram_mb: u64,

    /// User-wide JVM options, appended after the computed ones
    pub global_jvm_args: Vec<String>,

    pub mods: ModConfiguration,
    pub game: GameSettings,
    pub os: OsType,

    pub launcher_name: String,
    pub launcher_version: String,
}

impl LaunchContext {
    /// Pulls account, memory, JVM and directory settings for `server` from
    /// the config store.
    pub fn from_config(store: &dyn ConfigStore, server: ServerDescriptor, java_path: PathBuf) -> Result<Self> {
        let auth = store
            .selected_account()
            .context("No account selected")?;
        let mut global_jvm_args = store.global_jvm_options();
        global_jvm_args.extend(store.jvm_options(&server.id));
        Ok(Self {
            common_dir: store.common_directory(),
            game_dir: store.instance_directory().join(&server.id),
            java_path,
            auth,
            min_ram_mb: store.min_ram_mb(&server.id),
            max_ram_mb: store.max_ram_mb(&server.id),
            global_jvm_args,
            mods: store.mod_configuration(&server.id),
            game: store.game_settings(),
            os: OsType::current(),
            launcher_name: LAUNCHER_NAME.to_string(),
            launcher_version: LAUNCHER_VERSION.to_string(),
            server,
        })
    }

    pub fn minecraft_version(&self) -> &str {
        self.server.minecraft_version()
    }

    pub fn libraries_dir(&self) -> PathBuf {
        self.common_dir.join("libraries")
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.common_dir.join("versions")
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.common_dir.join("assets")
    }

    /// Parent of the per-launch natives directories
    pub fn natives_root(&self) -> PathBuf {
        self.common_dir.join("natives")
    }

    pub fn version_json_path(&self, version_id: &str) -> PathBuf {
        self.versions_dir()
            .join(version_id)
            .join(format!("{}.json", version_id))
    }

    /// `versions/<mc>/<mc>.jar`
    pub fn vanilla_jar_path(&self) -> PathBuf {
        let mc = self.minecraft_version();
        self.versions_dir().join(mc).join(format!("{}.jar", mc))
    }

    pub fn log_file(&self) -> PathBuf {
        self.game_dir.join("logs").join("launcher.log")
    }

    /// Values that must never reach a log line.
    pub fn secrets(&self) -> Vec<String> {
        vec![self.auth.access_token.clone()]
    }
}

/// Fully built launch, ready for the supervisor.
#[derive(Debug)]
pub struct LaunchPlan {
    pub java_path: PathBuf,
    /// JVM args, main class and game args in order
    pub args: Vec<String>,
    pub main_class: String,
    pub cwd: PathBuf,
    /// Deleted once the game exits
    pub natives_dir: PathBuf,
    pub mod_list: Option<PathBuf>,
    /// Jars renamed away for the lifetime of the child
    pub hidden: Option<HiddenJars>,
    pub secrets: Vec<String>,
}

impl LaunchPlan {
    pub fn redacted_args(&self) -> Vec<String> {
        let secrets: Vec<&str> = self.secrets.iter().map(String::as_str).collect();
        redact_args(&self.args, &secrets)
    }

    /// Copy-pasteable command line with credentials masked.
    pub fn redacted_command(&self) -> String {
        command_line(&self.java_path.to_string_lossy(), &self.redacted_args())
    }

    pub fn natives_dir(&self) -> &Path {
        &self.natives_dir
    }
}
