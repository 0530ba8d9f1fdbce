use crate::error::AnvilError;
use crate::game::installer::config::{Endpoints, DEFAULT_CONCURRENCY};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Progress reporter trait for installer operations
/// Implementations forward updates to whatever surface the embedder has.
pub trait ProgressReporter: Send + Sync {
    /// Start a new step with optional total steps
    fn start_step(&self, name: &str, total_steps: Option<u32>);

    /// Update bytes transferred for download progress
    fn update_bytes(&self, transferred: u64, total: Option<u64>);

    /// Set overall percentage (0-100, or -1 for indeterminate)
    fn set_percent(&self, percent: i32);

    /// Set a short status message
    fn set_message(&self, message: &str);

    /// Set a sub-step with optional name and progress (e.g., "Downloading lwjgl-3.3.1.jar (3/12)")
    fn set_substep(&self, name: Option<&str>, current: Option<u32>, total: Option<u32>);

    /// Mark operation as complete
    fn done(&self, success: bool, message: Option<&str>);
}

/// A progress reporter that does nothing (silent).
/// Useful for background verification or tests.
pub struct SilentProgressReporter;

impl ProgressReporter for SilentProgressReporter {
    fn start_step(&self, _name: &str, _total_steps: Option<u32>) {}
    fn update_bytes(&self, _transferred: u64, _total: Option<u64>) {}
    fn set_percent(&self, _percent: i32) {}
    fn set_message(&self, _message: &str) {}
    fn set_substep(&self, _name: Option<&str>, _current: Option<u32>, _total: Option<u32>) {}
    fn done(&self, _success: bool, _message: Option<&str>) {}
}

/// Modloader type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModloaderType {
    Vanilla,
    Fabric,
    Quilt,
    Forge,
    NeoForge,
}

impl ModloaderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModloaderType::Vanilla => "vanilla",
            ModloaderType::Fabric => "fabric",
            ModloaderType::Quilt => "quilt",
            ModloaderType::Forge => "forge",
            ModloaderType::NeoForge => "neoforge",
        }
    }

    /// Fabric and Quilt share the Knot launch model and the meta-API install path.
    pub fn is_knot(&self) -> bool {
        matches!(self, ModloaderType::Fabric | ModloaderType::Quilt)
    }

    pub fn is_forge_like(&self) -> bool {
        matches!(self, ModloaderType::Forge | ModloaderType::NeoForge)
    }
}

impl std::fmt::Display for ModloaderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ModloaderType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vanilla" => Ok(ModloaderType::Vanilla),
            "fabric" => Ok(ModloaderType::Fabric),
            "quilt" => Ok(ModloaderType::Quilt),
            "forge" => Ok(ModloaderType::Forge),
            "neoforge" => Ok(ModloaderType::NeoForge),
            _ => Err(anyhow::anyhow!("Unknown modloader type: {}", s)),
        }
    }
}

/// Which loader an installation needs, and for which game version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderDescriptor {
    pub loader_type: ModloaderType,
    pub minecraft_version: String,
    #[serde(default)]
    pub loader_version: Option<String>,
}

impl LoaderDescriptor {
    pub fn vanilla(minecraft_version: impl Into<String>) -> Self {
        Self {
            loader_type: ModloaderType::Vanilla,
            minecraft_version: minecraft_version.into(),
            loader_version: None,
        }
    }

    pub fn new(
        loader_type: ModloaderType,
        minecraft_version: impl Into<String>,
        loader_version: impl Into<String>,
    ) -> Self {
        Self {
            loader_type,
            minecraft_version: minecraft_version.into(),
            loader_version: Some(loader_version.into()),
        }
    }

    /// Loader version, which every non-vanilla loader requires.
    pub fn require_loader_version(&self) -> Result<&str, AnvilError> {
        match self.loader_version.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(AnvilError::InvalidLoaderDescriptor(format!(
                "{} requires a loader version",
                self.loader_type
            ))),
        }
    }

    pub fn validate(&self) -> Result<(), AnvilError> {
        if self.minecraft_version.trim().is_empty() {
            return Err(AnvilError::InvalidLoaderDescriptor(
                "missing minecraft version".into(),
            ));
        }
        if self.loader_type != ModloaderType::Vanilla {
            self.require_loader_version()?;
        }
        Ok(())
    }

    /// Id of the version folder this loader installs into.
    pub fn effective_version_id(&self) -> String {
        let mc = &self.minecraft_version;
        let lv = self.loader_version.as_deref().unwrap_or_default();
        match self.loader_type {
            ModloaderType::Vanilla => mc.clone(),
            ModloaderType::Fabric => format!("fabric-loader-{}-{}", lv, mc),
            ModloaderType::Quilt => format!("quilt-loader-{}-{}", lv, mc),
            ModloaderType::Forge => format!("{}-forge-{}", mc, forge_short_version(mc, lv)),
            // 1.20.1 NeoForge still publishes under the forge artifact id
            ModloaderType::NeoForge if mc == "1.20.1" => format!("1.20.1-forge-{}", lv),
            ModloaderType::NeoForge => format!("neoforge-{}", lv),
        }
    }
}

/// Forge versions are sometimes given as `<mc>-<forge>`; strip the game part.
pub fn forge_short_version<'a>(minecraft_version: &str, loader_version: &'a str) -> &'a str {
    loader_version
        .strip_prefix(minecraft_version)
        .and_then(|rest| rest.strip_prefix('-'))
        .unwrap_or(loader_version)
}

/// Where and what to install: the loader plus the shared data directory.
#[derive(Debug, Clone)]
pub struct InstallSpec {
    pub loader: LoaderDescriptor,

    /// Shared data root holding `libraries/` and `versions/`
    pub data_dir: PathBuf,

    /// Java used for Forge processors
    pub java_path: Option<PathBuf>,

    /// Number of concurrent downloads
    pub concurrency: usize,

    pub endpoints: Endpoints,
}

impl InstallSpec {
    pub fn new(loader: LoaderDescriptor, data_dir: PathBuf) -> Self {
        Self {
            loader,
            data_dir,
            java_path: None,
            concurrency: DEFAULT_CONCURRENCY,
            endpoints: Endpoints::default(),
        }
    }

    pub fn with_java(mut self, java_path: PathBuf) -> Self {
        self.java_path = Some(java_path);
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn minecraft_version(&self) -> &str {
        &self.loader.minecraft_version
    }

    /// Get the path to the libraries directory
    pub fn libraries_dir(&self) -> PathBuf {
        self.data_dir.join("libraries")
    }

    /// Get the path to the versions directory
    pub fn versions_dir(&self) -> PathBuf {
        self.data_dir.join("versions")
    }

    /// Downloaded installers and cached meta responses
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    pub fn installed_version_id(&self) -> String {
        self.loader.effective_version_id()
    }

    /// `versions/<id>/<id>.json`
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
}

/// Operating system types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsType {
    Windows,
    WindowsArm64,
    MacOS,
    MacOSArm64,
    Linux,
    LinuxArm32,
    LinuxArm64,
}

impl OsType {
    /// Detect the current OS
    pub fn current() -> Self {
        #[cfg(all(target_os = "windows", target_arch = "x86_64"))]
        return OsType::Windows;

        #[cfg(all(target_os = "windows", target_arch = "aarch64"))]
        return OsType::WindowsArm64;

        #[cfg(all(target_os = "macos", target_arch = "x86_64"))]
        return OsType::MacOS;

        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        return OsType::MacOSArm64;

        #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
        return OsType::Linux;

        #[cfg(all(target_os = "linux", target_arch = "arm"))]
        return OsType::LinuxArm32;

        #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
        return OsType::LinuxArm64;

        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        compile_error!("Unsupported operating system");
    }

    /// Get the native classifier string for Minecraft libraries
    pub fn native_classifier(&self) -> &'static str {
        match self {
            OsType::Windows | OsType::WindowsArm64 => "natives-windows",
            OsType::MacOS | OsType::MacOSArm64 => "natives-macos",
            OsType::Linux | OsType::LinuxArm32 | OsType::LinuxArm64 => "natives-linux",
        }
    }

    /// Get the OS name as a string (for rule matching)
    pub fn as_str(&self) -> &'static str {
        match self {
            OsType::Windows | OsType::WindowsArm64 => "windows",
            OsType::Linux | OsType::LinuxArm32 | OsType::LinuxArm64 => "linux",
            OsType::MacOS | OsType::MacOSArm64 => "osx",
        }
    }

    /// Architecture as Mojang's rules spell it.
    pub fn arch_str(&self) -> &'static str {
        match self {
            OsType::WindowsArm64 | OsType::MacOSArm64 | OsType::LinuxArm64 => "arm64",
            OsType::LinuxArm32 => "arm32",
            _ => "x86_64",
        }
    }

    /// `${arch}` substitution in legacy natives classifiers.
    pub fn arch_bits(&self) -> &'static str {
        match self {
            OsType::LinuxArm32 => "32",
            _ => "64",
        }
    }

    /// Get the classpath separator for this OS
    pub fn classpath_separator(&self) -> &'static str {
        match self {
            OsType::Windows | OsType::WindowsArm64 => ";",
            _ => ":",
        }
    }
}
