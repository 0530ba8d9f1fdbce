//! Centralized installer settings.
//! Static endpoints and tunables; [`Endpoints`] lets callers (and tests) point
//! the installers somewhere else.

use crate::game::maven::{MavenCoordinate, RepositoryRoute};
use std::time::Duration;

pub const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Attempts per artifact before giving up with `DownloadExhausted`.
pub const DOWNLOAD_ATTEMPTS: u32 = 3;

/// Backoff base in milliseconds; the real delay is `base * attempt` with the
/// base drawn from this range.
pub const RETRY_BASE_MS: std::ops::Range<u64> = 1000..2000;

pub const PROCESSOR_TIMEOUT_SECS: u64 = 300;

/// Parallel library downloads per install.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// How long a meta-API game version list stays fresh.
pub const GAME_VERSION_CACHE_TTL_MINUTES: i64 = 30;

pub fn current_timeout() -> Duration {
    Duration::from_secs(REQUEST_TIMEOUT_SECS)
}

// URL Constants
pub const VANILLA_MANIFEST_URL: &str =
    "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";
pub const FABRIC_META_URL: &str = "https://meta.fabricmc.net/v2";
pub const FABRIC_MAVEN_URL: &str = "https://maven.fabricmc.net/";
pub const QUILT_META_URL: &str = "https://meta.quiltmc.org/v3";
pub const QUILT_MAVEN_URL: &str = "https://maven.quiltmc.org/repository/release/";
pub const NEOFORGE_MAVEN_URL: &str = "https://maven.neoforged.net/releases/";
pub const FORGE_MAVEN_URL: &str = "https://maven.minecraftforge.net/";
pub const MOJANG_LIBRARIES_URL: &str = "https://libraries.minecraft.net/";
pub const MAVEN_CENTRAL_URL: &str = "https://repo1.maven.org/maven2/";

/// Every remote base URL the installers talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub vanilla_manifest: String,
    pub fabric_meta: String,
    pub fabric_maven: String,
    pub quilt_meta: String,
    pub quilt_maven: String,
    pub forge_maven: String,
    pub neoforge_maven: String,
    pub mojang_libraries: String,
    pub maven_central: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            vanilla_manifest: VANILLA_MANIFEST_URL.to_string(),
            fabric_meta: FABRIC_META_URL.to_string(),
            fabric_maven: FABRIC_MAVEN_URL.to_string(),
            quilt_meta: QUILT_META_URL.to_string(),
            quilt_maven: QUILT_MAVEN_URL.to_string(),
            forge_maven: FORGE_MAVEN_URL.to_string(),
            neoforge_maven: NEOFORGE_MAVEN_URL.to_string(),
            mojang_libraries: MOJANG_LIBRARIES_URL.to_string(),
            maven_central: MAVEN_CENTRAL_URL.to_string(),
        }
    }
}

impl Endpoints {
    /// All endpoints rooted at one server, laid out as `<base>/<service>/`.
    pub fn mirrored_at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            vanilla_manifest: format!("{}/mojang/version_manifest_v2.json", base),
            fabric_meta: format!("{}/fabric-meta/v2", base),
            fabric_maven: format!("{}/fabric-maven/", base),
            quilt_meta: format!("{}/quilt-meta/v3", base),
            quilt_maven: format!("{}/quilt-maven/", base),
            forge_maven: format!("{}/forge-maven/", base),
            neoforge_maven: format!("{}/neoforge-maven/", base),
            mojang_libraries: format!("{}/mojang-libraries/", base),
            maven_central: format!("{}/central/", base),
        }
    }

    /// Repository a coordinate is fetched from when its library names none.
    pub fn repository_for(&self, coordinate: &MavenCoordinate) -> &str {
        match coordinate.route() {
            RepositoryRoute::NeoForge => &self.neoforge_maven,
            RepositoryRoute::Forge => &self.forge_maven,
            RepositoryRoute::Mojang => &self.mojang_libraries,
            RepositoryRoute::Central => &self.maven_central,
        }
    }

    /// Vendor repositories searched for Forge processor jars, in order.
    pub fn vendor_repositories(&self) -> [&str; 2] {
        [&self.forge_maven, &self.neoforge_maven]
    }
}
