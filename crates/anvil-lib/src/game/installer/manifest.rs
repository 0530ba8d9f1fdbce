//! The version manifest a loader installer writes to
//! `versions/<id>/<id>.json`, and the library references inside it.

use crate::error::{AnvilError, AnvilResult};
use crate::game::installer::config::Endpoints;
use crate::game::installer::types::ModloaderType;
use crate::game::launcher::version_parser::{Argument, Arguments};
use crate::game::maven::MavenCoordinate;
use crate::utils::hash::{file_matches_sha1, is_placeholder_hash};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Library entry as the installer sees it. Serialized in the Mojang shape so
/// other launchers can read the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawLibrary", into = "RawLibrary")]
pub struct LibraryRef {
    pub maven_name: String,
    /// Repository base; `None` means the default route for the group.
    pub repository_url: Option<String>,
    pub sha1: Option<String>,
    /// Full download URL when the vendor gives one. An empty string marks an
    /// artifact produced locally (e.g. by Forge processors).
    pub download_url: Option<String>,
    /// Repository-relative path when it differs from the coordinate layout.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawLibrary {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sha1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    downloads: Option<RawDownloads>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawDownloads {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    artifact: Option<RawArtifact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawArtifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sha1: Option<String>,
}

impl From<RawLibrary> for LibraryRef {
    fn from(raw: RawLibrary) -> Self {
        let artifact = raw.downloads.and_then(|d| d.artifact);
        match artifact {
            Some(a) => LibraryRef {
                maven_name: raw.name,
                repository_url: raw.url,
                sha1: a.sha1.or(raw.sha1),
                download_url: a.url,
                path: a.path,
            },
            None => LibraryRef {
                maven_name: raw.name,
                repository_url: raw.url,
                sha1: raw.sha1,
                download_url: None,
                path: None,
            },
        }
    }
}

impl From<LibraryRef> for RawLibrary {
    fn from(lib: LibraryRef) -> Self {
        if lib.download_url.is_some() || lib.path.is_some() {
            RawLibrary {
                name: lib.maven_name,
                url: lib.repository_url,
                sha1: None,
                downloads: Some(RawDownloads {
                    artifact: Some(RawArtifact {
                        path: lib.path,
                        url: lib.download_url,
                        sha1: lib.sha1,
                    }),
                }),
            }
        } else {
            RawLibrary {
                name: lib.maven_name,
                url: lib.repository_url,
                sha1: lib.sha1,
                downloads: None,
            }
        }
    }
}

impl LibraryRef {
    pub fn new(maven_name: impl Into<String>) -> Self {
        Self {
            maven_name: maven_name.into(),
            repository_url: None,
            sha1: None,
            download_url: None,
            path: None,
        }
    }

    pub fn with_repository(mut self, url: impl Into<String>) -> Self {
        self.repository_url = Some(url.into());
        self
    }

    pub fn with_sha1(mut self, sha1: impl Into<String>) -> Self {
        self.sha1 = Some(sha1.into());
        self
    }

    pub fn with_download_url(mut self, url: impl Into<String>) -> Self {
        self.download_url = Some(url.into());
        self
    }

    pub fn coordinate(&self) -> AnvilResult<MavenCoordinate> {
        MavenCoordinate::parse(&self.maven_name)
    }

    pub fn relative_path(&self) -> AnvilResult<String> {
        match &self.path {
            Some(p) if !p.is_empty() => Ok(p.clone()),
            _ => Ok(self.coordinate()?.to_relative_path()),
        }
    }

    pub fn local_path(&self, libraries_dir: &Path) -> AnvilResult<PathBuf> {
        let rel = self.relative_path()?;
        Ok(rel
            .split('/')
            .fold(libraries_dir.to_path_buf(), |acc, seg| acc.join(seg)))
    }

    /// Produced on this machine rather than downloaded.
    pub fn is_local_only(&self) -> bool {
        matches!(self.download_url.as_deref(), Some(""))
    }

    /// Where to download this library from, if anywhere.
    pub fn resolved_url(&self, endpoints: &Endpoints) -> AnvilResult<Option<String>> {
        match self.download_url.as_deref() {
            Some("") => Ok(None),
            Some(url) => Ok(Some(url.to_string())),
            None => {
                let coordinate = self.coordinate()?;
                let base = self
                    .repository_url
                    .as_deref()
                    .unwrap_or_else(|| endpoints.repository_for(&coordinate));
                Ok(Some(coordinate.to_repository_url(Some(base))))
            }
        }
    }

    /// `None` when the hash is absent, so the file is trusted as-is.
    pub fn checked_sha1(&self) -> Option<&str> {
        self.sha1.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// Mapping namespace a Quilt install resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingsKind {
    Intermediary,
    Hashed,
}

/// Install bookkeeping stored alongside the manifest. Validation compares
/// against it to decide whether an install predates a compatibility fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderTag {
    pub loader_type: ModloaderType,
    pub minecraft_version: String,
    #[serde(default)]
    pub loader_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mappings: Option<MappingsKind>,
    /// JVM flags the launcher must add for this install.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jvm_flags: Vec<String>,
    /// SHA1 of the vendor installer the manifest came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer_sha1: Option<String>,
    pub installed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyntheticVersionManifest {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherits_from: Option<String>,
    pub main_class: String,
    pub libraries: Vec<LibraryRef>,
    #[serde(default, skip_serializing_if = "Arguments::is_empty")]
    pub arguments: Arguments,
    /// Pre-1.13 Forge ships a full replacement argument template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minecraft_arguments: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub version_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loader_tag: Option<LoaderTag>,
}

const REQUIRED_FIELDS: &[&str] = &["id", "mainClass", "libraries"];

impl SyntheticVersionManifest {
    pub fn new(id: impl Into<String>, main_class: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inherits_from: None,
            main_class: main_class.into(),
            libraries: Vec::new(),
            arguments: Arguments::default(),
            minecraft_arguments: None,
            version_type: Some("release".to_string()),
            loader_tag: None,
        }
    }

    pub fn jvm_args(&self) -> &[Argument] {
        &self.arguments.jvm
    }

    pub fn game_args(&self) -> &[Argument] {
        &self.arguments.game
    }

    /// Parses a manifest, reporting any structural problem as
    /// [`AnvilError::VersionJsonMalformed`].
    pub fn from_json(path: &Path, text: &str) -> AnvilResult<Self> {
        let malformed = |reason: String| AnvilError::VersionJsonMalformed {
            path: path.to_path_buf(),
            reason,
        };
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| malformed(e.to_string()))?;
        for field in REQUIRED_FIELDS {
            if value.get(field).map(|v| v.is_null()).unwrap_or(true) {
                return Err(malformed(format!("missing '{}'", field)));
            }
        }
        let manifest: Self = serde_json::from_value(value).map_err(|e| malformed(e.to_string()))?;
        if manifest.id.trim().is_empty() || manifest.main_class.trim().is_empty() {
            return Err(malformed("empty id or mainClass".into()));
        }
        Ok(manifest)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Read version manifest {:?}", path))?;
        Ok(Self::from_json(path, &text)?)
    }

    /// Missing or malformed manifests read as "not installed".
    pub async fn load_optional(path: &Path) -> Option<Self> {
        if !path.is_file() {
            return None;
        }
        match Self::load(path).await {
            Ok(m) => Some(m),
            Err(e) => {
                log::debug!("Ignoring unreadable manifest {:?}: {:#}", path, e);
                None
            }
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Create version dir {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Write manifest {:?}", tmp))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Move manifest into place {:?}", path))?;
        log::debug!("Wrote version manifest {:?}", path);
        Ok(())
    }

    /// Libraries whose Maven name starts with `prefix`.
    pub fn libraries_with_prefix(&self, prefix: &str) -> usize {
        self.libraries
            .iter()
            .filter(|l| l.maven_name.starts_with(prefix))
            .count()
    }

    /// Appends a library unless one with the same version-independent id is
    /// already listed.
    pub fn push_library_unique(&mut self, library: LibraryRef) {
        let key = library
            .coordinate()
            .map(|c| c.version_independent_key())
            .unwrap_or_else(|_| library.maven_name.clone());
        let exists = self.libraries.iter().any(|l| {
            l.coordinate()
                .map(|c| c.version_independent_key() == key)
                .unwrap_or(false)
        });
        if !exists {
            self.libraries.push(library);
        }
    }

    /// Every library present on disk with a matching hash. Placeholder hashes
    /// count as stale.
    pub async fn libraries_valid(&self, libraries_dir: &Path) -> Result<bool> {
        for library in &self.libraries {
            let path = match library.local_path(libraries_dir) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("Manifest {} lists bad library: {}", self.id, e);
                    return Ok(false);
                }
            };
            if !path.is_file() {
                log::debug!("Library missing: {:?}", path);
                return Ok(false);
            }
            if let Some(sha1) = library.checked_sha1() {
                if is_placeholder_hash(sha1) || !file_matches_sha1(&path, sha1).await? {
                    log::debug!("Library hash stale: {:?}", path);
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}
