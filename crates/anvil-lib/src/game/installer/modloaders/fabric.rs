//! Fabric, and the meta-API install flow Quilt shares with it.

use super::quilt;
use crate::error::AnvilError;
use crate::game::installer::config::Endpoints;
use crate::game::installer::core::library::LibraryDownloader;
use crate::game::installer::core::traits::LoaderInstaller;
use crate::game::installer::manifest::{LibraryRef, LoaderTag, MappingsKind, SyntheticVersionManifest};
use crate::game::installer::types::{InstallSpec, LoaderDescriptor, ModloaderType, ProgressReporter};
use crate::game::installer::vanilla::ensure_vanilla;
use crate::game::installer::InstallerContext;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

pub const FABRIC_KNOT_CLIENT: &str = "net.fabricmc.loader.launch.knot.KnotClient";

/// What differs between the loaders served by a Fabric-style meta API.
#[derive(Debug)]
pub struct KnotFlavor {
    pub loader_type: ModloaderType,
    pub name: &'static str,
    /// Maven name prefix of the loader's own jar.
    pub loader_prefix: &'static str,
    pub main_class: &'static str,
    pub(crate) meta: fn(&Endpoints) -> &str,
    pub(crate) maven: fn(&Endpoints) -> &str,
}

impl KnotFlavor {
    pub fn meta_url<'e>(&self, endpoints: &'e Endpoints) -> &'e str {
        (self.meta)(endpoints)
    }

    pub fn maven_url<'e>(&self, endpoints: &'e Endpoints) -> &'e str {
        (self.maven)(endpoints)
    }
}

pub static FABRIC: KnotFlavor = KnotFlavor {
    loader_type: ModloaderType::Fabric,
    name: "Fabric",
    loader_prefix: "net.fabricmc:fabric-loader:",
    main_class: FABRIC_KNOT_CLIENT,
    meta: fabric_meta,
    maven: fabric_maven,
};

fn fabric_meta(e: &Endpoints) -> &str {
    &e.fabric_meta
}

fn fabric_maven(e: &Endpoints) -> &str {
    &e.fabric_maven
}

/// `/versions/loader/<mc>/<loader>` response.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderProfile {
    pub loader: MetaArtifact,
    #[serde(default)]
    pub intermediary: Option<MetaArtifact>,
    #[serde(default)]
    pub hashed: Option<MetaArtifact>,
    #[serde(default)]
    pub launcher_meta: LauncherMeta,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetaArtifact {
    pub maven: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LauncherMeta {
    #[serde(default)]
    pub libraries: MetaLibraries,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MetaLibraries {
    #[serde(default)]
    pub common: Vec<MetaLibrary>,
    #[serde(default)]
    pub client: Vec<MetaLibrary>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetaLibrary {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub sha1: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GameVersion {
    version: String,
}

/// Mapping artifact chosen for an install, plus any JVM flags it needs.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingsChoice {
    pub library: LibraryRef,
    pub kind: MappingsKind,
    pub jvm_flags: Vec<String>,
}

pub struct KnotInstaller {
    flavor: &'static KnotFlavor,
    descriptor: LoaderDescriptor,
    ctx: InstallerContext,
}

/// Fabric is the Knot installer with the Fabric flavor.
pub type FabricInstaller = KnotInstaller;

impl KnotInstaller {
    pub fn new(flavor: &'static KnotFlavor, descriptor: LoaderDescriptor, ctx: InstallerContext) -> Self {
        Self {
            flavor,
            descriptor,
            ctx,
        }
    }

    pub fn fabric(descriptor: LoaderDescriptor, ctx: InstallerContext) -> Self {
        Self::new(&FABRIC, descriptor, ctx)
    }

    pub fn flavor(&self) -> &'static KnotFlavor {
        self.flavor
    }

    async fn game_versions(&self, spec: &InstallSpec) -> Result<Arc<Vec<String>>> {
        let url = format!("{}/versions/game", self.flavor.meta_url(&spec.endpoints));
        let fetcher = &self.ctx.fetcher;
        self.ctx
            .game_versions
            .get_or_try_fetch(url.clone(), || async {
                let versions: Vec<GameVersion> = fetcher
                    .fetch_json(&url)
                    .await
                    .with_context(|| format!("Failed to fetch {} game versions", self.flavor.name))?;
                Ok::<_, anyhow::Error>(Arc::new(versions.into_iter().map(|v| v.version).collect()))
            })
            .await
    }

    async fn fetch_profile(&self, spec: &InstallSpec, loader_version: &str) -> Result<LoaderProfile> {
        let mc = spec.minecraft_version();
        let cache_path = profile_cache_path(spec, self.flavor, loader_version);
        if cache_path.is_file() {
            let text = fs::read_to_string(&cache_path).await?;
            match serde_json::from_str(&text) {
                Ok(profile) => return Ok(profile),
                Err(e) => log::warn!("Discarding cached {} profile: {}", self.flavor.name, e),
            }
        }

        let url = format!(
            "{}/versions/loader/{}/{}",
            self.flavor.meta_url(&spec.endpoints),
            mc,
            loader_version
        );
        let text = self
            .ctx
            .fetcher
            .fetch_text(&url)
            .await
            .with_context(|| format!("Failed to download {} profile", self.flavor.name))?;
        let profile: LoaderProfile = serde_json::from_str(&text)
            .with_context(|| format!("Malformed {} profile from {}", self.flavor.name, url))?;
        if let Some(parent) = cache_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&cache_path, &text).await?;
        Ok(profile)
    }

    fn choose_mappings(&self, profile: &LoaderProfile, endpoints: &Endpoints) -> Result<MappingsChoice> {
        match self.flavor.loader_type {
            ModloaderType::Quilt => quilt::choose_mappings(profile, endpoints),
            _ => {
                let intermediary = profile
                    .intermediary
                    .as_ref()
                    .context("Profile has no intermediary mappings")?;
                Ok(MappingsChoice {
                    library: LibraryRef::new(&intermediary.maven)
                        .with_repository(&endpoints.fabric_maven),
                    kind: MappingsKind::Intermediary,
                    jvm_flags: Vec::new(),
                })
            }
        }
    }

    /// Builds the manifest from a meta profile. The meta API leaves the
    /// loader and mappings jars out of its library list, so they are added
    /// here.
    pub fn build_manifest(
        &self,
        spec: &InstallSpec,
        loader_version: &str,
        profile: &LoaderProfile,
    ) -> Result<SyntheticVersionManifest> {
        let endpoints = &spec.endpoints;
        let mc = spec.minecraft_version();
        let mut manifest =
            SyntheticVersionManifest::new(self.descriptor.effective_version_id(), self.flavor.main_class);
        manifest.inherits_from = Some(mc.to_string());

        let meta_libs = &profile.launcher_meta.libraries;
        for lib in meta_libs.common.iter().chain(meta_libs.client.iter()) {
            let mut library = LibraryRef::new(&lib.name);
            library.repository_url = lib.url.clone();
            library.sha1 = lib.sha1.clone();
            manifest.push_library_unique(library);
        }

        let mappings = self.choose_mappings(profile, endpoints)?;
        manifest.push_library_unique(
            LibraryRef::new(&profile.loader.maven).with_repository(self.flavor.maven_url(endpoints)),
        );
        manifest.push_library_unique(mappings.library.clone());

        assert_single_loader(&manifest, self.flavor.loader_prefix)?;

        manifest.loader_tag = Some(LoaderTag {
            loader_type: self.flavor.loader_type,
            minecraft_version: mc.to_string(),
            loader_version: Some(loader_version.to_string()),
            mappings: Some(mappings.kind),
            jvm_flags: mappings.jvm_flags,
            installer_sha1: None,
            installed_at: chrono::Utc::now(),
        });
        Ok(manifest)
    }

    fn loader_jar(&self, spec: &InstallSpec, manifest: &SyntheticVersionManifest) -> Result<PathBuf> {
        let loader = manifest
            .libraries
            .iter()
            .find(|l| l.maven_name.starts_with(self.flavor.loader_prefix))
            .ok_or_else(|| AnvilError::InstallationCorrupted {
                version_id: manifest.id.clone(),
                reason: format!("no {} library in manifest", self.flavor.loader_prefix),
            })?;
        Ok(loader.local_path(&spec.libraries_dir())?)
    }

    async fn install_inner(&self, spec: &InstallSpec, reporter: Arc<dyn ProgressReporter>) -> Result<()> {
        let loader_version = self.descriptor.require_loader_version()?.to_string();
        let name = self.flavor.name;
        log::info!(
            "Installing {} {} for Minecraft {}",
            name,
            loader_version,
            spec.minecraft_version()
        );

        reporter.start_step("Installing vanilla base", Some(5));
        ensure_vanilla(spec, &self.ctx, Arc::clone(&reporter)).await?;

        reporter.start_step(&format!("Downloading {} profile", name), Some(5));
        let profile = self.fetch_profile(spec, &loader_version).await?;
        let manifest = self.build_manifest(spec, &loader_version, &profile)?;

        reporter.start_step(&format!("Writing {} manifest", name), Some(5));
        let json_path = spec.version_json_path(&manifest.id);
        manifest.save(&json_path).await?;

        reporter.start_step(&format!("Downloading {} libraries", name), Some(5));
        LibraryDownloader::new(
            &self.ctx.fetcher,
            &spec.libraries_dir(),
            &spec.endpoints,
            Arc::clone(&reporter),
        )
        .download_all(&manifest.libraries, spec.concurrency, 60, 35)
        .await?;

        reporter.start_step(&format!("Verifying {} loader", name), Some(5));
        let jar = self.loader_jar(spec, &manifest)?;
        verify_entry_point(&jar, self.flavor.main_class).await?;

        reporter.set_percent(100);
        log::info!("{} installation completed: {}", name, manifest.id);
        Ok(())
    }

    async fn validate_inner(&self, spec: &InstallSpec) -> Result<bool> {
        let id = self.descriptor.effective_version_id();
        let Some(manifest) = SyntheticVersionManifest::load_optional(&spec.version_json_path(&id)).await
        else {
            return Ok(false);
        };
        if manifest.libraries_with_prefix(self.flavor.loader_prefix) != 1 {
            log::info!("{} manifest {} lacks its loader library", self.flavor.name, id);
            return Ok(false);
        }
        let Some(tag) = manifest.loader_tag.as_ref() else {
            log::info!("{} manifest {} predates loader tags, reinstalling", self.flavor.name, id);
            return Ok(false);
        };
        if tag.loader_version.as_deref() != self.descriptor.loader_version.as_deref() {
            return Ok(false);
        }
        if self.flavor.loader_type == ModloaderType::Quilt && !quilt::tag_is_current(tag) {
            log::info!("Quilt manifest {} is missing mapping compatibility data", id);
            return Ok(false);
        }
        if !manifest.libraries_valid(&spec.libraries_dir()).await? {
            return Ok(false);
        }
        let jar = self.loader_jar(spec, &manifest)?;
        Ok(verify_entry_point(&jar, self.flavor.main_class).await.is_ok())
    }
}

impl LoaderInstaller for KnotInstaller {
    fn descriptor(&self) -> &LoaderDescriptor {
        &self.descriptor
    }

    fn check_compatibility<'a>(&'a self, spec: &'a InstallSpec) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let versions = self.game_versions(spec).await?;
            let mc = spec.minecraft_version();
            if versions.iter().any(|v| v == mc) {
                Ok(())
            } else {
                Err(AnvilError::IncompatibleVersion {
                    loader: self.flavor.name.to_string(),
                    minecraft_version: mc.to_string(),
                }
                .into())
            }
        })
    }

    fn validate_installation<'a>(&'a self, spec: &'a InstallSpec) -> BoxFuture<'a, Result<bool>> {
        Box::pin(self.validate_inner(spec))
    }

    fn install<'a>(
        &'a self,
        spec: &'a InstallSpec,
        reporter: Arc<dyn ProgressReporter>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.install_inner(spec, reporter))
    }
}

fn profile_cache_path(spec: &InstallSpec, flavor: &KnotFlavor, loader_version: &str) -> PathBuf {
    spec.cache_dir()
        .join("loader_profiles")
        .join(flavor.loader_type.as_str())
        .join(spec.minecraft_version())
        .join(format!("{}.json", loader_version))
}

/// Exactly one loader library must be listed.
pub fn assert_single_loader(manifest: &SyntheticVersionManifest, prefix: &str) -> Result<(), AnvilError> {
    let count = manifest.libraries_with_prefix(prefix);
    if count == 1 {
        Ok(())
    } else {
        Err(AnvilError::InstallationCorrupted {
            version_id: manifest.id.clone(),
            reason: format!("expected one {} library, found {}", prefix, count),
        })
    }
}

/// Fails with `EntryPointMissing` unless `jar` contains `main_class`.
pub async fn verify_entry_point(jar: &Path, main_class: &str) -> Result<()> {
    let entry = format!("{}.class", main_class.replace('.', "/"));
    let jar_path = jar.to_path_buf();
    let found = tokio::task::spawn_blocking(move || -> Result<bool> {
        let file = std::fs::File::open(&jar_path)
            .with_context(|| format!("Open loader jar {:?}", jar_path))?;
        let archive = match zip::ZipArchive::new(file) {
            Ok(a) => a,
            Err(e) => {
                log::warn!("Loader jar {:?} is not a valid archive: {}", jar_path, e);
                return Ok(false);
            }
        };
        let found = archive.file_names().any(|n| n == entry);
        Ok(found)
    })
    .await
    .context("Jar inspection task panicked")??;

    if found {
        Ok(())
    } else {
        Err(AnvilError::EntryPointMissing {
            jar: jar.to_path_buf(),
            class: main_class.to_string(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::find_anvil_error;
    use std::io::Write;
    use tempfile::tempdir;

    fn profile() -> LoaderProfile {
        serde_json::from_str(
            r#"{
            "loader": {"maven": "net.fabricmc:fabric-loader:0.15.0", "version": "0.15.0"},
            "intermediary": {"maven": "net.fabricmc:intermediary:1.20.1", "version": "1.20.1"},
            "launcherMeta": {"version": 1, "libraries": {
                "client": [],
                "common": [{"name": "net.fabricmc:sponge-mixin:0.12.5+mixin.0.8.5", "url": "https://maven.fabricmc.net/"}],
                "server": []
            }, "mainClass": {"client": "net.fabricmc.loader.impl.launch.knot.KnotClient"}}
        }"#,
        )
        .unwrap()
    }

    fn installer(tmp: &Path) -> (KnotInstaller, InstallSpec) {
        let descriptor = LoaderDescriptor::new(ModloaderType::Fabric, "1.20.1", "0.15.0");
        let spec = InstallSpec::new(descriptor.clone(), tmp.to_path_buf());
        (KnotInstaller::fabric(descriptor, InstallerContext::new().unwrap()), spec)
    }

    #[test]
    fn manifest_appends_loader_and_intermediary() {
        let tmp = tempdir().unwrap();
        let (installer, spec) = installer(tmp.path());
        let manifest = installer.build_manifest(&spec, "0.15.0", &profile()).unwrap();

        assert_eq!(manifest.id, "fabric-loader-0.15.0-1.20.1");
        assert_eq!(manifest.main_class, FABRIC_KNOT_CLIENT);
        assert_eq!(manifest.inherits_from.as_deref(), Some("1.20.1"));
        assert_eq!(manifest.libraries_with_prefix("net.fabricmc:fabric-loader:"), 1);
        assert_eq!(manifest.libraries_with_prefix("net.fabricmc:intermediary:"), 1);
        assert_eq!(manifest.libraries.len(), 3);
        let tag = manifest.loader_tag.unwrap();
        assert_eq!(tag.mappings, Some(MappingsKind::Intermediary));
    }

    #[test]
    fn missing_loader_library_is_corruption() {
        let mut manifest = SyntheticVersionManifest::new("fabric-loader-0.15.0-1.20.1", FABRIC_KNOT_CLIENT);
        manifest.libraries.push(LibraryRef::new("net.fabricmc:intermediary:1.20.1"));
        let err = assert_single_loader(&manifest, FABRIC.loader_prefix).unwrap_err();
        assert!(matches!(err, AnvilError::InstallationCorrupted { .. }));
        assert!(err.to_string().contains("reinstall"));
    }

    #[tokio::test]
    async fn entry_point_must_be_in_jar() {
        let tmp = tempdir().unwrap();
        let jar = tmp.path().join("loader.jar");
        {
            let mut zip = zip::ZipWriter::new(std::fs::File::create(&jar).unwrap());
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("net/fabricmc/loader/launch/knot/KnotClient.class", options)
                .unwrap();
            zip.write_all(b"\xCA\xFE\xBA\xBE").unwrap();
            zip.finish().unwrap();
        }
        verify_entry_point(&jar, FABRIC_KNOT_CLIENT).await.unwrap();

        let err = verify_entry_point(&jar, quilt::QUILT_KNOT_CLIENT).await.unwrap_err();
        assert!(matches!(
            find_anvil_error(&err),
            Some(AnvilError::EntryPointMissing { .. })
        ));
    }

    #[tokio::test]
    async fn validation_rejects_untagged_manifest() {
        let tmp = tempdir().unwrap();
        let (installer, spec) = installer(tmp.path());
        let mut manifest = installer.build_manifest(&spec, "0.15.0", &profile()).unwrap();
        manifest.loader_tag = None;
        manifest
            .save(&spec.version_json_path(&manifest.id))
            .await
            .unwrap();
        assert!(!installer.validate_installation(&spec).await.unwrap());
    }
}
