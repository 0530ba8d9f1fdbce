//! Installer-archive flow shared by Forge and NeoForge.

use super::parser::{
    ForgeLibrary, ForgeVersionInfo, InstallProfile, InstallerArchive, InstallerProfile, LegacyInstallProfile,
};
use super::processor::{ForgeProcessorEngine, ProcessorPaths};
use crate::error::AnvilError;
use crate::game::installer::config::Endpoints;
use crate::game::installer::core::library::LibraryDownloader;
use crate::game::installer::core::traits::LoaderInstaller;
use crate::game::installer::manifest::{LibraryRef, LoaderTag, SyntheticVersionManifest};
use crate::game::installer::types::{InstallSpec, LoaderDescriptor, ModloaderType, ProgressReporter};
use crate::game::installer::vanilla::ensure_vanilla;
use crate::game::installer::InstallerContext;
use crate::game::maven::{join_url, MavenCoordinate};
use crate::utils::hash::sha1_file_async;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

/// What differs between the loaders that ship an installer jar.
#[derive(Debug)]
pub struct ForgeFlavor {
    pub loader_type: ModloaderType,
    pub name: &'static str,
    pub(crate) installer_coordinate: fn(&str, &str) -> String,
    pub(crate) maven: fn(&Endpoints) -> &str,
    /// Extra check on top of the version being published.
    pub(crate) accepts: fn(&str, &str) -> bool,
}

impl ForgeFlavor {
    /// `group:artifact:version:installer` of the installer jar.
    pub fn installer_coordinate(&self, minecraft_version: &str, loader_version: &str) -> String {
        (self.installer_coordinate)(minecraft_version, loader_version)
    }

    pub fn maven_url<'e>(&self, endpoints: &'e Endpoints) -> &'e str {
        (self.maven)(endpoints)
    }
}

pub static FORGE: ForgeFlavor = ForgeFlavor {
    loader_type: ModloaderType::Forge,
    name: "Forge",
    installer_coordinate: forge_installer_coordinate,
    maven: forge_maven,
    accepts: accepts_any,
};

fn forge_installer_coordinate(mc: &str, lv: &str) -> String {
    let full = if lv.starts_with(&format!("{}-", mc)) {
        lv.to_string()
    } else {
        format!("{}-{}", mc, lv)
    };
    format!("net.minecraftforge:forge:{}:installer", full)
}

fn forge_maven(e: &Endpoints) -> &str {
    &e.forge_maven
}

fn accepts_any(_mc: &str, _lv: &str) -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct MavenMetadata {
    versioning: MavenVersioning,
}

#[derive(Debug, Deserialize)]
struct MavenVersioning {
    versions: MavenVersionList,
}

#[derive(Debug, Deserialize)]
struct MavenVersionList {
    #[serde(default)]
    version: Vec<String>,
}

/// Versions listed in a `maven-metadata.xml` document.
pub fn parse_maven_metadata(xml: &str) -> Result<Vec<String>> {
    let metadata: MavenMetadata = serde_xml_rs::from_str(xml).context("Failed to parse maven-metadata.xml")?;
    Ok(metadata.versioning.versions.version)
}

pub struct ForgeInstaller {
    flavor: &'static ForgeFlavor,
    descriptor: LoaderDescriptor,
    ctx: InstallerContext,
}

impl ForgeInstaller {
    pub fn new(flavor: &'static ForgeFlavor, descriptor: LoaderDescriptor, ctx: InstallerContext) -> Self {
        Self {
            flavor,
            descriptor,
            ctx,
        }
    }

    pub fn forge(descriptor: LoaderDescriptor, ctx: InstallerContext) -> Self {
        Self::new(&FORGE, descriptor, ctx)
    }

    pub fn flavor(&self) -> &'static ForgeFlavor {
        self.flavor
    }

    fn installer_coordinate(&self, spec: &InstallSpec) -> Result<MavenCoordinate> {
        let lv = self.descriptor.require_loader_version()?;
        Ok(MavenCoordinate::parse(
            &self.flavor.installer_coordinate(spec.minecraft_version(), lv),
        )?)
    }

    /// Installers are cached per coordinate so a reinstall never downloads
    /// them twice.
    fn installer_path(&self, spec: &InstallSpec, coordinate: &MavenCoordinate) -> PathBuf {
        spec.cache_dir()
            .join("installers")
            .join(self.flavor.loader_type.as_str())
            .join(coordinate.file_name())
    }

    async fn ensure_installer(
        &self,
        spec: &InstallSpec,
        reporter: &dyn ProgressReporter,
    ) -> Result<(PathBuf, String)> {
        let coordinate = self.installer_coordinate(spec)?;
        let path = self.installer_path(spec, &coordinate);
        let url = coordinate.to_repository_url(Some(self.flavor.maven_url(&spec.endpoints)));
        log::info!("Fetching {} installer from {}", self.flavor.name, url);
        self.ctx
            .fetcher
            .ensure(&url, &path, None, reporter)
            .await
            .with_context(|| format!("Failed to download {} installer", self.flavor.name))?;
        let sha1 = sha1_file_async(&path).await?;
        Ok((path, sha1))
    }

    async fn download_libraries(
        &self,
        spec: &InstallSpec,
        libraries: &[LibraryRef],
        reporter: Arc<dyn ProgressReporter>,
        progress_base: i32,
    ) -> Result<()> {
        // files with no URL are produced by processors or the installer
        let remote: Vec<LibraryRef> = libraries.iter().filter(|l| !l.is_local_only()).cloned().collect();
        LibraryDownloader::new(&self.ctx.fetcher, &spec.libraries_dir(), &spec.endpoints, reporter)
            .download_all(&remote, spec.concurrency, progress_base, 20)
            .await?;
        Ok(())
    }

    fn tag(&self, spec: &InstallSpec, installer_sha1: String) -> LoaderTag {
        LoaderTag {
            loader_type: self.flavor.loader_type,
            minecraft_version: spec.minecraft_version().to_string(),
            loader_version: self.descriptor.loader_version.clone(),
            mappings: None,
            jvm_flags: Vec::new(),
            installer_sha1: Some(installer_sha1),
            installed_at: chrono::Utc::now(),
        }
    }

    fn processor_paths(&self, spec: &InstallSpec, installer: PathBuf) -> ProcessorPaths {
        ProcessorPaths {
            common_dir: spec.data_dir.clone(),
            libraries_dir: spec.libraries_dir(),
            minecraft_jar: spec.vanilla_jar_path(),
            java: spec.java_path.clone().unwrap_or_else(|| PathBuf::from("java")),
            installer,
            minecraft_version: spec.minecraft_version().to_string(),
        }
    }

    /// Turns the vendor `version.json` into the manifest written under the
    /// effective id.
    pub fn build_manifest(
        &self,
        spec: &InstallSpec,
        version: &ForgeVersionInfo,
        libraries: impl IntoIterator<Item = LibraryRef>,
        installer_sha1: String,
    ) -> Result<SyntheticVersionManifest> {
        let id = self.descriptor.effective_version_id();
        let main_class = version
            .main_class
            .clone()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AnvilError::VersionJsonMalformed {
                path: PathBuf::from("version.json"),
                reason: format!("{} version.json has no mainClass", self.flavor.name),
            })?;
        if version.id != id {
            log::debug!("Installing vendor version {} as {}", version.id, id);
        }
        let mut manifest = SyntheticVersionManifest::new(id, main_class);
        manifest.inherits_from = Some(
            version
                .inherits_from
                .clone()
                .unwrap_or_else(|| spec.minecraft_version().to_string()),
        );
        for library in libraries {
            manifest.push_library_unique(library);
        }
        manifest.arguments = version.arguments.clone().unwrap_or_default();
        manifest.minecraft_arguments = version.minecraft_arguments.clone();
        manifest.loader_tag = Some(self.tag(spec, installer_sha1));
        Ok(manifest)
    }

    async fn install_modern(
        &self,
        spec: &InstallSpec,
        profile: InstallProfile,
        version: ForgeVersionInfo,
        installer: PathBuf,
        installer_sha1: String,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<SyntheticVersionManifest> {
        log::info!(
            "{} install profile spec {} with {} processors",
            self.flavor.name,
            profile.spec,
            profile.processors.len()
        );

        reporter.start_step(&format!("Extracting {} libraries", self.flavor.name), Some(6));
        let archive = InstallerArchive::new(&installer);
        let libraries_dir = spec.libraries_dir();
        tokio::task::spawn_blocking(move || archive.extract_maven_dir(&libraries_dir))
            .await
            .context("Extraction task panicked")??;

        reporter.start_step(&format!("Downloading {} libraries", self.flavor.name), Some(6));
        let installer_libs: Vec<LibraryRef> = profile
            .libraries
            .iter()
            .chain(version.libraries.iter())
            .map(ForgeLibrary::to_library_ref)
            .collect();
        self.download_libraries(spec, &installer_libs, Arc::clone(&reporter), 40)
            .await?;

        reporter.start_step(&format!("Running {} processors", self.flavor.name), Some(6));
        let paths = self.processor_paths(spec, installer.clone());
        let engine = ForgeProcessorEngine::new(&profile, paths, &self.ctx.fetcher, &spec.endpoints);
        engine.run_with_retry(&*reporter).await?;

        self.build_manifest(
            spec,
            &version,
            version.libraries.iter().map(ForgeLibrary::to_library_ref),
            installer_sha1,
        )
    }

    async fn install_legacy(
        &self,
        spec: &InstallSpec,
        legacy: LegacyInstallProfile,
        installer: PathBuf,
        installer_sha1: String,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<SyntheticVersionManifest> {
        log::info!("{} installer uses the legacy profile format", self.flavor.name);
        reporter.start_step(&format!("Extracting {} universal jar", self.flavor.name), Some(6));

        if let (Some(entry), Some(path)) = (&legacy.install.file_path, &legacy.install.path) {
            let dest = MavenCoordinate::parse(path)?.local_path(&spec.libraries_dir());
            if !dest.is_file() {
                let archive = InstallerArchive::new(&installer);
                let entry = entry.clone();
                let target = dest.clone();
                tokio::task::spawn_blocking(move || archive.extract(&entry, &target))
                    .await
                    .context("Extraction task panicked")??;
                log::debug!("Extracted universal jar to {:?}", dest);
            }
        }

        reporter.start_step(&format!("Downloading {} libraries", self.flavor.name), Some(6));
        let libraries: Vec<LibraryRef> = legacy
            .version_info
            .libraries
            .iter()
            .filter(|l| l.needed_on_client())
            .map(ForgeLibrary::to_library_ref)
            .collect();
        self.download_libraries(spec, &libraries, Arc::clone(&reporter), 40)
            .await?;

        self.build_manifest(spec, &legacy.version_info, libraries, installer_sha1)
    }

    async fn install_inner(&self, spec: &InstallSpec, reporter: Arc<dyn ProgressReporter>) -> Result<()> {
        let lv = self.descriptor.require_loader_version()?.to_string();
        log::info!(
            "Installing {} {} for Minecraft {}",
            self.flavor.name,
            lv,
            spec.minecraft_version()
        );

        reporter.start_step("Installing vanilla base", Some(6));
        ensure_vanilla(spec, &self.ctx, Arc::clone(&reporter)).await?;

        reporter.start_step(&format!("Downloading {} installer", self.flavor.name), Some(6));
        let (installer, installer_sha1) = self.ensure_installer(spec, &*reporter).await?;
        let archive = InstallerArchive::new(&installer);
        let profile = tokio::task::spawn_blocking(move || archive.read_profile())
            .await
            .context("Profile task panicked")??;

        let manifest = match profile {
            InstallerProfile::Modern { profile, version } => {
                self.install_modern(spec, profile, version, installer, installer_sha1, Arc::clone(&reporter))
                    .await?
            }
            InstallerProfile::Legacy(legacy) => {
                self.install_legacy(spec, legacy, installer, installer_sha1, Arc::clone(&reporter))
                    .await?
            }
        };

        reporter.start_step(&format!("Writing {} manifest", self.flavor.name), Some(6));
        if !manifest.libraries_valid(&spec.libraries_dir()).await? {
            return Err(AnvilError::InstallationCorrupted {
                version_id: manifest.id.clone(),
                reason: "libraries missing after install".into(),
            }
            .into());
        }
        manifest.save(&spec.version_json_path(&manifest.id)).await?;

        reporter.set_percent(100);
        log::info!("{} installation completed: {}", self.flavor.name, manifest.id);
        Ok(())
    }

    async fn validate_inner(&self, spec: &InstallSpec) -> Result<bool> {
        let id = self.descriptor.effective_version_id();
        let Some(manifest) = SyntheticVersionManifest::load_optional(&spec.version_json_path(&id)).await
        else {
            return Ok(false);
        };
        let Some(tag) = manifest.loader_tag.as_ref() else {
            log::info!("{} manifest {} has no loader tag, reinstalling", self.flavor.name, id);
            return Ok(false);
        };
        if tag.loader_version != self.descriptor.loader_version {
            return Ok(false);
        }
        if !manifest.libraries_valid(&spec.libraries_dir()).await? {
            return Ok(false);
        }

        let coordinate = self.installer_coordinate(spec)?;
        let installer = self.installer_path(spec, &coordinate);
        if !installer.is_file() {
            // nothing to compare against; the manifest and libraries stand on their own
            return Ok(true);
        }
        let sha1 = sha1_file_async(&installer).await?;
        if tag.installer_sha1.as_deref() != Some(sha1.as_str()) {
            log::info!("{} installer changed since {} was installed", self.flavor.name, id);
            return Ok(false);
        }

        let archive = InstallerArchive::new(&installer);
        let profile = match tokio::task::spawn_blocking(move || archive.read_profile()).await {
            Ok(Ok(profile)) => profile,
            _ => return Ok(false),
        };
        if let InstallerProfile::Modern { profile, .. } = profile {
            let paths = self.processor_paths(spec, installer.clone());
            let engine = ForgeProcessorEngine::new(&profile, paths, &self.ctx.fetcher, &spec.endpoints);
            if let Some(missing) = engine.expected_outputs().into_iter().find(|p| !p.is_file()) {
                log::info!("Processor output {:?} missing for {}", missing, id);
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn check_inner(&self, spec: &InstallSpec) -> Result<()> {
        let mc = spec.minecraft_version();
        let lv = self.descriptor.require_loader_version()?;
        let coordinate = self.installer_coordinate(spec)?;
        let url = join_url(
            self.flavor.maven_url(&spec.endpoints),
            &format!(
                "{}/{}/maven-metadata.xml",
                coordinate.group.replace('.', "/"),
                coordinate.artifact
            ),
        );
        let xml = self
            .ctx
            .fetcher
            .fetch_text(&url)
            .await
            .with_context(|| format!("Failed to fetch {} version list", self.flavor.name))?;
        let versions = parse_maven_metadata(&xml)?;
        if versions.iter().any(|v| *v == coordinate.version) && (self.flavor.accepts)(mc, lv) {
            Ok(())
        } else {
            Err(AnvilError::IncompatibleVersion {
                loader: format!("{} {}", self.flavor.name, lv),
                minecraft_version: mc.to_string(),
            }
            .into())
        }
    }
}

impl LoaderInstaller for ForgeInstaller {
    fn descriptor(&self) -> &LoaderDescriptor {
        &self.descriptor
    }

    fn check_compatibility<'a>(&'a self, spec: &'a InstallSpec) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.check_inner(spec))
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
