//! Forge/NeoForge installer archives and the JSON they carry.

use crate::game::installer::manifest::LibraryRef;
use crate::game::launcher::version_parser::Arguments;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForgeLibrary {
    pub name: String,
    #[serde(default)]
    pub downloads: Option<ForgeLibraryDownloads>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub checksums: Option<Vec<String>>,
    /// Legacy profiles only: needed by the client.
    #[serde(default)]
    pub clientreq: Option<bool>,
    #[serde(default)]
    pub serverreq: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForgeLibraryDownloads {
    #[serde(default)]
    pub artifact: Option<ForgeArtifact>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForgeArtifact {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub sha1: String,
    #[serde(default)]
    pub path: Option<String>,
}

impl ForgeLibrary {
    pub fn to_library_ref(&self) -> LibraryRef {
        let artifact = self.downloads.as_ref().and_then(|d| d.artifact.as_ref());
        let sha1 = artifact
            .map(|a| a.sha1.clone())
            .filter(|s| !s.is_empty())
            .or_else(|| self.checksums.as_ref().and_then(|c| c.first().cloned()));
        LibraryRef {
            maven_name: self.name.clone(),
            repository_url: self.url.clone().filter(|u| !u.is_empty()),
            sha1,
            download_url: artifact.map(|a| a.url.clone()),
            path: artifact.and_then(|a| a.path.clone()),
        }
    }

    /// Legacy libraries marked server-only are skipped on the client.
    pub fn needed_on_client(&self) -> bool {
        match (self.clientreq, self.serverreq) {
            (Some(client), _) => client,
            (None, Some(true)) => false,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SidedDataEntry {
    #[serde(default)]
    pub client: String,
    #[serde(default)]
    pub server: String,
}

/// One external program from `install_profile.json`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessorSpec {
    pub jar: String,
    #[serde(default)]
    pub classpath: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Output path template to expected SHA1 (or a placeholder).
    #[serde(default)]
    pub outputs: HashMap<String, String>,
    #[serde(default)]
    pub sides: Option<Vec<String>>,
}

impl ProcessorSpec {
    pub fn applies_to_client(&self) -> bool {
        match &self.sides {
            Some(sides) => sides.iter().any(|s| s == "client"),
            None => true,
        }
    }
}

/// Modern (1.13+) `install_profile.json`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallProfile {
    #[serde(default)]
    pub spec: i32,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub minecraft: Option<String>,
    #[serde(default)]
    pub data: HashMap<String, SidedDataEntry>,
    #[serde(default)]
    pub processors: Vec<ProcessorSpec>,
    #[serde(default)]
    pub libraries: Vec<ForgeLibrary>,
}

impl InstallProfile {
    pub fn client_processors(&self) -> Vec<&ProcessorSpec> {
        self.processors
            .iter()
            .filter(|p| p.applies_to_client())
            .collect()
    }
}

/// The vendor `version.json`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgeVersionInfo {
    pub id: String,
    #[serde(default)]
    pub inherits_from: Option<String>,
    #[serde(default)]
    pub main_class: Option<String>,
    #[serde(default)]
    pub arguments: Option<Arguments>,
    #[serde(default)]
    pub minecraft_arguments: Option<String>,
    #[serde(default)]
    pub libraries: Vec<ForgeLibrary>,
}

/// Pre-1.13 installers put everything in one `install_profile.json`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LegacyInstallProfile {
    pub install: LegacyInstallSection,
    #[serde(rename = "versionInfo")]
    pub version_info: ForgeVersionInfo,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LegacyInstallSection {
    #[serde(rename = "filePath")]
    pub file_path: Option<String>,
    /// Maven name of the universal jar.
    pub path: Option<String>,
}

#[derive(Debug, Clone)]
pub enum InstallerProfile {
    Modern {
        profile: InstallProfile,
        version: ForgeVersionInfo,
    },
    Legacy(LegacyInstallProfile),
}

/// Read access to an installer jar. All methods are blocking; async callers
/// go through `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct InstallerArchive {
    path: PathBuf,
}

impl InstallerArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<zip::ZipArchive<std::fs::File>> {
        let file = std::fs::File::open(&self.path)
            .with_context(|| format!("Failed to open installer {:?}", self.path))?;
        zip::ZipArchive::new(file)
            .with_context(|| format!("Failed to read installer {:?} as ZIP", self.path))
    }

    pub fn has_entry(&self, name: &str) -> Result<bool> {
        let archive = self.open()?;
        let found = archive.file_names().any(|n| n == name);
        Ok(found)
    }

    pub fn read_string(&self, name: &str) -> Result<String> {
        let mut archive = self.open()?;
        let mut entry = archive
            .by_name(name)
            .with_context(|| format!("{} not found in installer", name))?;
        let mut text = String::new();
        entry
            .read_to_string(&mut text)
            .with_context(|| format!("Failed to read {} from installer", name))?;
        Ok(text)
    }

    /// Copies one entry out to `dest`, creating parent directories.
    pub fn extract(&self, name: &str, dest: &Path) -> Result<()> {
        let mut archive = self.open()?;
        let mut entry = archive
            .by_name(name)
            .with_context(|| format!("{} not found in installer", name))?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(dest)
            .with_context(|| format!("Failed to create {:?}", dest))?;
        std::io::copy(&mut entry, &mut out)?;
        Ok(())
    }

    /// Extracts the embedded `maven/` tree into the libraries directory.
    /// Existing files are left untouched.
    pub fn extract_maven_dir(&self, libraries_dir: &Path) -> Result<Vec<String>> {
        let mut archive = self.open()?;
        let mut extracted = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let Some(rel) = entry.name().strip_prefix("maven/").map(str::to_string) else {
                continue;
            };
            let Some(enclosed) = entry.enclosed_name() else {
                log::warn!("Skipping unsafe installer entry {}", entry.name());
                continue;
            };
            let dest = libraries_dir.join(enclosed.strip_prefix("maven").unwrap_or(&enclosed));
            if dest.is_file() {
                continue;
            }
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = std::fs::File::create(&dest)?;
            std::io::copy(&mut entry, &mut out)?;
            extracted.push(rel);
        }
        log::debug!("Extracted {} embedded libraries", extracted.len());
        Ok(extracted)
    }

    pub fn read_profile(&self) -> Result<InstallerProfile> {
        let profile_json = self.read_string("install_profile.json")?;
        let value: serde_json::Value =
            serde_json::from_str(&profile_json).context("Failed to parse install_profile.json")?;

        if value.get("install").is_some() && value.get("versionInfo").is_some() {
            let legacy: LegacyInstallProfile = serde_json::from_value(value)
                .context("Failed to parse legacy install_profile.json")?;
            return Ok(InstallerProfile::Legacy(legacy));
        }

        let profile: InstallProfile =
            serde_json::from_value(value).context("Failed to parse install_profile.json")?;
        let version: ForgeVersionInfo = serde_json::from_str(&self.read_string("version.json")?)
            .context("Failed to parse version.json")?;
        log::debug!(
            "Parsed install profile: spec={}, processors={}",
            profile.spec,
            profile.processors.len()
        );
        Ok(InstallerProfile::Modern { profile, version })
    }
}

/// Extract Main-Class from JAR manifest
pub fn extract_main_class_from_jar(jar_path: &Path) -> Result<String> {
    let file = std::fs::File::open(jar_path).context("Failed to open JAR file")?;
    let mut archive = zip::ZipArchive::new(file).context("Failed to read JAR as ZIP")?;

    let mut manifest_file = archive
        .by_name("META-INF/MANIFEST.MF")
        .context("MANIFEST.MF not found in JAR")?;

    let mut manifest_content = String::new();
    manifest_file
        .read_to_string(&mut manifest_content)
        .context("Failed to read MANIFEST.MF")?;

    for line in manifest_content.lines() {
        if let Some(rest) = line.strip_prefix("Main-Class:") {
            return Ok(rest.trim().to_string());
        }
    }

    anyhow::bail!("Main-Class attribute not found in manifest")
}


#[cfg(test)]
mod tests {
    use super::test_support::write_zip;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reads_modern_profile() {
        let tmp = tempdir().unwrap();
        let jar = tmp.path().join("installer.jar");
        write_zip(
            &jar,
            &[
                (
                    "install_profile.json",
                    br#"{"spec":1,"version":"1.20.1-forge-47.2.0","minecraft":"1.20.1",
                        "data":{"SIDE":{"client":"client","server":"server"}},
                        "processors":[{"jar":"a:b:1","classpath":[],"args":[],"sides":["server"]},
                                      {"jar":"a:c:1","classpath":[],"args":[]}],
                        "libraries":[]}"#,
                ),
                (
                    "version.json",
                    br#"{"id":"1.20.1-forge-47.2.0","inheritsFrom":"1.20.1",
                        "mainClass":"cpw.mods.bootstraplauncher.BootstrapLauncher","libraries":[]}"#,
                ),
                ("maven/a/b/1/b-1.jar", b"jar"),
            ],
        );
        let archive = InstallerArchive::new(&jar);
        match archive.read_profile().unwrap() {
            InstallerProfile::Modern { profile, version } => {
                assert_eq!(profile.client_processors().len(), 1);
                assert_eq!(version.inherits_from.as_deref(), Some("1.20.1"));
            }
            InstallerProfile::Legacy(_) => panic!("expected modern profile"),
        }

        let libs = tmp.path().join("libraries");
        let extracted = archive.extract_maven_dir(&libs).unwrap();
        assert_eq!(extracted, vec!["a/b/1/b-1.jar".to_string()]);
        assert!(libs.join("a/b/1/b-1.jar").is_file());
    }

    #[test]
    fn reads_legacy_profile() {
        let tmp = tempdir().unwrap();
        let jar = tmp.path().join("installer.jar");
        write_zip(
            &jar,
            &[(
                "install_profile.json",
                br#"{"install":{"filePath":"forge-1.12.2-14.23.5.2859-universal.jar",
                                "path":"net.minecraftforge:forge:1.12.2-14.23.5.2859"},
                     "versionInfo":{"id":"1.12.2-forge-14.23.5.2859","inheritsFrom":"1.12.2",
                        "mainClass":"net.minecraft.launchwrapper.Launch",
                        "minecraftArguments":"--tweakClass net.minecraftforge.fml.common.launcher.FMLTweaker",
                        "libraries":[{"name":"net.minecraft:launchwrapper:1.12","clientreq":true},
                                     {"name":"com.typesafe:config:1.2.1","serverreq":true}]}}"#,
            )],
        );
        match InstallerArchive::new(&jar).read_profile().unwrap() {
            InstallerProfile::Legacy(legacy) => {
                let libs = &legacy.version_info.libraries;
                assert!(libs[0].needed_on_client());
                assert!(!libs[1].needed_on_client());
            }
            InstallerProfile::Modern { .. } => panic!("expected legacy profile"),
        }
    }

    #[test]
    fn finds_main_class() {
        let tmp = tempdir().unwrap();
        let jar = tmp.path().join("tool.jar");
        write_zip(
            &jar,
            &[(
                "META-INF/MANIFEST.MF",
                b"Manifest-Version: 1.0\r\nMain-Class: net.minecraftforge.binarypatcher.ConsoleTool\r\n",
            )],
        );
        assert_eq!(
            extract_main_class_from_jar(&jar).unwrap(),
            "net.minecraftforge.binarypatcher.ConsoleTool"
        );
    }

    #[test]
    fn empty_url_marks_generated_library() {
        let lib: ForgeLibrary = serde_json::from_str(
            r#"{"name":"net.minecraftforge:forge:1.20.1-47.2.0:client",
                "downloads":{"artifact":{"path":"net/minecraftforge/forge/1.20.1-47.2.0/forge-1.20.1-47.2.0-client.jar","url":"","sha1":""}}}"#,
        )
        .unwrap();
        let r = lib.to_library_ref();
        assert!(r.is_local_only());
        assert_eq!(r.checked_sha1(), None);
    }
}
