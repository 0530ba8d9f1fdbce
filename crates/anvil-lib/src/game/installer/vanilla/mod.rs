use crate::error::AnvilError;
use crate::game::installer::core::library::LibraryDownloader;
use crate::game::installer::core::traits::LoaderInstaller;
use crate::game::installer::manifest::LibraryRef;
use crate::game::installer::types::{InstallSpec, LoaderDescriptor, ProgressReporter};
use crate::game::installer::InstallerContext;
use crate::game::launcher::rules::RuleContext;
use crate::game::launcher::version_parser::{parse_version_json, VersionManifest};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::sync::Arc;

/// Mojang's `version_manifest_v2.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionList {
    pub versions: Vec<VersionEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionEntry {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default, rename = "type")]
    pub version_type: Option<String>,
}

pub struct VanillaInstaller {
    descriptor: LoaderDescriptor,
    ctx: InstallerContext,
}

impl VanillaInstaller {
    pub fn new(descriptor: LoaderDescriptor, ctx: InstallerContext) -> Self {
        Self { descriptor, ctx }
    }
}

impl LoaderInstaller for VanillaInstaller {
    fn descriptor(&self) -> &LoaderDescriptor {
        &self.descriptor
    }

    fn check_compatibility<'a>(&'a self, spec: &'a InstallSpec) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            find_version(&self.ctx, spec).await?;
            Ok(())
        })
    }

    fn validate_installation<'a>(&'a self, spec: &'a InstallSpec) -> BoxFuture<'a, Result<bool>> {
        Box::pin(validate_vanilla(spec))
    }

    fn install<'a>(
        &'a self,
        spec: &'a InstallSpec,
        reporter: Arc<dyn ProgressReporter>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            ensure_vanilla(spec, &self.ctx, reporter).await?;
            Ok(())
        })
    }
}

async fn find_version(ctx: &InstallerContext, spec: &InstallSpec) -> Result<VersionEntry> {
    let list: VersionList = ctx
        .fetcher
        .fetch_json(&spec.endpoints.vanilla_manifest)
        .await
        .context("Failed to fetch Minecraft version list")?;
    let mc = spec.minecraft_version();
    list.versions
        .into_iter()
        .find(|v| v.id == mc)
        .ok_or_else(|| {
            AnvilError::IncompatibleVersion {
                loader: "Minecraft".to_string(),
                minecraft_version: mc.to_string(),
            }
            .into()
        })
}

/// Rule-allowed libraries of a vanilla manifest, natives included, as
/// downloadable references.
pub fn vanilla_library_refs(manifest: &VersionManifest, rules: &RuleContext) -> Vec<LibraryRef> {
    let mut refs = Vec::new();
    for lib in &manifest.libraries {
        if !lib.applies(rules) {
            continue;
        }
        if let Some((path, artifact)) = lib.main_artifact() {
            refs.push(LibraryRef {
                maven_name: lib.name.clone(),
                repository_url: lib.url.clone(),
                sha1: artifact.sha1,
                download_url: artifact.url,
                path: Some(path),
            });
        }
        if let (Some((path, artifact)), Some(classifier)) = (
            lib.native_artifact(rules.os),
            lib.native_classifier(rules.os),
        ) {
            let name = lib
                .coordinate()
                .map(|c| c.with_classifier(Some(&classifier)).to_string())
                .unwrap_or_else(|| format!("{}:{}", lib.name, classifier));
            refs.push(LibraryRef {
                maven_name: name,
                repository_url: lib.url.clone(),
                sha1: artifact.sha1,
                download_url: artifact.url,
                path: Some(path),
            });
        }
    }
    refs
}

/// Makes sure the vanilla version JSON, client jar and libraries for the
/// requested Minecraft version are on disk. Loader installers call this first.
pub async fn ensure_vanilla(
    spec: &InstallSpec,
    ctx: &InstallerContext,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<VersionManifest> {
    let mc = spec.minecraft_version();
    let json_path = spec.version_json_path(mc);

    reporter.start_step("Preparing Minecraft", Some(3));
    let local = if json_path.is_file() {
        match parse_version_json(&json_path).await {
            Ok(m) => Some(m),
            Err(e) => {
                log::warn!("Local version JSON unusable, refetching: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    let manifest = match local {
        Some(m) => m,
        None => {
            log::info!("Fetching version JSON for Minecraft {}", mc);
            let entry = find_version(ctx, spec).await?;
            // a stale local copy would otherwise pass the exists check
            let _ = tokio::fs::remove_file(&json_path).await;
            ctx.fetcher
                .ensure(&entry.url, &json_path, entry.sha1.as_deref(), reporter.as_ref())
                .await?;
            parse_version_json(&json_path).await?
        }
    };
    reporter.set_percent(10);

    reporter.start_step("Downloading game client", None);
    let jar_path = spec.vanilla_jar_path();
    match manifest.downloads.as_ref().and_then(|d| d.client.as_ref()) {
        Some(client) => {
            let url = client
                .url
                .as_deref()
                .context("Client download has no URL")?;
            ctx.fetcher
                .ensure(url, &jar_path, client.sha1.as_deref(), reporter.as_ref())
                .await
                .context("Failed to download client jar")?;
        }
        None if jar_path.is_file() => {}
        None => anyhow::bail!("No client download found for Minecraft {}", mc),
    }
    reporter.set_percent(20);

    reporter.start_step("Downloading libraries", None);
    let refs = vanilla_library_refs(&manifest, &RuleContext::current());
    LibraryDownloader::new(
        &ctx.fetcher,
        &spec.libraries_dir(),
        &spec.endpoints,
        Arc::clone(&reporter),
    )
    .download_all(&refs, spec.concurrency, 20, 40)
    .await?;

    log::info!("Minecraft {} ready", mc);
    Ok(manifest)
}

async fn validate_vanilla(spec: &InstallSpec) -> Result<bool> {
    let mc = spec.minecraft_version();
    let json_path = spec.version_json_path(mc);
    if !json_path.is_file() {
        return Ok(false);
    }
    let manifest = match parse_version_json(&json_path).await {
        Ok(m) => m,
        Err(e) => {
            log::debug!("Vanilla manifest unreadable: {:#}", e);
            return Ok(false);
        }
    };
    if manifest.main_class.is_none() || !spec.vanilla_jar_path().is_file() {
        return Ok(false);
    }
    let libraries_dir = spec.libraries_dir();
    for library in vanilla_library_refs(&manifest, &RuleContext::current()) {
        match library.local_path(&libraries_dir) {
            Ok(p) if p.is_file() => {}
            _ => {
                log::debug!("Vanilla library missing: {}", library.maven_name);
                return Ok(false);
            }
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::installer::types::OsType;

    #[test]
    fn refs_follow_rules_and_natives() {
        let manifest: VersionManifest = serde_json::from_str(
            r#"{
            "id": "1.12.2",
            "libraries": [
                {"name": "com.mojang:patchy:1.1",
                 "downloads": {"artifact": {"path": "com/mojang/patchy/1.1/patchy-1.1.jar",
                    "url": "https://libraries.minecraft.net/com/mojang/patchy/1.1/patchy-1.1.jar", "sha1": "aa"}}},
                {"name": "ca.weblite:java-objc-bridge:1.0.0",
                 "rules": [{"action": "allow", "os": {"name": "osx"}}]},
                {"name": "org.lwjgl.lwjgl:lwjgl-platform:2.9.4",
                 "natives": {"linux": "natives-linux", "windows": "natives-windows"},
                 "downloads": {"classifiers": {"natives-linux": {
                    "path": "org/lwjgl/lwjgl/lwjgl-platform/2.9.4/lwjgl-platform-2.9.4-natives-linux.jar",
                    "url": "https://libraries.minecraft.net/x.jar", "sha1": "bb"}}}}
            ]}"#,
        )
        .unwrap();

        let refs = vanilla_library_refs(&manifest, &RuleContext::for_os(OsType::Linux));
        let names: Vec<&str> = refs.iter().map(|r| r.maven_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "com.mojang:patchy:1.1",
                "org.lwjgl.lwjgl:lwjgl-platform:2.9.4:natives-linux"
            ]
        );
        assert_eq!(refs[1].checked_sha1(), Some("bb"));

        let mac = vanilla_library_refs(&manifest, &RuleContext::for_os(OsType::MacOS));
        assert!(mac.iter().any(|r| r.maven_name.starts_with("ca.weblite")));
    }
}
