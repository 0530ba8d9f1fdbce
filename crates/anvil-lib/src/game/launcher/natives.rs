//! Native library extraction for Minecraft launcher
use crate::game::launcher::rules::RuleContext;
use crate::game::launcher::version_parser::Library;
use anyhow::{Context, Result};
use std::io;
use std::path::{Path, PathBuf};

const DEFAULT_EXCLUDES: &[&str] = &["META-INF/"];

/// A jar to unpack and the prefixes to leave behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeJar {
    pub path: PathBuf,
    pub exclude: Vec<String>,
}

/// Native jars for the platform in `rules`: legacy `natives` classifiers and
/// 1.19+ `natives-*` artifacts alike.
pub fn collect_native_jars(
    libraries: &[Library],
    libraries_dir: &Path,
    rules: &RuleContext,
) -> Vec<NativeJar> {
    let mut out = Vec::new();
    for lib in libraries {
        if !lib.applies(rules) || !lib.is_native() {
            continue;
        }
        let exclude = match &lib.extract {
            Some(e) if !e.exclude.is_empty() => e.exclude.clone(),
            _ => DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
        };
        let relative = if lib.natives.is_some() {
            lib.native_artifact(rules.os).map(|(path, _)| path)
        } else {
            lib.main_artifact().map(|(path, _)| path)
        };
        match relative {
            Some(relative) => out.push(NativeJar {
                path: libraries_dir.join(relative),
                exclude,
            }),
            None => log::debug!("No {} natives in {}", rules.os.as_str(), lib.name),
        }
    }
    out
}

/// Fresh per-launch directory under `natives_root`.
pub fn natives_dir_for_launch(natives_root: &Path) -> PathBuf {
    natives_root.join(uuid::Uuid::new_v4().to_string())
}

/// Unpacks every jar into `target`. Missing jars are skipped with a warning;
/// the game reports its own error if it really needed them.
pub async fn extract_natives(jars: Vec<NativeJar>, target: PathBuf) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&target)
            .with_context(|| format!("Failed to create natives directory {:?}", target))?;
        for jar in &jars {
            if !jar.path.is_file() {
                log::warn!("Native jar missing: {:?}", jar.path);
                continue;
            }
            extract_jar(&jar.path, &target, &jar.exclude)?;
        }
        Ok(target)
    })
    .await
    .context("Natives extraction task panicked")?
}

fn extract_jar(jar_path: &Path, output_dir: &Path, exclude: &[String]) -> Result<()> {
    log::debug!("Extracting natives from {:?}", jar_path);
    let file = std::fs::File::open(jar_path)
        .with_context(|| format!("Failed to open JAR: {:?}", jar_path))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("Failed to read JAR: {:?}", jar_path))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() || should_exclude(entry.name(), exclude) {
            continue;
        }
        // enclosed_name rejects `..` and absolute entries
        let Some(relative) = entry.enclosed_name() else {
            log::warn!("Skipping unsafe entry {} in {:?}", entry.name(), jar_path);
            continue;
        };
        let output_path = output_dir.join(relative);
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&output_path)
            .with_context(|| format!("Failed to create {:?}", output_path))?;
        io::copy(&mut entry, &mut out)?;
    }
    Ok(())
}

fn should_exclude(entry: &str, exclude: &[String]) -> bool {
    exclude.iter().any(|prefix| entry.starts_with(prefix.as_str()))
}

/// Best-effort removal once the game has exited.
pub async fn cleanup_natives(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => log::debug!("Removed natives directory {:?}", dir),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove natives directory {:?}: {}", dir, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::installer::types::OsType;
    use crate::game::launcher::version_parser::ExtractRules;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_jar(path: &Path, entries: &[(&str, &[u8])]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn legacy_classifier_expands_arch() {
        let mut natives = HashMap::new();
        natives.insert("windows".to_string(), "natives-windows-${arch}".to_string());
        let lib = Library {
            name: "org.lwjgl.lwjgl:lwjgl-platform:2.9.4".into(),
            natives: Some(natives),
            ..Default::default()
        };
        let rules = RuleContext::for_os(OsType::Windows);
        let jars = collect_native_jars(&[lib.clone()], Path::new("/libs"), &rules);
        assert_eq!(
            jars,
            vec![NativeJar {
                path: PathBuf::from(
                    "/libs/org/lwjgl/lwjgl/lwjgl-platform/2.9.4/lwjgl-platform-2.9.4-natives-windows-64.jar"
                ),
                exclude: vec!["META-INF/".into()],
            }]
        );

        // no linux entry in the map
        let linux = RuleContext::for_os(OsType::Linux);
        assert!(collect_native_jars(&[lib], Path::new("/libs"), &linux).is_empty());
    }

    #[test]
    fn modern_natives_artifacts_are_collected() {
        let libs = vec![
            Library {
                name: "org.lwjgl:lwjgl:3.3.1:natives-linux".into(),
                ..Default::default()
            },
            Library {
                name: "org.lwjgl:lwjgl:3.3.1".into(),
                ..Default::default()
            },
        ];
        let rules = RuleContext::for_os(OsType::Linux);
        let jars = collect_native_jars(&libs, Path::new("/libs"), &rules);
        assert_eq!(jars.len(), 1);
        assert!(jars[0]
            .path
            .ends_with("org/lwjgl/lwjgl/3.3.1/lwjgl-3.3.1-natives-linux.jar"));
    }

    #[tokio::test]
    async fn extraction_honours_excludes_and_cleans_up() {
        let tmp = tempdir().unwrap();
        let jar = tmp.path().join("libs/natives.jar");
        write_jar(
            &jar,
            &[
                ("liblwjgl.so", b"elf"),
                ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0"),
                ("skip/me.txt", b"x"),
            ],
        );
        let root = tmp.path().join("natives");
        let target = natives_dir_for_launch(&root);
        let lib = Library {
            extract: Some(ExtractRules {
                exclude: vec!["META-INF/".into(), "skip/".into()],
            }),
            ..Default::default()
        };
        let exclude = lib.extract.unwrap().exclude;
        let jars = vec![
            NativeJar {
                path: jar,
                exclude,
            },
            NativeJar {
                path: tmp.path().join("absent.jar"),
                exclude: vec![],
            },
        ];

        let dir = extract_natives(jars, target.clone()).await.unwrap();
        assert_eq!(dir, target);
        assert!(dir.join("liblwjgl.so").is_file());
        assert!(!dir.join("META-INF").exists());
        assert!(!dir.join("skip").exists());

        cleanup_natives(&dir).await;
        assert!(!dir.exists());
        // second cleanup is a no-op
        cleanup_natives(&dir).await;
    }

    #[test]
    fn launch_directories_are_unique() {
        let root = Path::new("/n");
        assert_ne!(natives_dir_for_launch(root), natives_dir_for_launch(root));
    }
}
