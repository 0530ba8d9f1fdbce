//! Vanilla version.json model with inheritance support
use crate::error::AnvilError;
use crate::game::installer::types::OsType;
use crate::game::launcher::rules::{rules_allow, RuleContext};
use crate::game::maven::MavenCoordinate;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Complete version manifest from version.json
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionManifest {
    /// Version ID (e.g., "1.20.1")
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_class: Option<String>,

    /// Parent version to inherit from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inherits_from: Option<String>,

    /// Game and JVM arguments (1.13+)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Arguments>,

    /// Legacy arguments (pre-1.13)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minecraft_arguments: Option<String>,

    #[serde(default)]
    pub libraries: Vec<Library>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloads: Option<VersionDownloads>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_index: Option<AssetIndex>,

    /// Assets version (legacy)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub java_version: Option<JavaVersion>,

    /// Version type (release, snapshot, etc.)
    #[serde(skip_serializing_if = "Option::is_none", rename = "type")]
    pub version_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_time: Option<String>,
}

/// Game and JVM arguments
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Arguments {
    #[serde(default)]
    pub game: Vec<Argument>,

    #[serde(default)]
    pub jvm: Vec<Argument>,
}

impl Arguments {
    pub fn is_empty(&self) -> bool {
        self.game.is_empty() && self.jvm.is_empty()
    }
}

/// Argument that can be simple or conditional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Argument {
    Simple(String),

    Conditional {
        rules: Vec<Rule>,
        value: ArgumentValue,
    },
}

impl From<&str> for Argument {
    fn from(s: &str) -> Self {
        Argument::Simple(s.to_string())
    }
}

/// Argument value can be a single string or array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgumentValue {
    Single(String),
    Multiple(Vec<String>),
}

impl ArgumentValue {
    pub fn parts(&self) -> Vec<&str> {
        match self {
            ArgumentValue::Single(s) => vec![s.as_str()],
            ArgumentValue::Multiple(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

/// Rule for conditional arguments/libraries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub action: RuleAction,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<OsRule>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<HashMap<String, bool>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Disallow,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OsRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}

/// Library definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Library {
    /// Maven coordinates
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloads: Option<LibraryDownloads>,

    /// Custom Maven repository URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<Rule>>,

    /// Legacy native classifiers keyed by OS name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub natives: Option<HashMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract: Option<ExtractRules>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryDownloads {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifiers: Option<HashMap<String, Artifact>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractRules {
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionDownloads {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<Artifact>,
}

/// Asset index information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetIndex {
    pub id: String,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Java version requirements
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JavaVersion {
    #[serde(default)]
    pub component: Option<String>,
    pub major_version: u32,
}

impl Library {
    pub fn coordinate(&self) -> Option<MavenCoordinate> {
        MavenCoordinate::parse(&self.name).ok()
    }

    /// Whether this library's rules allow it on the given platform.
    pub fn applies(&self, ctx: &RuleContext) -> bool {
        match &self.rules {
            Some(rules) => rules_allow(rules, ctx),
            None => true,
        }
    }

    /// Legacy-style native library (`natives` map) or 1.19+ `natives-*` artifact.
    pub fn is_native(&self) -> bool {
        self.natives.is_some()
            || self
                .coordinate()
                .and_then(|c| c.classifier)
                .map(|c| c.starts_with("natives-"))
                .unwrap_or(false)
    }

    /// Classifier of the legacy natives jar for this OS, with `${arch}` expanded.
    pub fn native_classifier(&self, os: OsType) -> Option<String> {
        let natives = self.natives.as_ref()?;
        natives
            .get(os.as_str())
            .map(|c| c.replace("${arch}", os.arch_bits()))
    }

    /// Main (non-native) artifact with its repository path.
    pub fn main_artifact(&self) -> Option<(String, Artifact)> {
        if let Some(artifact) = self.downloads.as_ref().and_then(|d| d.artifact.clone()) {
            let path = artifact
                .path
                .clone()
                .or_else(|| self.coordinate().map(|c| c.to_relative_path()))?;
            return Some((path, artifact));
        }
        if self.natives.is_some() && self.downloads.is_some() {
            // natives-only entry from the old format
            return None;
        }
        let coordinate = self.coordinate()?;
        Some((
            coordinate.to_relative_path(),
            Artifact {
                path: Some(coordinate.to_relative_path()),
                url: self
                    .url
                    .as_ref()
                    .map(|base| coordinate.to_repository_url(Some(base))),
                sha1: None,
                size: None,
            },
        ))
    }

    /// Natives artifact for the current OS from the legacy classifier map.
    pub fn native_artifact(&self, os: OsType) -> Option<(String, Artifact)> {
        let classifier = self.native_classifier(os)?;
        let coordinate = self.coordinate()?.with_classifier(Some(&classifier));
        let from_downloads = self
            .downloads
            .as_ref()
            .and_then(|d| d.classifiers.as_ref())
            .and_then(|c| c.get(&classifier))
            .cloned();
        let artifact = from_downloads.unwrap_or_else(|| Artifact {
            path: Some(coordinate.to_relative_path()),
            url: self
                .url
                .as_ref()
                .map(|base| coordinate.to_repository_url(Some(base))),
            sha1: None,
            size: None,
        });
        let path = artifact
            .path
            .clone()
            .unwrap_or_else(|| coordinate.to_relative_path());
        Some((path, artifact))
    }
}

/// Reads one `version.json`. Syntax or schema errors surface as
/// [`AnvilError::VersionJsonMalformed`].
pub async fn parse_version_json(path: &Path) -> Result<VersionManifest> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read version.json at {:?}", path))?;
    serde_json::from_str(&content).map_err(|e| {
        AnvilError::VersionJsonMalformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Loads `version_id` and every ancestor named by `inheritsFrom`, then folds
/// them into one manifest, root first.
pub async fn resolve_version_chain(version_id: &str, data_dir: &Path) -> Result<VersionManifest> {
    let mut chain: Vec<VersionManifest> = Vec::new();
    let mut seen = HashSet::new();
    let mut next = Some(version_id.to_string());

    while let Some(id) = next.take() {
        if !seen.insert(id.clone()) {
            anyhow::bail!("Version {} has an inheritance cycle through {}", version_id, id);
        }
        let path = data_dir.join("versions").join(&id).join(format!("{}.json", id));
        if !path.is_file() {
            anyhow::bail!("Version manifest not found: {:?}", path);
        }
        log::debug!("Resolving version {} -> {:?}", id, path);
        let manifest = parse_version_json(&path).await?;
        next = manifest.inherits_from.clone();
        chain.push(manifest);
    }

    let mut merged = chain.pop().context("empty version chain")?;
    while let Some(child) = chain.pop() {
        merged = child.inherit(merged);
    }
    Ok(merged)
}

impl VersionManifest {
    /// Applies this manifest on top of `parent`. Scalars set here win,
    /// argument lists append, and a library here replaces the parent's copy
    /// with the same version-independent id.
    pub(crate) fn inherit(self, parent: VersionManifest) -> VersionManifest {
        let own_keys: HashSet<String> = self
            .libraries
            .iter()
            .filter_map(|l| l.coordinate().map(|c| c.version_independent_key()))
            .collect();
        let mut libraries: Vec<Library> = parent
            .libraries
            .into_iter()
            .filter(|l| {
                l.coordinate()
                    .map_or(true, |c| !own_keys.contains(&c.version_independent_key()))
            })
            .collect();
        libraries.extend(self.libraries);

        let arguments = match (parent.arguments, self.arguments) {
            (Some(mut base), Some(extra)) => {
                base.game.extend(extra.game);
                base.jvm.extend(extra.jvm);
                Some(base)
            }
            (base, extra) => extra.or(base),
        };

        VersionManifest {
            id: self.id,
            main_class: self.main_class.or(parent.main_class),
            inherits_from: None,
            arguments,
            minecraft_arguments: self.minecraft_arguments.or(parent.minecraft_arguments),
            libraries,
            downloads: self.downloads.or(parent.downloads),
            asset_index: self.asset_index.or(parent.asset_index),
            assets: self.assets.or(parent.assets),
            java_version: self.java_version.or(parent.java_version),
            version_type: self.version_type.or(parent.version_type),
            release_time: self.release_time.or(parent.release_time),
        }
    }

    /// Asset index id, falling back to the legacy `assets` field.
    pub fn assets_id(&self) -> Option<&str> {
        self.asset_index
            .as_ref()
            .map(|a| a.id.as_str())
            .or(self.assets.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_simple_and_conditional_arguments() {
        let json = r#"[
            "--username",
            {"rules":[{"action":"allow","features":{"has_custom_resolution":true}}],
             "value":["--width","${resolution_width}"]}
        ]"#;
        let args: Vec<Argument> = serde_json::from_str(json).unwrap();
        assert_eq!(args[0], Argument::Simple("--username".into()));
        match &args[1] {
            Argument::Conditional { rules, value } => {
                assert_eq!(rules[0].action, RuleAction::Allow);
                assert_eq!(value.parts(), vec!["--width", "${resolution_width}"]);
            }
            _ => panic!("Expected conditional argument"),
        }
    }

    #[test]
    fn child_overrides_scalars_and_replaces_libraries() {
        let parent = VersionManifest {
            id: "1.20.1".into(),
            main_class: Some("net.minecraft.client.main.Main".into()),
            arguments: Some(Arguments {
                game: vec![Argument::from("--version")],
                jvm: vec![],
            }),
            libraries: vec![
                Library {
                    name: "com.google.guava:guava:20.0".into(),
                    ..Default::default()
                },
                Library {
                    name: "org.lwjgl:lwjgl:3.3.1".into(),
                    ..Default::default()
                },
            ],
            version_type: Some("release".into()),
            ..Default::default()
        };
        let child = VersionManifest {
            id: "fabric-loader-0.15.0-1.20.1".into(),
            main_class: Some("net.fabricmc.loader.impl.launch.knot.KnotClient".into()),
            inherits_from: Some("1.20.1".into()),
            arguments: Some(Arguments {
                game: vec![],
                jvm: vec![Argument::from("-DFabricMcEmu=net.minecraft.client.main.Main")],
            }),
            libraries: vec![Library {
                name: "com.google.guava:guava:31.1-jre".into(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let merged = child.inherit(parent);
        assert_eq!(merged.id, "fabric-loader-0.15.0-1.20.1");
        assert_eq!(
            merged.main_class.as_deref(),
            Some("net.fabricmc.loader.impl.launch.knot.KnotClient")
        );
        assert!(merged.inherits_from.is_none());
        let args = merged.arguments.unwrap();
        assert_eq!((args.game.len(), args.jvm.len()), (1, 1));
        let names: Vec<&str> = merged.libraries.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["org.lwjgl:lwjgl:3.3.1", "com.google.guava:guava:31.1-jre"]);
        assert_eq!(merged.version_type.as_deref(), Some("release"));
    }

    #[tokio::test]
    async fn cycles_and_bad_json_are_reported() {
        let tmp = tempdir().unwrap();
        let write = |id: &str, json: &str| {
            let dir = tmp.path().join("versions").join(id);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(format!("{}.json", id)), json).unwrap();
        };
        write("a", r#"{"id":"a","inheritsFrom":"b"}"#);
        write("b", r#"{"id":"b","inheritsFrom":"a"}"#);
        write("broken", r#"{"id": 5"#);

        let err = resolve_version_chain("a", tmp.path()).await.unwrap_err();
        assert!(err.to_string().contains("cycle"));

        let err = resolve_version_chain("broken", tmp.path()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnvilError>(),
            Some(AnvilError::VersionJsonMalformed { .. })
        ));
    }

    #[tokio::test]
    async fn resolve_chain_reads_parents_from_disk() {
        let tmp = tempdir().unwrap();
        let write = |id: &str, json: &str| {
            let dir = tmp.path().join("versions").join(id);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(format!("{}.json", id)), json).unwrap();
        };
        write(
            "1.12.2",
            r#"{"id":"1.12.2","mainClass":"net.minecraft.client.main.Main",
                "minecraftArguments":"--username ${auth_player_name}","libraries":[]}"#,
        );
        write(
            "child",
            r#"{"id":"child","inheritsFrom":"1.12.2","libraries":[{"name":"a:b:1"}]}"#,
        );

        let resolved = resolve_version_chain("child", tmp.path()).await.unwrap();
        assert_eq!(resolved.id, "child");
        assert_eq!(
            resolved.main_class.as_deref(),
            Some("net.minecraft.client.main.Main")
        );
        assert_eq!(resolved.libraries.len(), 1);
        assert!(resolved.minecraft_arguments.is_some());
    }

    #[test]
    fn legacy_natives_expand_arch() {
        let lib: Library = serde_json::from_str(
            r#"{"name":"tv.twitch:twitch-platform:6.5",
                "natives":{"windows":"natives-windows-${arch}","linux":"natives-linux"}}"#,
        )
        .unwrap();
        assert!(lib.is_native());
        assert_eq!(
            lib.native_classifier(OsType::Windows).as_deref(),
            Some("natives-windows-64")
        );
        let (path, _) = lib.native_artifact(OsType::Linux).unwrap();
        assert_eq!(
            path,
            "tv/twitch/twitch-platform/6.5/twitch-platform-6.5-natives-linux.jar"
        );
    }
}
