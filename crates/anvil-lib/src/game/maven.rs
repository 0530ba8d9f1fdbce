//! Maven coordinate parsing and repository routing.

use crate::error::{AnvilError, AnvilResult};
use crate::game::installer::config::{
    FORGE_MAVEN_URL, MAVEN_CENTRAL_URL, MOJANG_LIBRARIES_URL, NEOFORGE_MAVEN_URL,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// `group:artifact:version[:classifier][@extension]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MavenCoordinate {
    pub group: String,
    pub artifact: String,
    pub version: String,
    pub classifier: Option<String>,
    pub extension: String,
}

/// Which repository serves a group when the library does not name one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryRoute {
    NeoForge,
    Forge,
    Mojang,
    Central,
}

const NEOFORGE_GROUPS: &[&str] = &["net.neoforged", "cpw.mods"];
const FORGE_GROUPS: &[&str] = &["net.minecraftforge"];
const MOJANG_GROUPS: &[&str] = &["com.mojang", "net.minecraft"];

fn in_group(group: &str, roots: &[&str]) -> bool {
    roots.iter().any(|root| {
        group == *root
            || (group.starts_with(root) && group.as_bytes().get(root.len()) == Some(&b'.'))
    })
}

impl MavenCoordinate {
    pub fn parse(coordinate: &str) -> AnvilResult<Self> {
        let invalid = || AnvilError::InvalidCoordinateFormat(coordinate.to_string());
        let trimmed = coordinate.trim();

        let (body, extension) = match trimmed.rfind('@') {
            Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
            None => (trimmed, "jar"),
        };
        if extension.is_empty() {
            return Err(invalid());
        }

        let parts: Vec<&str> = body.split(':').collect();
        if parts.len() < 3 || parts.len() > 4 || parts.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }

        Ok(Self {
            group: parts[0].to_string(),
            artifact: parts[1].to_string(),
            version: parts[2].to_string(),
            classifier: parts.get(3).map(|c| c.to_string()),
            extension: extension.to_string(),
        })
    }

    /// Reverses [`to_relative_path`](Self::to_relative_path).
    pub fn from_relative_path(path: &str) -> Option<Self> {
        let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
        if parts.len() < 4 {
            return None;
        }
        let file_name = parts[parts.len() - 1];
        let version = parts[parts.len() - 2];
        let artifact = parts[parts.len() - 3];
        let group = parts[..parts.len() - 3].join(".");

        let stem_prefix = format!("{}-{}", artifact, version);
        let rest = file_name.strip_prefix(&stem_prefix)?;
        let (classifier_part, extension) = rest.rsplit_once('.')?;
        let classifier = match classifier_part {
            "" => None,
            c => Some(c.strip_prefix('-')?.to_string()),
        };

        Some(Self {
            group,
            artifact: artifact.to_string(),
            version: version.to_string(),
            classifier,
            extension: extension.to_string(),
        })
    }

    pub fn file_name(&self) -> String {
        match &self.classifier {
            Some(c) => format!("{}-{}-{}.{}", self.artifact, self.version, c, self.extension),
            None => format!("{}-{}.{}", self.artifact, self.version, self.extension),
        }
    }

    /// Maven-layout path with forward slashes, relative to a repository root.
    pub fn to_relative_path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.group.replace('.', "/"),
            self.artifact,
            self.version,
            self.file_name()
        )
    }

    /// Location of the artifact inside a local `libraries/` tree.
    pub fn local_path(&self, libraries_dir: &Path) -> PathBuf {
        let mut path = libraries_dir.to_path_buf();
        for segment in self.group.split('.') {
            path.push(segment);
        }
        path.push(&self.artifact);
        path.push(&self.version);
        path.push(self.file_name());
        path
    }

    pub fn route(&self) -> RepositoryRoute {
        if in_group(&self.group, NEOFORGE_GROUPS) {
            RepositoryRoute::NeoForge
        } else if in_group(&self.group, FORGE_GROUPS) {
            RepositoryRoute::Forge
        } else if in_group(&self.group, MOJANG_GROUPS) {
            RepositoryRoute::Mojang
        } else {
            RepositoryRoute::Central
        }
    }

    pub fn default_repository(&self) -> &'static str {
        match self.route() {
            RepositoryRoute::NeoForge => NEOFORGE_MAVEN_URL,
            RepositoryRoute::Forge => FORGE_MAVEN_URL,
            RepositoryRoute::Mojang => MOJANG_LIBRARIES_URL,
            RepositoryRoute::Central => MAVEN_CENTRAL_URL,
        }
    }

    pub fn to_repository_url(&self, override_base: Option<&str>) -> String {
        let base = override_base.unwrap_or_else(|| self.default_repository());
        join_url(base, &self.to_relative_path())
    }

    /// `group:artifact[:classifier]`, used to let a newer copy of a library
    /// replace an older one.
    pub fn version_independent_key(&self) -> String {
        match &self.classifier {
            Some(c) => format!("{}:{}:{}", self.group, self.artifact, c),
            None => format!("{}:{}", self.group, self.artifact),
        }
    }

    /// Same coordinate with a different version.
    pub fn with_version(&self, version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..self.clone()
        }
    }

    pub fn with_classifier(&self, classifier: Option<&str>) -> Self {
        Self {
            classifier: classifier.map(str::to_string),
            ..self.clone()
        }
    }
}

/// Joins a base URL and a relative path with exactly one slash between them.
pub fn join_url(base: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

/// Strips the `[...]` wrapper Forge uses for artifact references.
pub fn strip_brackets(reference: &str) -> Option<&str> {
    reference
        .strip_prefix('[')
        .and_then(|r| r.strip_suffix(']'))
}

impl fmt::Display for MavenCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.artifact, self.version)?;
        if let Some(c) = &self.classifier {
            write!(f, ":{}", c)?;
        }
        if self.extension != "jar" {
            write!(f, "@{}", self.extension)?;
        }
        Ok(())
    }
}

impl FromStr for MavenCoordinate {
    type Err = AnvilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_coordinate() {
        let c = MavenCoordinate::parse("com.google.guava:guava:31.1-jre").unwrap();
        assert_eq!(c.group, "com.google.guava");
        assert_eq!(c.artifact, "guava");
        assert_eq!(c.version, "31.1-jre");
        assert_eq!(c.classifier, None);
        assert_eq!(c.extension, "jar");
        assert_eq!(
            c.to_relative_path(),
            "com/google/guava/guava/31.1-jre/guava-31.1-jre.jar"
        );
    }

    #[test]
    fn parses_classifier_and_extension() {
        let c = MavenCoordinate::parse("g:a:v:cls@ext").unwrap();
        assert_eq!(c.classifier.as_deref(), Some("cls"));
        assert_eq!(c.extension, "ext");
        assert_eq!(c.to_relative_path(), "g/a/v/a-v-cls.ext");
        assert_eq!(c.to_string(), "g:a:v:cls@ext");
    }

    #[test]
    fn rejects_short_or_empty_coordinates() {
        for bad in ["g:a", "g:a@zip", "", "g::v", "g:a:v:c:extra", "g:a:v@"] {
            let err = MavenCoordinate::parse(bad).unwrap_err();
            assert!(matches!(err, AnvilError::InvalidCoordinateFormat(_)), "{}", bad);
        }
    }

    #[test]
    fn relative_path_round_trips() {
        for raw in [
            "net.fabricmc:fabric-loader:0.15.0",
            "de.oceanlabs.mcp:mcp_config:1.20.1-20230612.114412@zip",
            "net.minecraft:client:1.20.1-20230612.114412:srg",
            "org.lwjgl:lwjgl:3.3.1:natives-windows",
        ] {
            let parsed = MavenCoordinate::parse(raw).unwrap();
            let back = MavenCoordinate::from_relative_path(&parsed.to_relative_path()).unwrap();
            assert_eq!(back, parsed, "{}", raw);
        }
    }

    #[test]
    fn routes_vendor_groups() {
        let fml = MavenCoordinate::parse("net.neoforged.fancymodloader:loader:4.0.6").unwrap();
        assert_eq!(fml.default_repository(), NEOFORGE_MAVEN_URL);
        assert!(fml
            .to_repository_url(None)
            .starts_with("https://maven.neoforged.net/releases/net/neoforged/fancymodloader/"));

        let cpw = MavenCoordinate::parse("cpw.mods:securejarhandler:2.1.10").unwrap();
        assert_eq!(cpw.route(), RepositoryRoute::NeoForge);

        let forge = MavenCoordinate::parse("net.minecraftforge:forge:1.20.1-47.2.0").unwrap();
        assert_eq!(forge.default_repository(), FORGE_MAVEN_URL);

        let guava = MavenCoordinate::parse("com.google.guava:guava:31.1-jre").unwrap();
        assert_eq!(guava.default_repository(), MAVEN_CENTRAL_URL);

        // prefix match is on whole group segments
        let lookalike = MavenCoordinate::parse("net.neoforgedx:thing:1").unwrap();
        assert_eq!(lookalike.route(), RepositoryRoute::Central);
    }

    #[test]
    fn override_base_wins() {
        let c = MavenCoordinate::parse("net.fabricmc:intermediary:1.20.1").unwrap();
        assert_eq!(
            c.to_repository_url(Some("https://maven.fabricmc.net/")),
            "https://maven.fabricmc.net/net/fabricmc/intermediary/1.20.1/intermediary-1.20.1.jar"
        );
    }

    #[test]
    fn version_independent_key_keeps_classifier() {
        let a = MavenCoordinate::parse("org.lwjgl:lwjgl:3.3.1:natives-linux").unwrap();
        let b = MavenCoordinate::parse("org.lwjgl:lwjgl:3.3.3:natives-linux").unwrap();
        assert_eq!(a.version_independent_key(), b.version_independent_key());
        assert_eq!(a.version_independent_key(), "org.lwjgl:lwjgl:natives-linux");
    }
}
