//! Classpath construction for Minecraft launcher
use crate::game::catalog::{ModuleRef, OptifineRef};
use crate::game::installer::manifest::SyntheticVersionManifest;
use crate::game::installer::types::{ModloaderType, OsType};
use crate::game::launcher::rules::RuleContext;
use crate::game::launcher::version_parser::VersionManifest;
use crate::game::maven::MavenCoordinate;
use crate::utils::version::is_at_least;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Validation errors that occur during launch preparation
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Required libraries not found: {}", .paths.join(", "))]
    LibrariesNotFound { paths: Vec<String> },

    #[error("Invalid Maven coordinates: {coords}")]
    InvalidMavenCoords { coords: String },

    #[error("Game jar not found: {path}")]
    GameJarMissing { path: String },
}

/// Where a classpath entry came from, in override order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntrySource {
    Vanilla,
    Module,
    Loader,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClasspathEntry {
    /// `group:artifact[:classifier]`, or the path for loose jars
    pub key: String,
    pub name: String,
    pub path: PathBuf,
    pub source: EntrySource,
}

/// Ordered classpath keyed by version-independent Maven id. A later push of
/// the same id replaces the earlier entry where it stands.
#[derive(Debug, Default)]
pub struct ClasspathBuilder {
    entries: Vec<ClasspathEntry>,
    index: HashMap<String, usize>,
}

impl ClasspathBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_coordinate(
        &mut self,
        source: EntrySource,
        coordinate: &MavenCoordinate,
        path: PathBuf,
    ) {
        self.push(ClasspathEntry {
            key: coordinate.version_independent_key(),
            name: coordinate.to_string(),
            path,
            source,
        });
    }

    pub fn push(&mut self, entry: ClasspathEntry) {
        match self.index.get(&entry.key) {
            Some(&idx) => {
                let existing = &self.entries[idx];
                if entry.source < existing.source {
                    log::debug!("Keeping {} over {}", existing.name, entry.name);
                    return;
                }
                if existing.name != entry.name {
                    log::debug!("{} overrides {}", entry.name, existing.name);
                }
                self.entries[idx] = entry;
            }
            None => {
                self.index.insert(entry.key.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    pub fn remove_where(&mut self, pred: impl Fn(&ClasspathEntry) -> bool) {
        self.entries.retain(|e| !pred(e));
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.key.clone(), i))
            .collect();
    }

    pub fn entries(&self) -> &[ClasspathEntry] {
        &self.entries
    }

    pub fn into_paths(self) -> Vec<PathBuf> {
        self.entries.into_iter().map(|e| e.path).collect()
    }
}

/// Whether the vanilla client jar goes on the classpath. Forge 1.17+ and
/// NeoForge bring their own patched jar.
pub fn includes_game_jar(loader: ModloaderType, minecraft_version: &str, optifine: bool) -> bool {
    optifine
        || !is_at_least(minecraft_version, "1.17")
        || matches!(
            loader,
            ModloaderType::Vanilla | ModloaderType::Fabric | ModloaderType::Quilt
        )
}

/// Inputs for [`assemble_classpath`].
pub struct ClasspathInputs<'a> {
    pub vanilla: &'a VersionManifest,
    pub loader: Option<&'a SyntheticVersionManifest>,
    pub loader_type: ModloaderType,
    pub modules: &'a [ModuleRef],
    pub optifine: Option<&'a OptifineRef>,
    pub libraries_dir: &'a Path,
    pub game_jar: &'a Path,
    pub rules: &'a RuleContext,
}

/// Vanilla libraries, then installation libraries, then loader libraries,
/// each overriding the previous by version-independent id. The game jar and
/// OptiFine come after every library.
pub fn assemble_classpath(inputs: &ClasspathInputs<'_>) -> Result<ClasspathBuilder, ValidationError> {
    let mut builder = ClasspathBuilder::new();
    let libraries_dir = inputs.libraries_dir;

    for lib in &inputs.vanilla.libraries {
        if !lib.applies(inputs.rules) {
            continue;
        }
        // legacy natives jars are extracted, not loaded
        let has_artifact = lib
            .downloads
            .as_ref()
            .map(|d| d.artifact.is_some())
            .unwrap_or(false);
        if lib.natives.is_some() && !has_artifact {
            continue;
        }
        let Some((relative, _)) = lib.main_artifact() else {
            continue;
        };
        let coordinate = MavenCoordinate::parse(&lib.name).map_err(|_| ValidationError::InvalidMavenCoords {
            coords: lib.name.clone(),
        })?;
        builder.push_coordinate(EntrySource::Vanilla, &coordinate, libraries_dir.join(relative));
    }

    for module in inputs.modules {
        let coordinate = MavenCoordinate::parse(&module.id).map_err(|_| ValidationError::InvalidMavenCoords {
            coords: module.id.clone(),
        })?;
        let path = module
            .path
            .clone()
            .unwrap_or_else(|| coordinate.local_path(libraries_dir));
        builder.push_coordinate(EntrySource::Module, &coordinate, path);
    }

    if let Some(loader) = inputs.loader {
        for lib in &loader.libraries {
            let coordinate = lib.coordinate().map_err(|_| ValidationError::InvalidMavenCoords {
                coords: lib.maven_name.clone(),
            })?;
            let path = lib
                .local_path(libraries_dir)
                .unwrap_or_else(|_| coordinate.local_path(libraries_dir));
            builder.push_coordinate(EntrySource::Loader, &coordinate, path);
        }
    }

    if inputs.loader_type == ModloaderType::NeoForge {
        // the loader builds its own module from the SRG client jar
        builder.remove_where(|e| e.key.starts_with("net.minecraft:client"));
    }

    if let Some(optifine) = inputs.optifine {
        builder.push(ClasspathEntry {
            key: "optifine:OptiFine".to_string(),
            name: format!("optifine:OptiFine:{}", optifine.version),
            path: optifine.path.clone(),
            source: EntrySource::Module,
        });
    }

    let mc = &inputs.vanilla.id;
    if includes_game_jar(inputs.loader_type, mc, inputs.optifine.is_some()) {
        if !inputs.game_jar.is_file() {
            return Err(ValidationError::GameJarMissing {
                path: inputs.game_jar.to_string_lossy().to_string(),
            });
        }
        builder.push(ClasspathEntry {
            key: "net.minecraft:minecraft".to_string(),
            name: format!("net.minecraft:minecraft:{}", mc),
            path: inputs.game_jar.to_path_buf(),
            source: EntrySource::Vanilla,
        });
    }

    Ok(builder)
}

/// Every entry must exist on disk.
pub fn validate_classpath(paths: &[PathBuf]) -> Result<(), ValidationError> {
    let missing: Vec<String> = paths
        .iter()
        .filter(|p| !p.is_file())
        .map(|p| p.to_string_lossy().to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::LibrariesNotFound { paths: missing })
    }
}

pub fn join_classpath(paths: &[PathBuf], os: OsType) -> String {
    paths
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join(os.classpath_separator())
}
