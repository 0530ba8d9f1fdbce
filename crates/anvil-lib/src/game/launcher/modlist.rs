//! Side file listing the enabled mods, passed to the loader by reference
use crate::game::catalog::ModuleRef;
use crate::game::config_store::ModConfiguration;
use crate::game::installer::types::ModloaderType;
use crate::game::maven::MavenCoordinate;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const FORGE_MOD_LIST: &str = "forgeMods.list";
pub const FABRIC_MOD_LIST: &str = "fabricMods.list";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModList {
    pub file: PathBuf,
    /// Game arguments pointing the loader at `file`
    pub args: Vec<String>,
}

/// Mods switched on both in the installation and in the user's overrides.
pub fn enabled_mods<'a>(mods: &'a [ModuleRef], config: &ModConfiguration) -> Vec<&'a ModuleRef> {
    mods.iter()
        .filter(|m| m.enabled && config.is_enabled(&m.id))
        .collect()
}

fn mod_path(module: &ModuleRef, libraries_dir: &Path) -> Result<PathBuf> {
    if let Some(path) = &module.path {
        return Ok(path.clone());
    }
    let coordinate = MavenCoordinate::parse(&module.id)
        .with_context(|| format!("Mod {} has neither a path nor a Maven id", module.id))?;
    Ok(coordinate.local_path(libraries_dir))
}

/// Writes the list into `game_dir` and returns the arguments referencing it.
/// Forge reads Maven ids resolved against `libraries_dir`; the others read
/// file paths. Nothing is written when no mod is enabled.
pub fn write_mod_list(
    loader: ModloaderType,
    mods: &[&ModuleRef],
    game_dir: &Path,
    libraries_dir: &Path,
) -> Result<Option<ModList>> {
    let file_name = match loader {
        ModloaderType::Vanilla => return Ok(None),
        ModloaderType::Forge | ModloaderType::NeoForge => FORGE_MOD_LIST,
        ModloaderType::Fabric | ModloaderType::Quilt => FABRIC_MOD_LIST,
    };
    let file = game_dir.join(file_name);
    if mods.is_empty() {
        if file.exists() {
            std::fs::remove_file(&file).with_context(|| format!("Failed to remove stale {:?}", file))?;
        }
        return Ok(None);
    }

    let lines: Vec<String> = match loader {
        ModloaderType::Forge => mods.iter().map(|m| m.id.clone()).collect(),
        _ => mods
            .iter()
            .map(|m| mod_path(m, libraries_dir).map(|p| p.to_string_lossy().to_string()))
            .collect::<Result<_>>()?,
    };

    std::fs::create_dir_all(game_dir).with_context(|| format!("Failed to create {:?}", game_dir))?;
    std::fs::write(&file, lines.join("\n")).with_context(|| format!("Failed to write {:?}", file))?;
    log::debug!("Wrote {} mod(s) to {:?}", lines.len(), file);

    let file_arg = file.to_string_lossy().to_string();
    let args = match loader {
        ModloaderType::Fabric | ModloaderType::Quilt => {
            vec!["--fabric.addMods".to_string(), format!("@{}", file_arg)]
        }
        ModloaderType::Forge => vec![
            "--fml.mavenRoots".to_string(),
            libraries_dir.to_string_lossy().to_string(),
            "--fml.modLists".to_string(),
            file_arg,
        ],
        _ => vec!["--fml.modLists".to_string(), file_arg],
    };
    Ok(Some(ModList { file, args }))
}
