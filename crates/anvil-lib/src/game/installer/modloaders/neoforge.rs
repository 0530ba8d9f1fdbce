//! NeoForge runs the Forge installer flow with its own coordinates.

use super::forge::{ForgeFlavor, ForgeInstaller};
use crate::game::installer::config::Endpoints;
use crate::game::installer::types::{LoaderDescriptor, ModloaderType};
use crate::game::installer::InstallerContext;

pub static NEOFORGE: ForgeFlavor = ForgeFlavor {
    loader_type: ModloaderType::NeoForge,
    name: "NeoForge",
    installer_coordinate: neoforge_installer_coordinate,
    maven: neoforge_maven,
    accepts: neoforge_matches_minecraft,
};

pub type NeoForgeInstaller = ForgeInstaller;

impl ForgeInstaller {
    pub fn neoforge(descriptor: LoaderDescriptor, ctx: InstallerContext) -> Self {
        Self::new(&NEOFORGE, descriptor, ctx)
    }
}

fn neoforge_installer_coordinate(mc: &str, lv: &str) -> String {
    if mc == "1.20.1" {
        // the first NeoForge release kept the forge artifact id
        let lv = lv.strip_prefix("1.20.1-").unwrap_or(lv);
        format!("net.neoforged:forge:1.20.1-{}:installer", lv)
    } else {
        format!("net.neoforged:neoforge:{}:installer", lv)
    }
}

fn neoforge_maven(e: &Endpoints) -> &str {
    &e.neoforge_maven
}

/// Minecraft version a NeoForge version targets: `20.4.x` is `1.20.4`,
/// `21.0.x` is `1.21`. Versions for 1.20.1 do not follow the scheme.
pub fn neoforge_minecraft_version(loader_version: &str) -> Option<String> {
    let mut parts = loader_version.split(['.', '-']);
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next()?.parse().ok()?;
    if major < 20 {
        return None;
    }
    Some(if minor == 0 {
        format!("1.{}", major)
    } else {
        format!("1.{}.{}", major, minor)
    })
}

fn neoforge_matches_minecraft(mc: &str, lv: &str) -> bool {
    if mc == "1.20.1" {
        return true;
    }
    neoforge_minecraft_version(lv).is_some_and(|target| target == mc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn installer_coordinates() {
        assert_eq!(
            NEOFORGE.installer_coordinate("1.21.1", "21.1.65"),
            "net.neoforged:neoforge:21.1.65:installer"
        );
        assert_eq!(
            NEOFORGE.installer_coordinate("1.20.1", "47.1.106"),
            "net.neoforged:forge:1.20.1-47.1.106:installer"
        );
    }

    #[test]
    fn loader_version_maps_to_minecraft() {
        assert_eq!(neoforge_minecraft_version("20.4.237").as_deref(), Some("1.20.4"));
        assert_eq!(neoforge_minecraft_version("21.0.167-beta").as_deref(), Some("1.21"));
        assert_eq!(neoforge_minecraft_version("47.1.106"), None);
        assert!(neoforge_matches_minecraft("1.21.1", "21.1.65"));
        assert!(!neoforge_matches_minecraft("1.20.4", "21.1.65"));
    }

    #[test]
    fn effective_ids() {
        let modern = LoaderDescriptor::new(ModloaderType::NeoForge, "1.21.1", "21.1.65");
        assert_eq!(modern.effective_version_id(), "neoforge-21.1.65");
        let legacy = LoaderDescriptor::new(ModloaderType::NeoForge, "1.20.1", "47.1.106");
        assert_eq!(legacy.effective_version_id(), "1.20.1-forge-47.1.106");
    }
}
