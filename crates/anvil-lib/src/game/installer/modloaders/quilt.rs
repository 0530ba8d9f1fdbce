use super::fabric::{KnotFlavor, KnotInstaller, LoaderProfile, MappingsChoice};
use crate::game::installer::config::Endpoints;
use crate::game::installer::manifest::{LibraryRef, LoaderTag, MappingsKind};
use crate::game::installer::types::{LoaderDescriptor, ModloaderType};
use crate::game::installer::InstallerContext;
use anyhow::Result;

pub const QUILT_KNOT_CLIENT: &str = "org.quiltmc.loader.impl.launch.knot.KnotClient";

/// Makes Quilt resolve names against the official namespace when only hashed
/// mappings are installed.
pub const QUILT_TARGET_NAMESPACE_FLAG: &str =
    "-Dloader.experimental.minecraft.targetNamespace=official";

fn quilt_meta(e: &Endpoints) -> &str {
    &e.quilt_meta
}

fn quilt_maven(e: &Endpoints) -> &str {
    &e.quilt_maven
}

pub static QUILT: KnotFlavor = KnotFlavor {
    loader_type: ModloaderType::Quilt,
    name: "Quilt",
    loader_prefix: "org.quiltmc:quilt-loader:",
    main_class: QUILT_KNOT_CLIENT,
    meta: quilt_meta,
    maven: quilt_maven,
};

/// Quilt uses the same meta-API flow as Fabric.
pub type QuiltInstaller = KnotInstaller;

impl KnotInstaller {
    pub fn quilt(descriptor: LoaderDescriptor, ctx: InstallerContext) -> Self {
        Self::new(&QUILT, descriptor, ctx)
    }
}

/// Intermediary when the meta API offers it, hashed otherwise.
pub fn choose_mappings(profile: &LoaderProfile, endpoints: &Endpoints) -> Result<MappingsChoice> {
    if let Some(intermediary) = &profile.intermediary {
        return Ok(MappingsChoice {
            library: LibraryRef::new(&intermediary.maven).with_repository(&endpoints.fabric_maven),
            kind: MappingsKind::Intermediary,
            jvm_flags: Vec::new(),
        });
    }
    let hashed = profile
        .hashed
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Quilt profile lists neither intermediary nor hashed mappings"))?;
    log::info!("No intermediary mappings offered, using hashed {}", hashed.maven);
    Ok(MappingsChoice {
        library: LibraryRef::new(&hashed.maven).with_repository(&endpoints.quilt_maven),
        kind: MappingsKind::Hashed,
        jvm_flags: vec![QUILT_TARGET_NAMESPACE_FLAG.to_string()],
    })
}

/// Installs made before the mappings tag existed, or hashed installs without
/// the namespace flag, must be redone.
pub fn tag_is_current(tag: &LoaderTag) -> bool {
    match tag.mappings {
        None => false,
        Some(MappingsKind::Intermediary) => true,
        Some(MappingsKind::Hashed) => tag
            .jvm_flags
            .iter()
            .any(|f| f == QUILT_TARGET_NAMESPACE_FLAG),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::installer::types::InstallSpec;
    use tempfile::tempdir;

    fn profile(json: &str) -> LoaderProfile {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn prefers_intermediary() {
        let p = profile(
            r#"{"loader": {"maven": "org.quiltmc:quilt-loader:0.21.0"},
                "hashed": {"maven": "org.quiltmc:hashed:1.20.1"},
                "intermediary": {"maven": "net.fabricmc:intermediary:1.20.1"}}"#,
        );
        let choice = choose_mappings(&p, &Endpoints::default()).unwrap();
        assert_eq!(choice.kind, MappingsKind::Intermediary);
        assert!(choice.jvm_flags.is_empty());
    }

    #[test]
    fn hashed_fallback_carries_namespace_flag() {
        let tmp = tempdir().unwrap();
        let descriptor = LoaderDescriptor::new(ModloaderType::Quilt, "1.20.1", "0.21.0");
        let spec = InstallSpec::new(descriptor.clone(), tmp.path().to_path_buf());
        let installer = KnotInstaller::quilt(descriptor, InstallerContext::new().unwrap());
        let p = profile(
            r#"{"loader": {"maven": "org.quiltmc:quilt-loader:0.21.0"},
                "hashed": {"maven": "org.quiltmc:hashed:1.20.1"}}"#,
        );
        let manifest = installer.build_manifest(&spec, "0.21.0", &p).unwrap();
        assert_eq!(manifest.id, "quilt-loader-0.21.0-1.20.1");
        assert_eq!(manifest.main_class, QUILT_KNOT_CLIENT);
        let tag = manifest.loader_tag.unwrap();
        assert_eq!(tag.mappings, Some(MappingsKind::Hashed));
        assert!(tag_is_current(&tag));

        let mut stale = tag.clone();
        stale.jvm_flags.clear();
        assert!(!tag_is_current(&stale));
        stale.mappings = None;
        assert!(!tag_is_current(&stale));
    }
}
