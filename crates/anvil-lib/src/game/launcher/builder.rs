//! Turns an installed version plus a [`LaunchContext`] into a [`LaunchPlan`].

use crate::game::installer::manifest::SyntheticVersionManifest;
use crate::game::installer::types::ModloaderType;
use crate::game::launcher::arguments::{
    dedup_jvm_arguments, ensure_quilt_namespace, launch_variables, legacy_game_arguments,
    memory_arguments, parse_server_address, resolve_game_arguments, resolve_jvm_arguments,
    rule_context, QUICK_PLAY_MULTIPLAYER,
};
use crate::game::launcher::classpath::{assemble_classpath, join_classpath, validate_classpath, ClasspathInputs};
use crate::game::launcher::jpms::JarHider;
use crate::game::launcher::modlist::{enabled_mods, write_mod_list};
use crate::game::launcher::natives::{collect_native_jars, extract_natives, natives_dir_for_launch};
use crate::game::launcher::rules::RuleContext;
use crate::game::launcher::types::{LaunchContext, LaunchPlan};
use crate::game::launcher::version_parser::{resolve_version_chain, Argument, VersionManifest};
use crate::game::template::TemplateContext;
use crate::utils::version::is_at_least;
use anyhow::{Context, Result};

const LITELOADER_PREFIX: &str = "com.mumfrey:liteloader";
const LITELOADER_TWEAKER: &str = "com.mumfrey.liteloader.launch.LiteLoaderTweaker";
const QUICK_PLAY_TOKEN: &str = "${quickPlayMultiplayer}";

/// Builds the full argument vector for one launch.
pub struct LaunchArgumentBuilder<'a> {
    ctx: &'a LaunchContext,
}

impl<'a> LaunchArgumentBuilder<'a> {
    pub fn new(ctx: &'a LaunchContext) -> Self {
        Self { ctx }
    }

    /// Vanilla chain for the game version, merged parent-first.
    async fn vanilla_manifest(&self) -> Result<VersionManifest> {
        resolve_version_chain(self.ctx.minecraft_version(), &self.ctx.common_dir)
            .await
            .with_context(|| format!("Minecraft {} is not installed", self.ctx.minecraft_version()))
    }

    async fn loader_manifest(&self) -> Result<Option<SyntheticVersionManifest>> {
        if self.ctx.server.loader_type() == ModloaderType::Vanilla {
            return Ok(None);
        }
        let path = self.ctx.version_json_path(&self.ctx.server.version_id);
        let manifest = SyntheticVersionManifest::load(&path)
            .await
            .with_context(|| format!("Loader version {} is not installed", self.ctx.server.version_id))?;
        Ok(Some(manifest))
    }

    pub async fn build(&self) -> Result<LaunchPlan> {
        let ctx = self.ctx;
        let loader_type = ctx.server.loader_type();
        let mc = ctx.minecraft_version().to_string();

        JarHider::recover_if_idle(&ctx.game_dir)?;
        tokio::fs::create_dir_all(&ctx.game_dir)
            .await
            .with_context(|| format!("Failed to create game directory {:?}", ctx.game_dir))?;

        let vanilla = self.vanilla_manifest().await?;
        let loader = self.loader_manifest().await?;
        let mut rules = rule_context(ctx);

        let main_class = loader
            .as_ref()
            .map(|l| l.main_class.clone())
            .or_else(|| vanilla.main_class.clone())
            .with_context(|| format!("No main class for {}", ctx.server.version_id))?;

        let libraries_dir = ctx.libraries_dir();
        let game_jar = ctx.vanilla_jar_path();
        let classpath = assemble_classpath(&ClasspathInputs {
            vanilla: &vanilla,
            loader: loader.as_ref(),
            loader_type,
            modules: &ctx.server.libraries,
            optifine: ctx.server.optifine.as_ref(),
            libraries_dir: &libraries_dir,
            game_jar: &game_jar,
            rules: &rules,
        })?
        .into_paths();
        validate_classpath(&classpath)?;
        let classpath = join_classpath(&classpath, ctx.os);

        let natives_dir = extract_natives(
            collect_native_jars(&vanilla.libraries, &libraries_dir, &rules),
            natives_dir_for_launch(&ctx.natives_root()),
        )
        .await?;

        let mut vars = launch_variables(ctx, &vanilla, &ctx.server.version_id, &natives_dir, &classpath);
        let mut extra_game_args = Vec::new();
        if let Some(address) = ctx.server.server_address.as_deref() {
            match parse_server_address(address) {
                Some((host, port)) => {
                    if is_at_least(&mc, "1.20") && mentions_quick_play(&vanilla, loader.as_ref()) {
                        rules = rules.with_feature(QUICK_PLAY_MULTIPLAYER, true);
                        vars.set("quickPlayMultiplayer", format!("{}:{}", host, port));
                    } else {
                        extra_game_args.extend([
                            "--server".to_string(),
                            host,
                            "--port".to_string(),
                            port.to_string(),
                        ]);
                    }
                }
                None => log::warn!("Ignoring unparsable server address {:?}", address),
            }
        }

        let jvm_args = self.jvm_arguments(&vanilla, loader.as_ref(), &vars, &rules);
        let mut game_args = self.game_arguments(&vanilla, loader.as_ref(), &vars, &rules);

        let mods = enabled_mods(&ctx.server.mods, &ctx.mods);
        let mod_list = write_mod_list(loader_type, &mods, &ctx.game_dir, &libraries_dir)?;
        if let Some(list) = &mod_list {
            game_args.extend(list.args.iter().cloned());
        }
        game_args.extend(extra_game_args);
        if uses_liteloader(&vanilla, ctx) {
            game_args.extend(["--tweakClass".to_string(), LITELOADER_TWEAKER.to_string()]);
        }

        let mut args = jvm_args;
        args.push(main_class.clone());
        args.extend(game_args);

        let hidden = if loader_type == ModloaderType::NeoForge {
            let hider = JarHider {
                journal_dir: ctx.game_dir.clone(),
                versions_dir: ctx.versions_dir(),
                libraries_dir,
                minecraft_version: mc.clone(),
            };
            Some(hider.hide().await?)
        } else {
            None
        };

        let plan = LaunchPlan {
            java_path: ctx.java_path.clone(),
            args,
            main_class,
            cwd: ctx.game_dir.clone(),
            natives_dir,
            mod_list: mod_list.map(|l| l.file),
            hidden,
            secrets: ctx.secrets(),
        };
        log::info!("Launch command: {}", plan.redacted_command());
        Ok(plan)
    }

    /// Memory, manifest JVM arguments, loader flags, then user options; the
    /// first occurrence of each key wins.
    fn jvm_arguments(
        &self,
        vanilla: &VersionManifest,
        loader: Option<&SyntheticVersionManifest>,
        vars: &TemplateContext,
        rules: &RuleContext,
    ) -> Vec<String> {
        let ctx = self.ctx;
        let mut args = memory_arguments(ctx.min_ram_mb, ctx.max_ram_mb);

        let vanilla_jvm = vanilla.arguments.as_ref().map(|a| a.jvm.as_slice()).unwrap_or(&[]);
        if vanilla_jvm.is_empty() {
            // pre-1.13 manifests carry no JVM arguments
            let legacy: Vec<Argument> = [
                "-Djava.library.path=${natives_directory}",
                "-cp",
                "${classpath}",
            ]
            .into_iter()
            .map(Argument::from)
            .collect();
            args.extend(resolve_jvm_arguments(&legacy, vars, rules));
        } else {
            args.extend(resolve_jvm_arguments(vanilla_jvm, vars, rules));
        }
        if let Some(loader) = loader {
            args.extend(resolve_jvm_arguments(loader.jvm_args(), vars, rules));
        }

        args.push(format!("-Dminecraft.launcher.brand={}", ctx.launcher_name));
        args.push(format!("-Dminecraft.launcher.version={}", ctx.launcher_version));

        let tag = loader.and_then(|l| l.loader_tag.as_ref());
        if let Some(tag) = tag {
            args.extend(tag.jvm_flags.iter().cloned());
        }
        ensure_quilt_namespace(&mut args, tag);

        args.extend(ctx.global_jvm_args.iter().cloned());
        args.extend(ctx.server.jvm_args.iter().cloned());

        let secrets = ctx.secrets();
        let secrets: Vec<&str> = secrets.iter().map(String::as_str).collect();
        dedup_jvm_arguments(args, &secrets)
    }

    fn game_arguments(
        &self,
        vanilla: &VersionManifest,
        loader: Option<&SyntheticVersionManifest>,
        vars: &TemplateContext,
        rules: &RuleContext,
    ) -> Vec<String> {
        let game = &self.ctx.game;
        // a loader template replaces the vanilla one wholesale
        let legacy_template = loader
            .and_then(|l| l.minecraft_arguments.as_deref())
            .or(vanilla.minecraft_arguments.as_deref());
        let modern = vanilla
            .arguments
            .as_ref()
            .map(|a| !a.game.is_empty())
            .unwrap_or(false);

        if !modern {
            return match legacy_template {
                Some(template) => legacy_game_arguments(template, vars, game),
                None => {
                    log::warn!("{} has no game arguments", vanilla.id);
                    Vec::new()
                }
            };
        }

        let mut all: Vec<Argument> = vanilla
            .arguments
            .as_ref()
            .map(|a| a.game.clone())
            .unwrap_or_default();
        if let Some(loader) = loader {
            all.extend(loader.game_args().iter().cloned());
        }
        resolve_game_arguments(&all, vars, rules, game.fullscreen)
    }
}

fn mentions_quick_play(vanilla: &VersionManifest, loader: Option<&SyntheticVersionManifest>) -> bool {
    let contains = |args: &[Argument]| {
        args.iter().any(|a| match a {
            Argument::Simple(s) => s.contains(QUICK_PLAY_TOKEN),
            Argument::Conditional { value, .. } => {
                value.parts().iter().any(|p| p.contains(QUICK_PLAY_TOKEN))
            }
        })
    };
    vanilla
        .arguments
        .as_ref()
        .map(|a| contains(&a.game))
        .unwrap_or(false)
        || loader.map(|l| contains(l.game_args())).unwrap_or(false)
}

/// LiteLoader only exists for legacy versions and needs its tweaker named.
fn uses_liteloader(vanilla: &VersionManifest, ctx: &LaunchContext) -> bool {
    if is_at_least(ctx.minecraft_version(), "1.13") {
        return false;
    }
    vanilla
        .libraries
        .iter()
        .any(|l| l.name.starts_with(LITELOADER_PREFIX))
        || ctx
            .server
            .libraries
            .iter()
            .any(|m| m.id.starts_with(LITELOADER_PREFIX))
}

/// Builds a plan for `ctx`.
pub async fn build_launch_plan(ctx: &LaunchContext) -> Result<LaunchPlan> {
    LaunchArgumentBuilder::new(ctx).build().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::catalog::ModuleRef;
    use crate::game::installer::manifest::{LibraryRef, LoaderTag, MappingsKind};
    use crate::game::installer::modloaders::quilt::QUILT_TARGET_NAMESPACE_FLAG;
    use crate::game::launcher::types::test_support::{context, server};
    use serde_json::json;
    use std::path::Path;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"jar").unwrap();
    }

    fn write_json(path: &Path, value: &serde_json::Value) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    }

    fn lib_path(ctx: &LaunchContext, coord: &str) -> std::path::PathBuf {
        crate::game::maven::MavenCoordinate::parse(coord)
            .unwrap()
            .local_path(&ctx.libraries_dir())
    }

    fn install_modern_vanilla(ctx: &LaunchContext, mc: &str) {
        write_json(
            &ctx.version_json_path(mc),
            &json!({
                "id": mc,
                "type": "release",
                "mainClass": "net.minecraft.client.main.Main",
                "assetIndex": {"id": "5"},
                "arguments": {
                    "game": [
                        "--username", "${auth_player_name}",
                        "--version", "${version_name}",
                        "--gameDir", "${game_directory}",
                        "--accessToken", "${auth_access_token}",
                        "--xuid", "${auth_xuid}",
                        {"rules": [{"action": "allow", "features": {"has_custom_resolution": true}}],
                         "value": ["--width", "${resolution_width}", "--height", "${resolution_height}"]},
                        {"rules": [{"action": "allow", "features": {"is_quick_play_multiplayer": true}}],
                         "value": ["--quickPlayMultiplayer", "${quickPlayMultiplayer}"]}
                    ],
                    "jvm": [
                        "-Djava.library.path=${natives_directory}",
                        "-Dminecraft.launcher.brand=${launcher_name}",
                        "-cp", "${classpath}"
                    ]
                },
                "libraries": [
                    {"name": "com.google.guava:guava:20.0"},
                    {"name": "org.ow2.asm:asm:9.3"}
                ]
            }),
        );
        touch(&ctx.vanilla_jar_path());
        touch(&lib_path(ctx, "com.google.guava:guava:20.0"));
        touch(&lib_path(ctx, "org.ow2.asm:asm:9.3"));
    }

    #[tokio::test]
    async fn fabric_launch_merges_everything() {
        let tmp = tempdir().unwrap();
        let mut server = server(ModloaderType::Fabric, "1.20.1", Some("0.15.0"));
        server.libraries.push(ModuleRef::library("com.google.guava:guava:24.0"));
        server.mods.push(ModuleRef::mod_file("sodium", tmp.path().join("sodium.jar")));
        server.jvm_args = vec!["-Xmx1G".into(), "-Dfabric.debug=true".into()];
        server.server_address = Some("play.example.com".into());
        let mut ctx = context(tmp.path(), server);
        ctx.global_jvm_args = vec!["-XX:+UseG1GC".into()];
        install_modern_vanilla(&ctx, "1.20.1");

        let mut loader = SyntheticVersionManifest::new(
            ctx.server.version_id.clone(),
            "net.fabricmc.loader.impl.launch.knot.KnotClient",
        );
        loader.inherits_from = Some("1.20.1".into());
        loader.libraries.push(LibraryRef::new("net.fabricmc:fabric-loader:0.15.0"));
        loader.libraries.push(LibraryRef::new("org.ow2.asm:asm:9.6"));
        loader.arguments.jvm.push("-DFabricMcEmu= net.minecraft.client.main.Main ".into());
        loader.save(&ctx.version_json_path(&ctx.server.version_id)).await.unwrap();
        touch(&lib_path(&ctx, "com.google.guava:guava:24.0"));
        touch(&lib_path(&ctx, "net.fabricmc:fabric-loader:0.15.0"));
        touch(&lib_path(&ctx, "org.ow2.asm:asm:9.6"));

        let plan = build_launch_plan(&ctx).await.unwrap();
        let args = &plan.args;
        assert_eq!(&args[..2], &["-Xmx4096M".to_string(), "-Xms1024M".to_string()]);
        // a custom -Xmx is kept after the computed one, so the JVM applies it
        let custom = args.iter().position(|a| a == "-Xmx1G").unwrap();
        assert!(custom > 1);
        assert!(args.contains(&"-DFabricMcEmu= net.minecraft.client.main.Main ".to_string()));
        assert!(args.contains(&"-XX:+UseG1GC".to_string()));
        assert!(args.contains(&"-Dfabric.debug=true".to_string()));
        assert_eq!(
            args.iter().filter(|a| a.starts_with("-Dminecraft.launcher.brand=")).count(),
            1
        );

        let cp_idx = args.iter().position(|a| a == "-cp").unwrap();
        let cp: Vec<&str> = args[cp_idx + 1].split(':').collect();
        assert_eq!(cp.len(), 4);
        assert!(cp[0].ends_with("guava-24.0.jar"));
        assert!(cp[1].ends_with("asm-9.6.jar"));
        assert!(cp[2].ends_with("fabric-loader-0.15.0.jar"));
        assert!(cp[3].ends_with("1.20.1.jar"));

        let main_idx = args
            .iter()
            .position(|a| a == "net.fabricmc.loader.impl.launch.knot.KnotClient")
            .unwrap();
        let game = &args[main_idx + 1..];
        assert_eq!(game[0], "--username");
        assert_eq!(game[1], "Steve");
        assert!(!game.contains(&"--xuid".to_string()));
        let qp = game.iter().position(|a| a == "--quickPlayMultiplayer").unwrap();
        assert_eq!(game[qp + 1], "play.example.com:25565");
        assert!(!game.contains(&"--server".to_string()));
        let mods = game.iter().position(|a| a == "--fabric.addMods").unwrap();
        assert!(game[mods + 1].starts_with('@'));

        assert!(plan.natives_dir.starts_with(ctx.natives_root()));
        assert!(plan.natives_dir.is_dir());
        assert!(plan.hidden.is_none());
        assert!(!plan.redacted_command().contains("super-secret-access-token"));
    }

    #[tokio::test]
    async fn legacy_forge_uses_loader_template() {
        let tmp = tempdir().unwrap();
        let mut server = server(ModloaderType::Forge, "1.12.2", Some("14.23.5.2860"));
        server.server_address = Some("localhost:25570".into());
        let ctx = context(tmp.path(), server);
        write_json(
            &ctx.version_json_path("1.12.2"),
            &json!({
                "id": "1.12.2",
                "mainClass": "net.minecraft.client.main.Main",
                "assets": "1.12",
                "minecraftArguments": "--username ${auth_player_name} --version ${version_name}",
                "libraries": [{"name": "net.sf.jopt-simple:jopt-simple:5.0.3"}]
            }),
        );
        touch(&ctx.vanilla_jar_path());
        touch(&lib_path(&ctx, "net.sf.jopt-simple:jopt-simple:5.0.3"));

        let mut loader = SyntheticVersionManifest::new(
            ctx.server.version_id.clone(),
            "net.minecraft.launchwrapper.Launch",
        );
        loader.minecraft_arguments = Some(
            "--username ${auth_player_name} --session ${auth_session} --tweakClass net.minecraftforge.fml.common.launcher.FMLTweaker"
                .into(),
        );
        loader.libraries.push(LibraryRef::new("net.minecraft:launchwrapper:1.12"));
        loader.save(&ctx.version_json_path(&ctx.server.version_id)).await.unwrap();
        touch(&lib_path(&ctx, "net.minecraft:launchwrapper:1.12"));

        let plan = build_launch_plan(&ctx).await.unwrap();
        let args = &plan.args;
        assert!(args.iter().any(|a| a.starts_with("-Djava.library.path=")));
        let cp_idx = args.iter().position(|a| a == "-cp").unwrap();
        // Forge before 1.17 still needs the vanilla jar
        assert!(args[cp_idx + 1].ends_with("1.12.2.jar"));

        let main_idx = args
            .iter()
            .position(|a| a == "net.minecraft.launchwrapper.Launch")
            .unwrap();
        let game: Vec<&str> = args[main_idx + 1..].iter().map(String::as_str).collect();
        assert_eq!(
            game,
            vec![
                "--username",
                "Steve",
                "--session",
                "token:super-secret-access-token:0123456789abcdef0123456789abcdef",
                "--tweakClass",
                "net.minecraftforge.fml.common.launcher.FMLTweaker",
                "--width",
                "1280",
                "--height",
                "720",
                "--server",
                "localhost",
                "--port",
                "25570",
            ]
        );
    }

    #[tokio::test]
    async fn hashed_quilt_gets_namespace_flag() {
        let tmp = tempdir().unwrap();
        let server = server(ModloaderType::Quilt, "1.20.1", Some("0.23.0"));
        let ctx = context(tmp.path(), server);
        install_modern_vanilla(&ctx, "1.20.1");
        let mut loader = SyntheticVersionManifest::new(
            ctx.server.version_id.clone(),
            "org.quiltmc.loader.impl.launch.knot.KnotClient",
        );
        loader.loader_tag = Some(LoaderTag {
            loader_type: ModloaderType::Quilt,
            minecraft_version: "1.20.1".into(),
            loader_version: Some("0.23.0".into()),
            mappings: Some(MappingsKind::Hashed),
            jvm_flags: vec![],
            installer_sha1: None,
            installed_at: chrono::Utc::now(),
        });
        loader.save(&ctx.version_json_path(&ctx.server.version_id)).await.unwrap();

        let plan = build_launch_plan(&ctx).await.unwrap();
        assert_eq!(
            plan.args
                .iter()
                .filter(|a| *a == QUILT_TARGET_NAMESPACE_FLAG)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn missing_library_fails_validation() {
        let tmp = tempdir().unwrap();
        let server = server(ModloaderType::Vanilla, "1.20.1", None);
        let ctx = context(tmp.path(), server);
        install_modern_vanilla(&ctx, "1.20.1");
        std::fs::remove_file(lib_path(&ctx, "org.ow2.asm:asm:9.3")).unwrap();

        let err = build_launch_plan(&ctx).await.unwrap_err();
        assert!(format!("{:#}", err).contains("asm-9.3.jar"));
    }
}
