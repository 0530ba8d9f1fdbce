//! Argument resolution for both manifest eras, plus JVM argument merging
use crate::game::installer::manifest::{LoaderTag, MappingsKind};
use crate::game::installer::modloaders::quilt::QUILT_TARGET_NAMESPACE_FLAG;
use crate::game::config_store::{AuthKind, GameSettings};
use crate::game::launcher::rules::{mentions_feature, rules_allow, RuleContext};
use crate::game::launcher::types::LaunchContext;
use crate::game::launcher::version_parser::{Argument, VersionManifest};
use crate::game::template::{Syntax, TemplateContext};
use crate::utils::redact::redact_args;
use dunce::canonicalize;
use std::collections::HashSet;
use std::path::Path;

pub const CUSTOM_RESOLUTION: &str = "has_custom_resolution";
pub const QUICK_PLAY_MULTIPLAYER: &str = "is_quick_play_multiplayer";
pub const DEFAULT_SERVER_PORT: u16 = 25565;

/// Flags whose value is the next token.
const PAIRED_FLAGS: &[&str] = &[
    "-cp",
    "-classpath",
    "--class-path",
    "-p",
    "--module-path",
    "--add-opens",
    "--add-exports",
    "--add-modules",
    "--add-reads",
    "--patch-module",
];

/// Flags that may legitimately appear many times with different values.
const REPEATABLE_FLAGS: &[&str] = &[
    "--add-opens",
    "--add-exports",
    "--add-modules",
    "--add-reads",
    "--patch-module",
    "-javaagent",
];

/// Memory flags are keyed by prefix since their value is glued on.
fn display_path(path: &Path) -> String {
    canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_string()
}

/// Rule context for this launch: host platform plus the launcher features.
pub fn rule_context(ctx: &LaunchContext) -> RuleContext {
    let mut rules = RuleContext::current();
    rules.os = ctx.os;
    let custom = !ctx.game.fullscreen && ctx.game.width.is_some() && ctx.game.height.is_some();
    rules
        .with_feature(CUSTOM_RESOLUTION, custom)
        .with_feature("is_demo_user", false)
}

/// The `${...}` placeholders every manifest argument may use.
pub fn launch_variables(
    ctx: &LaunchContext,
    manifest: &VersionManifest,
    version_name: &str,
    natives_dir: &Path,
    classpath: &str,
) -> TemplateContext {
    let mut vars = TemplateContext::new(Syntax::Dollar);
    let auth = &ctx.auth;

    vars.set("auth_player_name", auth.display_name.as_str())
        .set("auth_uuid", auth.uuid.as_str())
        .set("auth_access_token", auth.access_token.as_str())
        .set("auth_xuid", "")
        .set("clientid", "")
        .set("user_type", auth.user_type())
        .set("user_properties", "{}");
    let session = match auth.kind {
        AuthKind::Offline => "-".to_string(),
        _ => format!("token:{}:{}", auth.access_token, auth.uuid),
    };
    vars.set("auth_session", session);

    vars.set("version_name", version_name)
        .set(
            "version_type",
            manifest.version_type.clone().unwrap_or_else(|| "release".into()),
        )
        .set("launcher_name", ctx.launcher_name.as_str())
        .set("launcher_version", ctx.launcher_version.as_str());

    let assets_root = ctx.assets_dir();
    let assets_id = manifest.assets_id().unwrap_or("legacy").to_string();
    let game_assets = if assets_id == "legacy" || assets_id == "pre-1.6" {
        assets_root.join("virtual").join(&assets_id)
    } else {
        assets_root.clone()
    };
    vars.set("game_directory", display_path(&ctx.game_dir))
        .set("assets_root", display_path(&assets_root))
        .set("game_assets", display_path(&game_assets))
        .set("assets_index_name", assets_id)
        .set("natives_directory", display_path(natives_dir))
        .set("library_directory", display_path(&ctx.libraries_dir()))
        .set("classpath_separator", ctx.os.classpath_separator())
        .set("classpath", classpath);

    if let (Some(w), Some(h)) = (ctx.game.width, ctx.game.height) {
        vars.set("resolution_width", w.to_string())
            .set("resolution_height", h.to_string());
    }
    vars
}

/// JVM arguments are never split: `-DFabricMcEmu= net.minecraft.client.main.Main `
/// must stay one token.
pub fn resolve_jvm_arguments(args: &[Argument], vars: &TemplateContext, rules: &RuleContext) -> Vec<String> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            Argument::Simple(s) => match vars.render_strict(s) {
                Some(v) if !v.trim().is_empty() => out.push(v),
                _ => log::debug!("Dropping JVM argument with unresolved tokens: {}", s),
            },
            Argument::Conditional { rules: r, value } => {
                if !rules_allow(r, rules) {
                    continue;
                }
                let parts: Option<Vec<String>> =
                    value.parts().into_iter().map(|p| vars.render_strict(p)).collect();
                match parts {
                    Some(parts) => out.extend(parts),
                    None => log::debug!("Dropping conditional JVM argument {:?}", value),
                }
            }
        }
    }
    out
}

/// Modern game arguments. A template string is split on whitespace before
/// substitution so values with spaces (paths) stay one token. A group whose
/// tokens do not all resolve is dropped whole, so no flag is left without
/// its value.
pub fn resolve_game_arguments(
    args: &[Argument],
    vars: &TemplateContext,
    rules: &RuleContext,
    fullscreen: bool,
) -> Vec<String> {
    let mut out = Vec::new();
    let mut fullscreen_added = false;
    // index of a bare `--flag` whose value is the next simple argument
    let mut pending_flag: Option<usize> = None;
    for arg in args {
        let parts: Vec<&str> = match arg {
            Argument::Simple(s) => vec![s.as_str()],
            Argument::Conditional { rules: r, value } => {
                pending_flag = None;
                if fullscreen && mentions_feature(r, CUSTOM_RESOLUTION) {
                    if !fullscreen_added {
                        out.push("--fullscreen".to_string());
                        fullscreen_added = true;
                    }
                    continue;
                }
                if !rules_allow(r, rules) {
                    continue;
                }
                value.parts()
            }
        };
        let simple = matches!(arg, Argument::Simple(_));
        let tokens: Option<Vec<String>> = parts
            .iter()
            .flat_map(|p| p.split_whitespace())
            .map(|t| vars.render_strict(t))
            .collect();
        match tokens {
            Some(tokens) => {
                let lone_flag = simple && tokens.len() == 1 && tokens[0].starts_with("--");
                out.extend(tokens);
                pending_flag = lone_flag.then(|| out.len() - 1);
            }
            None => {
                if simple && pending_flag == Some(out.len().wrapping_sub(1)) {
                    out.pop();
                }
                pending_flag = None;
                log::debug!("Dropping game argument group {:?}", parts);
            }
        }
    }
    out
}

/// Pre-1.13 `minecraftArguments`. Unknown tokens are kept as-is so flag and
/// value positions never shift.
pub fn legacy_game_arguments(template: &str, vars: &TemplateContext, game: &GameSettings) -> Vec<String> {
    let mut out: Vec<String> = template
        .split_whitespace()
        .map(|t| vars.render(t))
        .collect();
    if game.fullscreen {
        out.push("--fullscreen".to_string());
    } else if let (Some(w), Some(h)) = (game.width, game.height) {
        out.extend([
            "--width".to_string(),
            w.to_string(),
            "--height".to_string(),
            h.to_string(),
        ]);
    }
    out
}

pub fn memory_arguments(min_mb: u64, max_mb: u64) -> Vec<String> {
    vec![format!("-Xmx{}M", max_mb), format!("-Xms{}M", min_mb.min(max_mb))]
}

/// Hashed Quilt installs must force the official target namespace.
pub fn ensure_quilt_namespace(args: &mut Vec<String>, tag: Option<&LoaderTag>) {
    let hashed = tag
        .map(|t| t.mappings == Some(MappingsKind::Hashed))
        .unwrap_or(false);
    if hashed && !args.iter().any(|a| a == QUILT_TARGET_NAMESPACE_FLAG) {
        log::info!("Hashed Quilt mappings, adding {}", QUILT_TARGET_NAMESPACE_FLAG);
        args.push(QUILT_TARGET_NAMESPACE_FLAG.to_string());
    }
}

/// Dedup key of a single JVM token: `-Dkey`, the `-XX` option name with its
/// `+`/`-` switch stripped, otherwise the text before the first `=` or
/// whitespace. `-Xlog:gc` and `-Xlog:safepoint` are different keys, as are
/// `-Xmx2G` and `-Xmx4G` (the JVM honours the last one).
pub fn argument_key(arg: &str) -> String {
    if let Some(rest) = arg.strip_prefix("-D") {
        let name = rest.split('=').next().unwrap_or(rest);
        return format!("-D{}", name);
    }
    if let Some(rest) = arg.strip_prefix("-XX:") {
        let rest = rest.trim_start_matches(['+', '-']);
        let name = rest.split('=').next().unwrap_or(rest);
        return format!("-XX:{}", name);
    }
    arg.split(|c: char| c == '=' || c.is_whitespace())
        .next()
        .unwrap_or(arg)
        .to_string()
}

/// Drops later duplicates of the same key, keeping the first. Paired flags
/// travel with their value; repeatable flags only collapse when the value is
/// identical too.
pub fn dedup_jvm_arguments(args: Vec<String>, secrets: &[&str]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(args.len());
    let mut dropped = Vec::new();
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        let paired = PAIRED_FLAGS.contains(&arg.as_str());
        let value = if paired { iter.next() } else { None };
        let key = argument_key(&arg);
        let repeatable = REPEATABLE_FLAGS.contains(&key.as_str());
        let identity = match (&value, repeatable) {
            (Some(v), true) => format!("{} {}", key, v),
            (None, true) => arg.clone(),
            _ => key,
        };

        if seen.insert(identity) {
            out.push(arg);
            out.extend(value);
        } else {
            dropped.push(arg);
            dropped.extend(value);
        }
    }

    if !dropped.is_empty() {
        log::warn!(
            "Dropped duplicate JVM arguments: {}",
            redact_args(&dropped, secrets).join(" ")
        );
    }
    out
}

/// `host[:port]`, port defaulting to 25565. Bracketed IPv6 hosts are kept.
pub fn parse_server_address(address: &str) -> Option<(String, u16)> {
    let address = address.trim();
    if address.is_empty() {
        return None;
    }
    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(p) => p.parse().ok()?,
            None => DEFAULT_SERVER_PORT,
        };
        return Some((host.to_string(), port));
    }
    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => Some((host.to_string(), port.parse().ok()?)),
        Some(_) => Some((address.to_string(), DEFAULT_SERVER_PORT)),
        None => Some((address.to_string(), DEFAULT_SERVER_PORT)),
    }
}
