//! One substitution pass for every templated argument source: launch
//! arguments use `${name}`, Forge processors use `{NAME}` and `[artifact]`.

use crate::game::maven::{strip_brackets, MavenCoordinate};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

static DOLLAR_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9_.\-]+)\}").expect("static regex"));
static BRACE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    /// `${auth_player_name}` in Mojang manifests
    Dollar,
    /// `{MINECRAFT_JAR}` in Forge install profiles
    Brace,
}

impl Syntax {
    fn pattern(&self) -> &'static Regex {
        match self {
            Syntax::Dollar => &DOLLAR_TOKEN,
            Syntax::Brace => &BRACE_TOKEN,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemplateContext {
    syntax: Syntax,
    values: HashMap<String, String>,
    libraries_dir: Option<PathBuf>,
}

impl TemplateContext {
    pub fn new(syntax: Syntax) -> Self {
        Self {
            syntax,
            values: HashMap::new(),
            libraries_dir: None,
        }
    }

    /// Lets whole-argument `[group:artifact:version]` references resolve to
    /// paths under this directory.
    pub fn with_libraries(mut self, libraries_dir: impl Into<PathBuf>) -> Self {
        self.libraries_dir = Some(libraries_dir.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn set_path(&mut self, key: impl Into<String>, path: &Path) -> &mut Self {
        self.set(key, path.to_string_lossy().to_string())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn syntax(&self) -> Syntax {
        self.syntax
    }

    /// Resolves a `[coords]` reference to its library path.
    pub fn artifact_path(&self, reference: &str) -> Option<PathBuf> {
        let libraries = self.libraries_dir.as_ref()?;
        let coords = strip_brackets(reference)?;
        MavenCoordinate::parse(coords)
            .ok()
            .map(|c| c.local_path(libraries))
    }

    /// Substitutes every known token. Unknown tokens are left in place so a
    /// later check can still see them.
    pub fn render(&self, text: &str) -> String {
        if let Some(path) = self.artifact_path(text) {
            return path.to_string_lossy().to_string();
        }
        self.syntax
            .pattern()
            .replace_all(text, |caps: &Captures| match self.values.get(&caps[1]) {
                Some(v) => v.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Like [`render`](Self::render) but yields `None` when any token is
    /// unknown or resolves to an empty value, so optional arguments can be
    /// dropped instead of leaving a dangling flag.
    pub fn render_strict(&self, text: &str) -> Option<String> {
        let complete = self
            .syntax
            .pattern()
            .captures_iter(text)
            .all(|caps| matches!(self.values.get(&caps[1]), Some(v) if !v.trim().is_empty()));
        if !complete || (self.syntax == Syntax::Dollar && has_unclosed_dollar(text)) {
            return None;
        }
        Some(self.render(text))
    }

    /// Token names in `text` that this context cannot resolve.
    pub fn unresolved(&self, text: &str) -> Vec<String> {
        self.syntax
            .pattern()
            .captures_iter(text)
            .filter(|caps| !self.values.contains_key(&caps[1]))
            .map(|caps| caps[1].to_string())
            .collect()
    }
}

fn has_unclosed_dollar(text: &str) -> bool {
    text.match_indices("${")
        .any(|(idx, _)| !text[idx..].contains('}'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dollar_tokens_substitute() {
        let mut ctx = TemplateContext::new(Syntax::Dollar);
        ctx.set("auth_player_name", "Steve").set("version_name", "1.20.1");
        assert_eq!(ctx.render("--username ${auth_player_name}"), "--username Steve");
        assert_eq!(ctx.render("${version_name}-${unknown}"), "1.20.1-${unknown}");
        assert_eq!(ctx.unresolved("${version_name}-${unknown}"), vec!["unknown"]);
    }

    #[test]
    fn strict_render_drops_missing_or_empty() {
        let mut ctx = TemplateContext::new(Syntax::Dollar);
        ctx.set("quickPlayPath", "").set("width", "854");
        assert_eq!(ctx.render_strict("${quickPlayPath}"), None);
        assert_eq!(ctx.render_strict("${nope}"), None);
        assert_eq!(ctx.render_strict("${width"), None);
        assert_eq!(ctx.render_strict("${width}").as_deref(), Some("854"));
        assert_eq!(ctx.render_strict("--demo").as_deref(), Some("--demo"));
    }

    #[test]
    fn brace_tokens_and_artifacts() {
        let mut ctx = TemplateContext::new(Syntax::Brace).with_libraries("/libs");
        ctx.set("SIDE", "client");
        assert_eq!(ctx.render("--side={SIDE}"), "--side=client");
        // dollar syntax is not touched by a brace context
        assert_eq!(ctx.render("${SIDE}"), "$client");

        let rendered = ctx.render("[net.minecraft:client:1.20.1-20230612.114412:srg]");
        let expected = Path::new("/libs")
            .join("net")
            .join("minecraft")
            .join("client")
            .join("1.20.1-20230612.114412")
            .join("client-1.20.1-20230612.114412-srg.jar");
        assert_eq!(PathBuf::from(rendered), expected);
    }
}
