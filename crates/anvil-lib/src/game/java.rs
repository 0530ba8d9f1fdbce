//! Picking a Java runtime that can run a given game version.

use crate::error::AnvilError;
use crate::utils::cache::{Clock, SystemClock, TtlCache};
use crate::utils::process::AnvilCommandExt;
use crate::utils::version::is_at_least;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const PROBE_TTL_MINUTES: i64 = 10;

static VERSION_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"version\s+"(\d+)(?:\.(\d+))?[^"]*""#).ok());

/// Java major version a game version expects when its manifest is silent.
pub fn required_java_major(minecraft_version: &str) -> u32 {
    if is_at_least(minecraft_version, "1.20.5") {
        21
    } else if is_at_least(minecraft_version, "1.18") {
        17
    } else if is_at_least(minecraft_version, "1.17") {
        16
    } else {
        8
    }
}

/// Java 8 games break on newer runtimes; everything else runs forward.
pub fn is_compatible(required: u32, found: u32) -> bool {
    if required == 8 {
        found == 8
    } else {
        found >= required
    }
}

/// Major version from `java -version` output; `1.8.0_312` reads as 8.
pub fn parse_java_major(output: &str) -> Option<u32> {
    let caps = VERSION_RE.as_ref()?.captures(output)?;
    let major: u32 = caps.get(1)?.as_str().parse().ok()?;
    if major == 1 {
        return caps.get(2)?.as_str().parse().ok();
    }
    Some(major)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JavaRuntime {
    pub path: PathBuf,
    pub major: u32,
    pub is_64bit: bool,
}

pub trait JavaResolver: Send + Sync {
    /// A runtime able to start `minecraft_version`. `required` overrides the
    /// version table, typically from the manifest's `javaVersion`.
    fn resolve<'a>(
        &'a self,
        minecraft_version: &'a str,
        required: Option<u32>,
        configured: Option<&'a Path>,
    ) -> BoxFuture<'a, Result<JavaRuntime>>;
}

/// Looks at the configured path, then `JAVA_HOME`, then `PATH`.
pub struct SystemJavaResolver {
    probes: TtlCache<PathBuf, Option<JavaRuntime>>,
}

impl Default for SystemJavaResolver {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl SystemJavaResolver {
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            probes: TtlCache::new(chrono::Duration::minutes(PROBE_TTL_MINUTES), clock),
        }
    }

    fn candidates(configured: Option<&Path>) -> Vec<PathBuf> {
        let mut out = Vec::new();
        if let Some(path) = configured {
            out.push(path.to_path_buf());
        }
        if let Some(home) = std::env::var_os("JAVA_HOME") {
            let bin = if cfg!(windows) { "java.exe" } else { "java" };
            out.push(PathBuf::from(home).join("bin").join(bin));
        }
        if let Ok(found) = which::which("java") {
            out.push(found);
        }
        out.dedup();
        out
    }

    /// Runs `java -version`, memoized per path.
    pub async fn probe(&self, path: &Path) -> Option<JavaRuntime> {
        let key = path.to_path_buf();
        if let Some(cached) = self.probes.get(&key) {
            return cached;
        }
        let result = probe_uncached(path).await;
        if let Err(e) = &result {
            log::debug!("Java probe failed for {:?}: {:#}", path, e);
        }
        let runtime = result.ok();
        self.probes.insert(key, runtime.clone());
        runtime
    }
}

async fn probe_uncached(path: &Path) -> Result<JavaRuntime> {
    if !path.exists() {
        anyhow::bail!("Java path does not exist: {:?}", path);
    }
    let output = tokio::process::Command::new(path)
        .arg("-version")
        .suppress_console()
        .output()
        .await
        .context("Failed to run java -version")?;
    // java -version prints to stderr
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stderr),
        String::from_utf8_lossy(&output.stdout)
    );
    let major = parse_java_major(&text)
        .with_context(|| format!("Could not parse Java version from: {}", text.trim()))?;
    Ok(JavaRuntime {
        path: dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()),
        major,
        is_64bit: text.contains("64-Bit") || text.contains("x86_64") || text.contains("amd64"),
    })
}

impl JavaResolver for SystemJavaResolver {
    fn resolve<'a>(
        &'a self,
        minecraft_version: &'a str,
        required: Option<u32>,
        configured: Option<&'a Path>,
    ) -> BoxFuture<'a, Result<JavaRuntime>> {
        Box::pin(async move {
            let required = required.unwrap_or_else(|| required_java_major(minecraft_version));
            for candidate in Self::candidates(configured) {
                match self.probe(&candidate).await {
                    Some(runtime) if is_compatible(required, runtime.major) => {
                        log::info!(
                            "Using Java {} at {:?} for {}",
                            runtime.major,
                            runtime.path,
                            minecraft_version
                        );
                        return Ok(runtime);
                    }
                    Some(runtime) => log::warn!(
                        "Skipping Java {} at {:?}: {} needs Java {}",
                        runtime.major,
                        runtime.path,
                        minecraft_version,
                        required
                    ),
                    None => {}
                }
            }
            Err(AnvilError::JavaIncompatible {
                minecraft_version: minecraft_version.to_string(),
                recommended_major: required,
            }
            .into())
        })
    }
}
