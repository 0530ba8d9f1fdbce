//! Runs the processors declared by a Forge/NeoForge install profile.

use super::parser::{extract_main_class_from_jar, InstallProfile, InstallerArchive, ProcessorSpec};
use crate::error::AnvilError;
use crate::game::installer::config::{Endpoints, PROCESSOR_TIMEOUT_SECS};
use crate::game::installer::core::downloader::ArtifactFetcher;
use crate::game::installer::types::{OsType, ProgressReporter, SilentProgressReporter};
use crate::game::maven::{strip_brackets, MavenCoordinate};
use crate::game::template::{Syntax, TemplateContext};
use crate::utils::hash::{file_matches_sha1, is_placeholder_hash};
use crate::utils::process::AnvilCommandExt;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Data keys whose files are intermediates and safe to regenerate.
pub const CLEANABLE_DATA_KEYS: &[&str] = &[
    "MC_SLIM",
    "MC_EXTRA",
    "MC_SRG",
    "MAPPINGS",
    "MC_MAPPINGS",
    "MOJMAPS",
    "MC_UNPACKED",
    "PATCHED",
];

/// Paths the engine works against.
#[derive(Debug, Clone)]
pub struct ProcessorPaths {
    /// Shared data root; `{ROOT}` in processor arguments
    pub common_dir: PathBuf,
    pub libraries_dir: PathBuf,
    pub minecraft_jar: PathBuf,
    pub java: PathBuf,
    pub installer: PathBuf,
    pub minecraft_version: String,
}

impl ProcessorPaths {
    /// Version-specific extraction target for installer data files.
    pub fn data_dir(&self) -> PathBuf {
        self.libraries_dir.join("data").join(&self.minecraft_version)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorReport {
    pub total: usize,
    pub executed: usize,
    pub skipped: usize,
}

pub struct ForgeProcessorEngine<'a> {
    profile: &'a InstallProfile,
    paths: ProcessorPaths,
    archive: InstallerArchive,
    fetcher: ArtifactFetcher,
    endpoints: &'a Endpoints,
    timeout: Duration,
}

impl<'a> ForgeProcessorEngine<'a> {
    pub fn new(
        profile: &'a InstallProfile,
        paths: ProcessorPaths,
        fetcher: &ArtifactFetcher,
        endpoints: &'a Endpoints,
    ) -> Self {
        let archive = InstallerArchive::new(&paths.installer);
        Self {
            profile,
            paths,
            archive,
            // vendor lookups fall through quickly on 404
            fetcher: fetcher.clone().with_attempts(1),
            endpoints,
            timeout: Duration::from_secs(PROCESSOR_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn paths(&self) -> &ProcessorPaths {
        &self.paths
    }

    /// Built-in variables plus the `data` entries that need no extraction.
    pub fn static_context(&self) -> TemplateContext {
        let mut ctx = TemplateContext::new(Syntax::Brace).with_libraries(&self.paths.libraries_dir);
        ctx.set("SIDE", "client")
            .set_path("MINECRAFT_JAR", &self.paths.minecraft_jar)
            .set("MINECRAFT_VERSION", self.paths.minecraft_version.clone())
            .set_path("ROOT", &self.paths.common_dir)
            .set_path("INSTALLER", &self.paths.installer)
            .set_path("LIBRARY_DIR", &self.paths.libraries_dir);
        for (key, entry) in &self.profile.data {
            let value = &entry.client;
            if value.starts_with('/') {
                continue;
            }
            if let Some(path) = ctx.artifact_path(value) {
                ctx.set_path(key.clone(), &path);
            } else if let Some(literal) = value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')) {
                ctx.set(key.clone(), literal);
            } else {
                ctx.set(key.clone(), value.clone());
            }
        }
        ctx
    }

    /// Where every client processor writes, without touching the disk.
    pub fn expected_outputs(&self) -> Vec<PathBuf> {
        let ctx = self.static_context();
        self.profile
            .client_processors()
            .iter()
            .flat_map(|p| p.outputs.keys())
            .map(|key| self.output_path(key, &ctx))
            .collect()
    }

    /// [`static_context`](Self::static_context) plus installer data files,
    /// extracted under the version-specific data directory.
    pub async fn build_context(&self) -> Result<TemplateContext> {
        let mut ctx = self.static_context();
        let data_dir = self.paths.data_dir();
        let mut keys: Vec<&String> = self.profile.data.keys().collect();
        keys.sort();
        for key in keys {
            let value = &self.profile.data[key].client;
            let Some(inner) = value.strip_prefix('/') else {
                continue;
            };
            let rel = inner.strip_prefix("data/").unwrap_or(inner);
            let dest = rel
                .split('/')
                .fold(data_dir.clone(), |acc, seg| acc.join(seg));
            let archive = self.archive.clone();
            let entry = inner.to_string();
            let target = dest.clone();
            tokio::task::spawn_blocking(move || archive.extract(&entry, &target))
                .await
                .context("Extraction task panicked")??;
            log::debug!("Extracted data {} -> {:?}", key, dest);
            ctx.set_path(key.clone(), &dest);
        }
        Ok(ctx)
    }

    fn output_path(&self, key: &str, ctx: &TemplateContext) -> PathBuf {
        let rendered = ctx.render(key);
        PathBuf::from(rendered)
    }

    fn expected_hash(&self, value: &str, ctx: &TemplateContext) -> String {
        let rendered = ctx.render(value);
        rendered
            .strip_prefix('\'')
            .and_then(|v| v.strip_suffix('\''))
            .map(str::to_string)
            .unwrap_or(rendered)
    }

    /// Whether any declared output is missing, stale, or has a hash that
    /// cannot be known ahead of time. Stale files are deleted.
    pub async fn needs_to_run(&self, processor: &ProcessorSpec, ctx: &TemplateContext) -> Result<bool> {
        if processor.outputs.is_empty() {
            return Ok(true);
        }
        let mut run = false;
        for (key, value) in &processor.outputs {
            let path = self.output_path(key, ctx);
            let expected = self.expected_hash(value, ctx);
            if is_placeholder_hash(&expected) {
                if path.exists() {
                    log::debug!("Output {:?} has unresolvable hash {}, deleting", path, expected);
                    tokio::fs::remove_file(&path)
                        .await
                        .with_context(|| format!("Remove stale output {:?}", path))?;
                }
                run = true;
                continue;
            }
            if !path.is_file() {
                log::debug!("Processor output missing: {:?}", path);
                run = true;
                continue;
            }
            if !file_matches_sha1(&path, &expected).await? {
                log::debug!("Processor output hash mismatch: {:?}", path);
                tokio::fs::remove_file(&path)
                    .await
                    .with_context(|| format!("Remove stale output {:?}", path))?;
                run = true;
            }
        }
        Ok(run)
    }

    /// Deletes every intermediate the processors produce so the next run
    /// starts from nothing.
    pub async fn force_clean(&self, ctx: &TemplateContext) -> Result<()> {
        log::info!("Force-cleaning processor intermediates for {}", self.paths.minecraft_version);
        let mut targets: Vec<PathBuf> = CLEANABLE_DATA_KEYS
            .iter()
            .filter_map(|key| ctx.get(key))
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .collect();
        for processor in self.profile.client_processors() {
            for key in processor.outputs.keys() {
                targets.push(self.output_path(key, ctx));
            }
        }
        for target in targets {
            if target.is_file() && target.starts_with(&self.paths.libraries_dir) {
                tokio::fs::remove_file(&target)
                    .await
                    .with_context(|| format!("Remove intermediate {:?}", target))?;
                log::debug!("Removed {:?}", target);
            }
        }
        let data_dir = self.paths.data_dir();
        if data_dir.is_dir() {
            tokio::fs::remove_dir_all(&data_dir)
                .await
                .with_context(|| format!("Remove data dir {:?}", data_dir))?;
        }
        Ok(())
    }

    /// Finds a processor jar or classpath entry: local libraries, then the
    /// vendor repositories, then the installer's embedded `maven/` tree.
    pub async fn resolve_artifact(&self, reference: &str) -> Result<PathBuf> {
        let coords = strip_brackets(reference).unwrap_or(reference);
        let coordinate = match MavenCoordinate::parse(coords) {
            Ok(c) => c,
            Err(e) => {
                let direct = PathBuf::from(reference);
                if direct.is_file() {
                    return Ok(direct);
                }
                return Err(e.into());
            }
        };

        let local = coordinate.local_path(&self.paths.libraries_dir);
        if local.is_file() {
            return Ok(local);
        }

        for repo in self.endpoints.vendor_repositories() {
            let url = coordinate.to_repository_url(Some(repo));
            match self
                .fetcher
                .ensure(&url, &local, None, &SilentProgressReporter)
                .await
            {
                Ok(_) => return Ok(local),
                Err(e) => log::debug!("{} not at {}: {:#}", coordinate, repo, e),
            }
        }

        let entry = format!("maven/{}", coordinate.to_relative_path());
        let archive = self.archive.clone();
        let target = local.clone();
        let extracted = tokio::task::spawn_blocking(move || -> Result<bool> {
            if archive.has_entry(&entry)? {
                archive.extract(&entry, &target)?;
                Ok(true)
            } else {
                Ok(false)
            }
        })
        .await
        .context("Extraction task panicked")??;
        if extracted {
            return Ok(local);
        }
        anyhow::bail!("Processor artifact {} not found locally, in vendor repositories, or in the installer", coordinate)
    }

    /// Processor arguments after substitution. `{INSTALLER}/entry` arguments
    /// are extracted into `scratch` and replaced by the extracted path.
    async fn render_args(
        &self,
        processor: &ProcessorSpec,
        ctx: &TemplateContext,
        scratch: &Path,
    ) -> Result<Vec<String>> {
        let mut args = Vec::with_capacity(processor.args.len());
        for arg in &processor.args {
            if let Some(entry) = arg
                .strip_prefix("{INSTALLER}")
                .map(|e| e.trim_start_matches(['/', '!']))
                .filter(|e| !e.is_empty())
            {
                let dest = scratch.join(entry.rsplit('/').next().unwrap_or(entry));
                let archive = self.archive.clone();
                let name = entry.to_string();
                let target = dest.clone();
                tokio::task::spawn_blocking(move || archive.extract(&name, &target))
                    .await
                    .context("Extraction task panicked")??;
                args.push(dest.to_string_lossy().to_string());
                continue;
            }
            let rendered = ctx.render(arg);
            let unresolved = ctx.unresolved(&rendered);
            if !unresolved.is_empty() {
                log::warn!("Processor {} argument {} has unknown tokens {:?}", processor.jar, arg, unresolved);
            }
            args.push(rendered);
        }
        Ok(args)
    }

    async fn run_processor(&self, processor: &ProcessorSpec, ctx: &TemplateContext) -> Result<()> {
        let jar = self.resolve_artifact(&processor.jar).await?;
        let mut classpath = vec![jar.clone()];
        for entry in &processor.classpath {
            classpath.push(self.resolve_artifact(entry).await?);
        }
        let classpath = classpath
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join(OsType::current().classpath_separator());

        let jar_for_manifest = jar.clone();
        let main_class = tokio::task::spawn_blocking(move || extract_main_class_from_jar(&jar_for_manifest))
            .await
            .context("Manifest task panicked")?
            .with_context(|| format!("Failed to extract Main-Class from {}", processor.jar))?;

        let scratch = tempfile::Builder::new()
            .prefix("anvil-processor-")
            .tempdir()
            .context("Failed to create processor scratch dir")?;
        let args = self.render_args(processor, ctx, scratch.path()).await?;

        log::debug!("Processor {} main class {} args {:?}", processor.jar, main_class, args);

        let mut command = Command::new(&self.paths.java);
        command
            .arg("-cp")
            .arg(&classpath)
            .arg(&main_class)
            .args(&args)
            .current_dir(&self.paths.common_dir)
            .suppress_console()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .with_context(|| format!("Failed to spawn processor with {:?}", self.paths.java))?;
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.context("Failed to wait for processor")?,
            Err(_) => {
                log::error!("Processor {} timed out", processor.jar);
                return Err(AnvilError::ProcessorTimeout {
                    processor: processor.jar.clone(),
                    seconds: self.timeout.as_secs(),
                }
                .into());
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(classify_failure(&processor.jar, output.status.code(), stdout, stderr).into());
        }
        if !stderr.trim().is_empty() {
            log::debug!("Processor {} stderr:\n{}", processor.jar, stderr);
        }
        Ok(())
    }

    /// Post-run check. A wrong hash is reported as a checksum mismatch so the
    /// caller can clean and retry.
    async fn verify_outputs(&self, processor: &ProcessorSpec, ctx: &TemplateContext) -> Result<()> {
        for (key, value) in &processor.outputs {
            let path = self.output_path(key, ctx);
            if !path.is_file() {
                return Err(AnvilError::ProcessorFailure {
                    processor: processor.jar.clone(),
                    code: Some(0),
                    stdout: String::new(),
                    stderr: format!("expected output {:?} was not created", path),
                }
                .into());
            }
            let expected = self.expected_hash(value, ctx);
            if is_placeholder_hash(&expected) {
                continue;
            }
            if !file_matches_sha1(&path, &expected).await? {
                return Err(AnvilError::ChecksumMismatch {
                    processor: processor.jar.clone(),
                    detail: format!("output {:?} does not match {}", path, expected),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Runs every client processor in declared order.
    pub async fn run(&self, force_clean: bool, reporter: &dyn ProgressReporter) -> Result<ProcessorReport> {
        let mut ctx = self.build_context().await?;
        if force_clean {
            self.force_clean(&ctx).await?;
            // data files went with the data dir
            ctx = self.build_context().await?;
        }

        let processors = self.profile.client_processors();
        let mut report = ProcessorReport {
            total: processors.len(),
            ..Default::default()
        };
        for (idx, processor) in processors.iter().enumerate() {
            reporter.set_substep(
                Some(&processor.jar),
                Some(idx as u32 + 1),
                Some(report.total as u32),
            );
            if !self.needs_to_run(processor, &ctx).await? {
                log::info!(
                    "Skipping processor {}/{}: {} (outputs valid)",
                    idx + 1,
                    report.total,
                    processor.jar
                );
                report.skipped += 1;
                continue;
            }
            log::info!("Executing processor {}/{}: {}", idx + 1, report.total, processor.jar);
            self.run_processor(processor, &ctx).await?;
            self.verify_outputs(processor, &ctx).await?;
            report.executed += 1;
        }
        log::info!(
            "Processors done: {} total, {} executed, {} skipped",
            report.total,
            report.executed,
            report.skipped
        );
        Ok(report)
    }

    /// [`run`](Self::run), then one force-clean retry if the failure was a
    /// checksum mismatch.
    pub async fn run_with_retry(&self, reporter: &dyn ProgressReporter) -> Result<ProcessorReport> {
        match self.run(false, reporter).await {
            Ok(report) => Ok(report),
            Err(e) => {
                let retryable = e
                    .downcast_ref::<AnvilError>()
                    .map(AnvilError::is_retryable_processor_failure)
                    .unwrap_or(false);
                if !retryable {
                    return Err(e);
                }
                log::warn!("Processor checksum mismatch, cleaning and retrying: {:#}", e);
                self.run(true, reporter).await
            }
        }
    }
}

/// Nonzero exit. Output mentioning a checksum is treated as corrupted
/// intermediates.
pub fn classify_failure(processor: &str, code: Option<i32>, stdout: String, stderr: String) -> AnvilError {
    if stderr.contains("checksum") || stderr.contains("Checksum") {
        let detail = stderr
            .lines()
            .filter(|l| l.contains("hecksum"))
            .take(3)
            .collect::<Vec<_>>()
            .join("\n");
        log::warn!("Processor {} reported a checksum problem", processor);
        return AnvilError::ChecksumMismatch {
            processor: processor.to_string(),
            detail,
        };
    }
    log::error!("Processor {} exited with {:?}", processor, code);
    AnvilError::ProcessorFailure {
        processor: processor.to_string(),
        code,
        stdout,
        stderr,
    }
}
