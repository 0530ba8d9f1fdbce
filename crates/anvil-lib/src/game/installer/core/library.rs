use super::downloader::{ArtifactFetcher, FetchOutcome};
use crate::game::installer::config::Endpoints;
use crate::game::installer::manifest::LibraryRef;
use crate::game::installer::types::ProgressReporter;
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Totals from a library batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LibraryBatchReport {
    pub total: usize,
    pub downloaded: usize,
    pub already_valid: usize,
}

/// Fetches manifest libraries into the shared libraries directory.
pub struct LibraryDownloader<'a> {
    fetcher: &'a ArtifactFetcher,
    libraries_dir: PathBuf,
    endpoints: &'a Endpoints,
    reporter: Arc<dyn ProgressReporter>,
}

impl<'a> LibraryDownloader<'a> {
    pub fn new(
        fetcher: &'a ArtifactFetcher,
        libraries_dir: &Path,
        endpoints: &'a Endpoints,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            fetcher,
            libraries_dir: libraries_dir.to_path_buf(),
            endpoints,
            reporter,
        }
    }

    /// Download multiple libraries concurrently. Duplicate paths are fetched
    /// once so two tasks never write the same file.
    pub async fn download_all(
        &self,
        libraries: &[LibraryRef],
        concurrency: usize,
        progress_base: i32,
        progress_range: i32,
    ) -> Result<LibraryBatchReport> {
        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for lib in libraries {
            let path = lib.local_path(&self.libraries_dir)?;
            if seen.insert(path) {
                unique.push(lib.clone());
            }
        }

        let total = unique.len();
        if total == 0 {
            return Ok(LibraryBatchReport::default());
        }
        self.reporter
            .set_substep(Some("Libraries"), Some(0), Some(total as u32));

        let done = Arc::new(AtomicUsize::new(0));
        let fetched = Arc::new(AtomicUsize::new(0));

        let results: Vec<Result<()>> = stream::iter(unique)
            .map(|lib| {
                let done = Arc::clone(&done);
                let fetched = Arc::clone(&fetched);
                let reporter = Arc::clone(&self.reporter);
                async move {
                    let outcome = self
                        .fetcher
                        .ensure_library(&lib, &self.libraries_dir, self.endpoints, reporter.as_ref())
                        .await
                        .with_context(|| format!("Library {}", lib.maven_name))?;
                    if outcome == FetchOutcome::Downloaded {
                        fetched.fetch_add(1, Ordering::SeqCst);
                    }
                    let count = done.fetch_add(1, Ordering::SeqCst) + 1;
                    let progress = progress_base
                        + ((count as f32 / total as f32) * progress_range as f32) as i32;
                    reporter.set_percent(progress);
                    reporter.set_substep(Some("Libraries"), Some(count as u32), Some(total as u32));
                    Ok(())
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|r| r.err().map(|e| format!("{:#}", e)))
            .collect();
        if let Some(first) = failures.first() {
            log::error!("{} of {} libraries failed", failures.len(), total);
            anyhow::bail!(
                "{} libraries failed to download; first error: {}",
                failures.len(),
                first
            );
        }

        let downloaded = fetched.load(Ordering::SeqCst);
        log::info!(
            "Libraries ready: {} total, {} downloaded",
            total,
            downloaded
        );
        Ok(LibraryBatchReport {
            total,
            downloaded,
            already_valid: total - downloaded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::installer::types::SilentProgressReporter;
    use crate::utils::hash::sha1_bytes;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn duplicate_entries_are_fetched_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/central/org/ow2/asm/asm/9.6/asm-9.6.jar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"asm".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let endpoints = Endpoints::mirrored_at(&server.uri());
        let fetcher = ArtifactFetcher::new().unwrap();
        let tmp = tempdir().unwrap();
        let lib = LibraryRef::new("org.ow2.asm:asm:9.6").with_sha1(sha1_bytes(b"asm"));
        let downloader = LibraryDownloader::new(
            &fetcher,
            tmp.path(),
            &endpoints,
            Arc::new(SilentProgressReporter),
        );

        let report = downloader
            .download_all(&[lib.clone(), lib.clone()], 4, 0, 100)
            .await
            .unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.downloaded, 1);

        let again = downloader.download_all(&[lib], 4, 0, 100).await.unwrap();
        assert_eq!(again.already_valid, 1);
    }
}
