use crate::error::AnvilError;
use crate::game::installer::config::{current_timeout, DOWNLOAD_ATTEMPTS, RETRY_BASE_MS};
use crate::game::installer::manifest::LibraryRef;
use crate::game::installer::types::ProgressReporter;
use crate::utils::hash::{file_matches_sha1, is_placeholder_hash};
use anyhow::{Context, Result};
use futures::StreamExt;
use rand::Rng;
use reqwest::Client;
use sha1::{Digest, Sha1};
use std::ops::Range;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::{create_dir_all, File};
use tokio::io::AsyncWriteExt;

/// What [`ArtifactFetcher::ensure`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The file on disk already matched; no request was made.
    AlreadyValid,
    Downloaded,
}

/// Downloads artifacts with hash verification and bounded retries.
#[derive(Debug, Clone)]
pub struct ArtifactFetcher {
    client: Client,
    attempts: u32,
    retry_base_ms: Range<u64>,
}

impl ArtifactFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(current_timeout())
            .user_agent(concat!("anvil-lib/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            attempts: DOWNLOAD_ATTEMPTS,
            retry_base_ms: RETRY_BASE_MS,
        }
    }

    /// Overrides the randomized base delay between attempts.
    pub fn with_retry_base(mut self, base_ms: Range<u64>) -> Self {
        self.retry_base_ms = base_ms;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = if self.retry_base_ms.is_empty() {
            self.retry_base_ms.start
        } else {
            rand::rng().random_range(self.retry_base_ms.clone())
        };
        Duration::from_millis(base * attempt as u64)
    }

    /// Makes sure `dest` holds the artifact at `url`.
    ///
    /// An existing file with a matching hash is left alone. Without an
    /// expected hash any existing file is trusted. Otherwise the artifact is
    /// streamed to a `.part` file, verified, then renamed into place.
    pub async fn ensure(
        &self,
        url: &str,
        dest: &Path,
        expected_sha1: Option<&str>,
        reporter: &dyn ProgressReporter,
    ) -> Result<FetchOutcome> {
        let expected = expected_sha1.filter(|s| !s.trim().is_empty());

        if dest.is_file() {
            match expected {
                None => {
                    log::debug!("Exists and no hash given, skipping: {:?}", dest);
                    return Ok(FetchOutcome::AlreadyValid);
                }
                Some(sha1) if !is_placeholder_hash(sha1) => {
                    if file_matches_sha1(dest, sha1).await? {
                        log::debug!("Exists and hash matches, skipping: {:?}", dest);
                        return Ok(FetchOutcome::AlreadyValid);
                    }
                    log::info!("Hash mismatch, re-downloading: {:?}", dest);
                }
                Some(_) => {
                    log::debug!("Placeholder hash for {:?}, re-downloading", dest);
                }
            }
        }

        url::Url::parse(url).with_context(|| format!("Invalid download URL '{}'", url))?;
        if let Some(parent) = dest.parent() {
            create_dir_all(parent)
                .await
                .with_context(|| format!("Create directory {:?}", parent))?;
        }

        let verify = expected.filter(|s| !is_placeholder_hash(s));
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.download_once(url, dest, verify, reporter).await {
                Ok(()) => return Ok(FetchOutcome::Downloaded),
                Err(e) if attempt >= self.attempts => {
                    log::error!("Download failed after {} attempts: {:#}", attempt, e);
                    return Err(AnvilError::DownloadExhausted {
                        url: url.to_string(),
                        attempts: attempt,
                        last_error: format!("{:#}", e),
                    }
                    .into());
                }
                Err(e) => {
                    log::warn!(
                        "Download failed (attempt {}/{}): {:#}. Retrying...",
                        attempt,
                        self.attempts,
                        e
                    );
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
            }
        }
    }

    /// [`ensure`](Self::ensure) for a manifest library. Locally generated
    /// libraries are never fetched; they must already exist.
    pub async fn ensure_library(
        &self,
        library: &LibraryRef,
        libraries_dir: &Path,
        endpoints: &crate::game::installer::config::Endpoints,
        reporter: &dyn ProgressReporter,
    ) -> Result<FetchOutcome> {
        let dest = library.local_path(libraries_dir)?;
        match library.resolved_url(endpoints)? {
            Some(url) => self.ensure(&url, &dest, library.checked_sha1(), reporter).await,
            None if dest.is_file() => Ok(FetchOutcome::AlreadyValid),
            None => anyhow::bail!(
                "Library {} is generated during install but {:?} is missing",
                library.maven_name,
                dest
            ),
        }
    }

    async fn download_once(
        &self,
        url: &str,
        path: &Path,
        expected_sha1: Option<&str>,
        reporter: &dyn ProgressReporter,
    ) -> Result<()> {
        let start = Instant::now();
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("HTTP error {}: {}", response.status(), url);
        }

        let total_size = response.content_length();
        let tmp_name = format!(
            "{}.part",
            path.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("download")
        );
        let tmp_path = path.with_file_name(tmp_name);
        let mut file = File::create(&tmp_path).await?;
        let mut downloaded: u64 = 0;
        let mut hasher = Sha1::new();

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&tmp_path).await;
                    return Err(e.into());
                }
            };
            file.write_all(&chunk).await?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
            reporter.update_bytes(downloaded, total_size);
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(expected) = expected_sha1 {
            let computed = format!("{:x}", hasher.finalize());
            if !computed.eq_ignore_ascii_case(expected.trim()) {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                anyhow::bail!(
                    "SHA1 mismatch for {}: expected {}, got {}",
                    url,
                    expected,
                    computed
                );
            }
        }

        tokio::fs::rename(&tmp_path, path).await?;
        log::debug!(
            "Downloaded {} ({} bytes) in {:.2}s",
            url,
            downloaded,
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Fetches a body into memory with the same retry policy.
    pub async fn fetch_bytes(&self, url: &str, expected_sha1: Option<&str>) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetch_bytes_once(url, expected_sha1).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if attempt >= self.attempts => {
                    return Err(AnvilError::DownloadExhausted {
                        url: url.to_string(),
                        attempts: attempt,
                        last_error: format!("{:#}", e),
                    }
                    .into());
                }
                Err(e) => {
                    log::warn!(
                        "Fetch failed (attempt {}/{}): {:#}. Retrying...",
                        attempt,
                        self.attempts,
                        e
                    );
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
            }
        }
    }

    async fn fetch_bytes_once(&self, url: &str, expected_sha1: Option<&str>) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("HTTP error {}: {}", response.status(), url);
        }
        let bytes = response.bytes().await?;
        if let Some(expected) = expected_sha1.filter(|s| !is_placeholder_hash(s)) {
            let computed = crate::utils::hash::sha1_bytes(&bytes);
            if !computed.eq_ignore_ascii_case(expected.trim()) {
                anyhow::bail!(
                    "SHA1 mismatch for {}: expected {}, got {}",
                    url,
                    expected,
                    computed
                );
            }
        }
        Ok(bytes.to_vec())
    }

    /// GET and deserialize JSON. Meta APIs are not retried: a 404 is an
    /// answer, not a transient failure.
    pub async fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        download_json_with_client(&self.client, url).await
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        log::debug!("Fetching text: {}", url);
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("HTTP error {}: {}", response.status(), url);
        }
        Ok(response.text().await?)
    }
}

/// Download JSON using an existing Client and deserialize
pub async fn download_json_with_client<T: serde::de::DeserializeOwned>(
    client: &Client,
    url: &str,
) -> Result<T> {
    log::debug!("Downloading JSON (reused client): {}", url);
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        anyhow::bail!("HTTP error {}: {}", response.status(), url);
    }

    let data = response
        .json()
        .await
        .with_context(|| format!("Decode JSON from {}", url))?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::find_anvil_error;
    use crate::game::installer::types::SilentProgressReporter;
    use crate::utils::hash::sha1_bytes;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> ArtifactFetcher {
        ArtifactFetcher::new().unwrap().with_retry_base(0..1)
    }

    #[tokio::test]
    async fn second_ensure_makes_no_request() {
        let server = MockServer::start().await;
        let body = b"jar-bytes".to_vec();
        Mock::given(method("GET"))
            .and(path("/lib.jar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = tempdir().unwrap();
        let dest = tmp.path().join("nested/lib.jar");
        let url = format!("{}/lib.jar", server.uri());
        let sha = sha1_bytes(&body);
        let f = fetcher();

        let first = f.ensure(&url, &dest, Some(&sha), &SilentProgressReporter).await.unwrap();
        assert_eq!(first, FetchOutcome::Downloaded);
        let second = f.ensure(&url, &dest, Some(&sha), &SilentProgressReporter).await.unwrap();
        assert_eq!(second, FetchOutcome::AlreadyValid);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        assert!(!tmp.path().join("nested/lib.jar.part").exists());
    }

    #[tokio::test]
    async fn stale_file_is_replaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.jar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fresh".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = tempdir().unwrap();
        let dest = tmp.path().join("a.jar");
        std::fs::write(&dest, b"stale").unwrap();
        let url = format!("{}/a.jar", server.uri());
        let outcome = fetcher()
            .ensure(&url, &dest, Some(&sha1_bytes(b"fresh")), &SilentProgressReporter)
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::Downloaded);
        assert_eq!(std::fs::read(&dest).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.jar"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let tmp = tempdir().unwrap();
        let url = format!("{}/missing.jar", server.uri());
        let err = fetcher()
            .ensure(&url, &tmp.path().join("m.jar"), None, &SilentProgressReporter)
            .await
            .unwrap_err();
        match find_anvil_error(&err) {
            Some(AnvilError::DownloadExhausted { attempts, .. }) => assert_eq!(*attempts, 3),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!tmp.path().join("m.jar").exists());
    }

    #[tokio::test]
    async fn hash_mismatch_is_retried_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"wrong".to_vec()))
            .expect(3)
            .mount(&server)
            .await;

        let tmp = tempdir().unwrap();
        let url = format!("{}/x.jar", server.uri());
        let err = fetcher()
            .ensure(&url, &tmp.path().join("x.jar"), Some(&sha1_bytes(b"right")), &SilentProgressReporter)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("SHA1 mismatch"));
    }

    #[tokio::test]
    async fn local_only_library_must_exist() {
        let tmp = tempdir().unwrap();
        let lib = LibraryRef::new("net.minecraftforge:forge:1.20.1-47.2.0:client").with_download_url("");
        let endpoints = crate::game::installer::config::Endpoints::default();
        let err = fetcher()
            .ensure_library(&lib, tmp.path(), &endpoints, &SilentProgressReporter)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("generated during install"));

        let path = lib.local_path(tmp.path()).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"x").unwrap();
        let ok = fetcher()
            .ensure_library(&lib, tmp.path(), &endpoints, &SilentProgressReporter)
            .await
            .unwrap();
        assert_eq!(ok, FetchOutcome::AlreadyValid);
    }

    #[test]
    fn rejects_unparseable_url() {
        let tmp = tempdir().unwrap();
        let err = tokio_test::block_on(fetcher().ensure(
            "not a url",
            &tmp.path().join("x"),
            None,
            &SilentProgressReporter,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("Invalid download URL"));
    }
}
