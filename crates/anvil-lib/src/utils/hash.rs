use anyhow::{Context, Result};
use sha1::{Digest, Sha1};
use std::io::Read;
use std::path::{Path, PathBuf};

/// SHA1 of a file as lowercase hex, streamed so large jars are not read into memory.
pub fn sha1_file(path: &Path) -> Result<String> {
    let mut file =
        std::fs::File::open(path).with_context(|| format!("Open {:?} for hashing", path))?;
    let mut hasher = Sha1::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("Read {:?} for hashing", path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn sha1_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Async wrapper around [`sha1_file`] that keeps hashing off the runtime threads.
pub async fn sha1_file_async(path: &Path) -> Result<String> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || sha1_file(&path))
        .await
        .context("Hashing task panicked")?
}

/// A declared hash that still contains template syntax can never be verified.
pub fn is_placeholder_hash(hash: &str) -> bool {
    hash.contains('{')
}

/// Compares a file against an expected hash. Missing files and placeholder
/// hashes never match.
pub async fn file_matches_sha1(path: &Path, expected: &str) -> Result<bool> {
    if is_placeholder_hash(expected) || !path.is_file() {
        return Ok(false);
    }
    let actual = sha1_file_async(path).await?;
    Ok(actual.eq_ignore_ascii_case(expected.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn hashes_known_content() {
        assert_eq!(sha1_bytes(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[tokio::test]
    async fn placeholder_never_matches() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"abc").unwrap();

        assert!(file_matches_sha1(&file, "a9993e364706816aba3e25717850c26c9cd0d89d")
            .await
            .unwrap());
        assert!(file_matches_sha1(&file, "A9993E364706816ABA3E25717850C26C9CD0D89D")
            .await
            .unwrap());
        assert!(!file_matches_sha1(&file, "{MC_SLIM_SHA}").await.unwrap());
        assert!(!file_matches_sha1(&dir.path().join("missing"), "abc").await.unwrap());
    }
}
