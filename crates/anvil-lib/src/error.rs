use std::path::PathBuf;
use thiserror::Error;

/// Typed failures raised by the install and launch pipeline.
///
/// Most call sites return `anyhow::Result`; these variants travel inside the
/// `anyhow::Error` and are recovered with `downcast_ref` where a caller needs
/// to branch on the failure class.
#[derive(Debug, Error)]
pub enum AnvilError {
    #[error("Invalid Maven coordinate '{0}': expected group:artifact:version[:classifier][@ext]")]
    InvalidCoordinateFormat(String),

    #[error("Download of {url} failed after {attempts} attempts: {last_error}")]
    DownloadExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Checksum mismatch in processor {processor}: {detail}")]
    ChecksumMismatch { processor: String, detail: String },

    #[error("Processor {processor} exited with code {code:?}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}")]
    ProcessorFailure {
        processor: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("Processor {processor} timed out after {seconds}s")]
    ProcessorTimeout { processor: String, seconds: u64 },

    #[error("Installation {version_id} is corrupted: {reason}. Delete the version folder and reinstall.")]
    InstallationCorrupted { version_id: String, reason: String },

    #[error("Loader jar {jar:?} does not contain entry point {class}")]
    EntryPointMissing { jar: PathBuf, class: String },

    #[error("No usable Java runtime for Minecraft {minecraft_version} (Java {recommended_major} recommended)")]
    JavaIncompatible {
        minecraft_version: String,
        recommended_major: u32,
    },

    #[error("Version manifest {path:?} is malformed: {reason}")]
    VersionJsonMalformed { path: PathBuf, reason: String },

    #[error("{loader} does not support Minecraft {minecraft_version}")]
    IncompatibleVersion {
        loader: String,
        minecraft_version: String,
    },

    #[error("Invalid loader descriptor: {0}")]
    InvalidLoaderDescriptor(String),
}

pub type AnvilResult<T> = std::result::Result<T, AnvilError>;

impl AnvilError {
    /// Failures that should be answered by cleaning intermediates and retrying once.
    pub fn is_retryable_processor_failure(&self) -> bool {
        matches!(self, AnvilError::ChecksumMismatch { .. })
    }
}

/// Finds an [`AnvilError`] anywhere in an `anyhow` chain.
pub fn find_anvil_error(err: &anyhow::Error) -> Option<&AnvilError> {
    err.chain().find_map(|cause| cause.downcast_ref::<AnvilError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn typed_error_survives_context_wrapping() {
        let err: anyhow::Result<()> = Err(AnvilError::ChecksumMismatch {
            processor: "binarypatcher".into(),
            detail: "bad hash".into(),
        })
        .context("Running processors");

        let err = err.unwrap_err();
        let found = find_anvil_error(&err).expect("typed error in chain");
        assert!(found.is_retryable_processor_failure());
    }

    #[test]
    fn processor_failure_is_not_retryable() {
        let err = AnvilError::ProcessorFailure {
            processor: "jarsplitter".into(),
            code: Some(1),
            stdout: String::new(),
            stderr: "boom".into(),
        };
        assert!(!err.is_retryable_processor_failure());
        assert!(err.to_string().contains("boom"));
    }
}
