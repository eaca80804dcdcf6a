//! Agent binary provisioning.
//!
//! The installer gate makes sure the agent binary and its config file
//! exist before the supervisor spawns anything. How the binary gets here
//! is pluggable; this module only owns the retry contract and the
//! no-partial-file guarantee.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use burrow_core::agent_file;
use burrow_core::{Error, Result};

/// Extra download attempts after the first failure.
pub const DEFAULT_DOWNLOAD_RETRIES: u32 = 2;
/// Fixed pause between download attempts.
pub const DEFAULT_RETRY_PAUSE: Duration = Duration::from_millis(500);

/// Source of the agent binary.
#[async_trait]
pub trait BinaryFetcher: Send + Sync {
    /// Fetch the agent binary into `dest`.
    ///
    /// [`Error::Transport`] failures are retried by the installer;
    /// anything else aborts the install immediately.
    async fn fetch(&self, dest: &Path) -> Result<()>;
}

/// Fetches the agent binary over HTTP(S).
pub struct HttpFetcher {
    http: reqwest::Client,
    url: String,
}

impl HttpFetcher {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        // Same provider dance as the API client; reqwest ships no default.
        let _ = rustls::crypto::ring::default_provider().install_default();
        let http = reqwest::Client::builder().build().map_err(|e| Error::Transport {
            url: String::new(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl BinaryFetcher for HttpFetcher {
    async fn fetch(&self, dest: &Path) -> Result<()> {
        let response = self.http.get(&self.url).send().await.map_err(|e| Error::Transport {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Install(format!(
                "download of {} returned status {status}",
                self.url
            )));
        }
        let bytes = response.bytes().await.map_err(|e| Error::Transport {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }
}

/// Build the default download URL for the current platform.
pub fn default_download_url() -> String {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };
    format!("https://github.com/burrow-dev/burrow/releases/latest/download/burrow-{os}-{arch}")
}

/// Idempotent "ensure present" gate for the agent binary and config file.
pub struct Installer {
    fetcher: Arc<dyn BinaryFetcher>,
    retries: u32,
    retry_pause: Duration,
}

impl Installer {
    pub fn new(fetcher: Arc<dyn BinaryFetcher>) -> Self {
        Self {
            fetcher,
            retries: DEFAULT_DOWNLOAD_RETRIES,
            retry_pause: DEFAULT_RETRY_PAUSE,
        }
    }

    /// Override the number of extra download attempts.
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Override the pause between download attempts.
    pub const fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    /// Ensure the agent binary and its config file exist.
    ///
    /// Existing files are left untouched, so repeated calls are cheap.
    pub async fn ensure_installed(&self, binary_path: &Path, config_path: &Path) -> Result<()> {
        if !binary_path.exists() {
            self.download(binary_path).await?;
        }
        agent_file::write_default(config_path)?;
        Ok(())
    }

    async fn download(&self, dest: &Path) -> Result<()> {
        let parent = dest.parent().ok_or_else(|| {
            Error::Install(format!("binary path {} has no parent directory", dest.display()))
        })?;
        std::fs::create_dir_all(parent)?;

        // Stage into a temp file in the same directory so a failed or
        // interrupted download never lands at the final path.
        let staging = tempfile::NamedTempFile::new_in(parent)?;

        let mut attempt: u32 = 0;
        loop {
            match self.fetcher.fetch(staging.path()).await {
                Ok(()) => break,
                Err(Error::Transport { reason, .. }) if attempt < self.retries => {
                    attempt += 1;
                    warn!(attempt, max = self.retries, reason = %reason, "agent download failed, retrying");
                    tokio::time::sleep(self.retry_pause).await;
                }
                Err(Error::Transport { reason, .. }) => {
                    return Err(Error::Install(format!(
                        "download failed after {} attempts: {reason}",
                        attempt + 1
                    )));
                }
                Err(Error::Install(reason)) => return Err(Error::Install(reason)),
                Err(e) => return Err(Error::Install(e.to_string())),
            }
        }

        let staged = staging.path().display().to_string();
        staging.persist(dest).map_err(|e| {
            Error::Install(format!("failed to move {staged} into {}: {e}", dest.display()))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(dest)?.permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(dest, perms)?;
        }

        info!(path = %dest.display(), "agent binary installed");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    /// Fetcher that counts attempts and fails with a transport error
    /// until `succeed_on` (1-based) is reached; `0` means never succeed.
    struct FlakyFetcher {
        attempts: AtomicU32,
        succeed_on: u32,
    }

    impl FlakyFetcher {
        fn failing() -> Self {
            Self {
                attempts: AtomicU32::new(0),
                succeed_on: 0,
            }
        }

        fn succeeding_on(succeed_on: u32) -> Self {
            Self {
                attempts: AtomicU32::new(0),
                succeed_on,
            }
        }
    }

    #[async_trait]
    impl BinaryFetcher for FlakyFetcher {
        async fn fetch(&self, dest: &Path) -> Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.succeed_on != 0 && attempt >= self.succeed_on {
                std::fs::write(dest, b"#!/bin/sh\nexit 0\n")?;
                return Ok(());
            }
            Err(Error::Transport {
                url: "https://releases.example/burrow".into(),
                reason: "the read operation timed out".into(),
            })
        }
    }

    fn installer(fetcher: Arc<FlakyFetcher>, retries: u32) -> Installer {
        Installer::new(fetcher)
            .with_retries(retries)
            .with_retry_pause(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn retry_bound_one_means_exactly_two_attempts_and_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("bin").join("burrow");
        let fetcher = Arc::new(FlakyFetcher::failing());

        let err = installer(Arc::clone(&fetcher), 1)
            .ensure_installed(&binary, &dir.path().join("burrow.yml"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Install(_)));
        assert_eq!(fetcher.attempts.load(Ordering::SeqCst), 2);
        assert!(!binary.exists());
    }

    #[tokio::test]
    async fn transient_failure_recovers_within_retry_budget() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("burrow");
        let fetcher = Arc::new(FlakyFetcher::succeeding_on(2));

        installer(Arc::clone(&fetcher), 2)
            .ensure_installed(&binary, &dir.path().join("burrow.yml"))
            .await
            .unwrap();

        assert_eq!(fetcher.attempts.load(Ordering::SeqCst), 2);
        assert!(binary.exists());
    }

    #[tokio::test]
    async fn existing_binary_is_not_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("burrow");
        std::fs::write(&binary, b"already here").unwrap();
        let fetcher = Arc::new(FlakyFetcher::failing());

        installer(Arc::clone(&fetcher), 0)
            .ensure_installed(&binary, &dir.path().join("burrow.yml"))
            .await
            .unwrap();

        assert_eq!(fetcher.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read(&binary).unwrap(), b"already here");
    }

    #[tokio::test]
    async fn config_file_is_provisioned() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("burrow");
        let config = dir.path().join("conf").join("burrow.yml");
        let fetcher = Arc::new(FlakyFetcher::succeeding_on(1));

        installer(fetcher, 0)
            .ensure_installed(&binary, &config)
            .await
            .unwrap();

        assert!(config.exists());
    }

    #[tokio::test]
    async fn non_retryable_failure_aborts_after_first_attempt() {
        struct BadStatusFetcher(AtomicU32);

        #[async_trait]
        impl BinaryFetcher for BadStatusFetcher {
            async fn fetch(&self, _dest: &Path) -> Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(Error::Install("download returned status 500".into()))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("burrow");
        let fetcher = Arc::new(BadStatusFetcher(AtomicU32::new(0)));

        let err = Installer::new(Arc::clone(&fetcher) as Arc<dyn BinaryFetcher>)
            .with_retries(3)
            .with_retry_pause(Duration::from_millis(1))
            .ensure_installed(&binary, &dir.path().join("burrow.yml"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Install(_)));
        assert_eq!(fetcher.0.load(Ordering::SeqCst), 1);
        assert!(!binary.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn installed_binary_is_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("burrow");
        let fetcher = Arc::new(FlakyFetcher::succeeding_on(1));

        installer(fetcher, 0)
            .ensure_installed(&binary, &dir.path().join("burrow.yml"))
            .await
            .unwrap();

        let mode = std::fs::metadata(&binary).unwrap().permissions().mode();
        assert_eq!(mode & 0o755, 0o755);
    }
}
