//! Shared helpers for integration tests: fake agent scripts and a
//! fetcher that refuses to download anything.
#![allow(dead_code)]
#![allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use burrow_client::installer::BinaryFetcher;
use burrow_client::{AgentConfig, Error, Result};

/// Tests never download; the fake agent binary is written up front.
pub struct NoFetch;

#[async_trait]
impl BinaryFetcher for NoFetch {
    async fn fetch(&self, _dest: &Path) -> Result<()> {
        Err(Error::Install("no download expected in tests".into()))
    }
}

/// Write an executable shell script acting as the agent binary.
pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// Fake agent that signals readiness on `addr` and then idles.
pub fn ready_script(dir: &Path, name: &str, addr: &str) -> PathBuf {
    script(
        dir,
        name,
        &format!(
            "echo 't=2026-08-07T10:00:00+0000 lvl=info msg=\"starting web service\" obj=web addr={addr}'\nexec sleep 600"
        ),
    )
}

/// Launch config pointing at a fake agent, with a test-friendly timeout.
pub fn agent_config(binary: PathBuf, dir: &Path, config_name: &str) -> AgentConfig {
    AgentConfig {
        binary_path: binary,
        config_path: dir.join(config_name),
        startup_timeout: Duration::from_secs(10),
        ..AgentConfig::default()
    }
}
