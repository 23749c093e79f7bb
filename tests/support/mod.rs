#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use assert_cmd::Command;
use chrono::{DateTime, Utc};
use ideaflow::clock::MockClock;
use ideaflow::memory_store::MemoryStore;
use ideaflow::service::IdeaFlowService;
use tempfile::TempDir;

/// Throwaway root directory for the file-backed store and the CLI.
pub struct TestRoot {
    dir: TempDir,
}

impl TestRoot {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join(".ideaflow")
    }

    pub fn write_config(&self, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join(".ideaflow.toml");
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// `ifm` bound to this root through `IFM_ROOT`.
    pub fn ifm(&self) -> Command {
        let mut cmd = Command::cargo_bin("ifm").expect("binary");
        cmd.env("IFM_ROOT", self.dir.path());
        cmd.env_remove("RUST_LOG");
        cmd
    }

    /// Run `ifm --json <args>` and return the parsed envelope.
    pub fn ifm_json(&self, args: &[&str]) -> serde_json::Value {
        let output = self
            .ifm()
            .arg("--json")
            .args(args)
            .output()
            .expect("run ifm");
        parse_json(&output.stdout)
    }
}

pub fn parse_json(stdout: &[u8]) -> serde_json::Value {
    let text = String::from_utf8_lossy(stdout);
    serde_json::from_str(&text).unwrap_or_else(|err| panic!("invalid json ({err}): {text}"))
}

/// Service over an in-memory store driven by a mock clock at t = 0.
pub fn memory_service() -> (IdeaFlowService, Arc<MockClock>) {
    let clock = Arc::new(MockClock::at_epoch());
    let service = IdeaFlowService::new(Arc::new(MemoryStore::new()), clock.clone());
    (service, clock)
}

/// Move the mock clock to `secs` after its epoch.
pub fn set_time(clock: &MockClock, epoch: DateTime<Utc>, secs: i64) {
    clock.set(epoch + chrono::Duration::seconds(secs));
}
