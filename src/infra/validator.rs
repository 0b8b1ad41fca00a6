//! External validation task.
//!
//! The command validator shells out to a configured checker, handing it the
//! resource name, and treats whatever the checker writes to stderr as the
//! diagnostic text. Results are memoized under `.cache/{digest}.log` in the
//! data directory, keyed by a digest of the checker command and the
//! resource's current items and routes files, so an unchanged resource never
//! re-runs the checker.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

use crate::infra::error::InfraError;

const SOURCE: &str = "infra::validator";

#[async_trait]
pub trait ValidationTask: Send + Sync {
    /// Check a resource, returning its diagnostic text. Empty text means the
    /// resource is clean.
    async fn check(&self, resource: &str) -> Result<String, InfraError>;
}

pub struct CommandValidator {
    command: String,
    root: PathBuf,
}

impl CommandValidator {
    pub fn new(command: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            root: root.into(),
        }
    }

    async fn content_digest(&self, resource: &str) -> Result<String, InfraError> {
        let items = fs::read(self.root.join("items").join(format!("{resource}.json"))).await?;
        let routes = fs::read(self.root.join("routes").join(format!("{resource}.json"))).await?;

        let mut hasher = Sha256::new();
        hasher.update(self.command.as_bytes());
        hasher.update([0]);
        hasher.update(&items);
        hasher.update([0]);
        hasher.update(&routes);
        Ok(URL_SAFE_NO_PAD.encode(hasher.finalize()))
    }

    async fn run_checker(&self, resource: &str) -> Result<String, InfraError> {
        let output = Command::new(&self.command)
            .arg(resource)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| {
                InfraError::validator(format!("checker `{}` failed to start: {err}", self.command))
            })?;

        Ok(String::from_utf8_lossy(&output.stderr).into_owned())
    }
}

#[async_trait]
impl ValidationTask for CommandValidator {
    async fn check(&self, resource: &str) -> Result<String, InfraError> {
        let digest = self.content_digest(resource).await?;
        let log_dir = self.root.join(".cache");
        let log_file = log_dir.join(format!("{digest}.log"));

        if let Ok(cached) = fs::read_to_string(&log_file).await {
            debug!(source = SOURCE, resource, "validation log served from cache");
            return Ok(cached);
        }

        let diagnostics = self.run_checker(resource).await?;

        fs::create_dir_all(&log_dir).await?;
        fs::write(&log_file, &diagnostics).await?;
        info!(
            source = SOURCE,
            resource,
            clean = diagnostics.is_empty(),
            "resource validated"
        );

        Ok(diagnostics)
    }
}
