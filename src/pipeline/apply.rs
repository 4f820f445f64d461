//! Apply tool boundary
//!
//! [`ApplyTool`] abstracts the external infrastructure tool so the
//! orchestrator can be tested without it. [`TerraformCli`] shells out to the
//! `terraform` binary in the working directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::{debug, info};

use crate::retry::{retry_transient, Backoff};
use crate::{Error, Result};

/// Operations the orchestrator needs from the apply tool
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ApplyTool: Send + Sync {
    /// Initialise the working directory and apply the current document
    async fn init_and_apply(&self) -> Result<()>;

    /// Every output of the last apply, rendered as strings
    async fn outputs(&self) -> Result<BTreeMap<String, String>>;

    /// One output, if present
    async fn output(&self, key: &str) -> Result<Option<String>>;

    /// Destroy everything in the state
    async fn destroy(&self) -> Result<()>;
}

/// Output of a finished command
#[derive(Clone, Debug)]
pub struct CommandOutput {
    /// Whether the command exited zero
    pub success: bool,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

const INIT: &[&str] = &["init", "-input=false", "-no-color"];
const APPLY: &[&str] = &["apply", "-auto-approve", "-input=false", "-no-color"];
const OUTPUT: &[&str] = &["output", "-json", "-no-color"];
const DESTROY: &[&str] = &["destroy", "-auto-approve", "-input=false", "-no-color"];

/// `terraform` run as a subprocess
pub struct TerraformCli {
    binary: String,
    work_dir: PathBuf,
    command_timeout: Duration,
    init_retry: Backoff,
}

impl TerraformCli {
    /// Run `binary` in `work_dir`, abandoning any command after `command_timeout`
    pub fn new(binary: impl Into<String>, work_dir: impl AsRef<Path>, command_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            work_dir: work_dir.as_ref().to_path_buf(),
            command_timeout,
            init_retry: Backoff::attempts(3),
        }
    }

    /// Override the retry policy for `init`
    pub fn with_init_retry(mut self, retry: Backoff) -> Self {
        self.init_retry = retry;
        self
    }

    async fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args).current_dir(&self.work_dir).kill_on_drop(true);
        debug!(command = ?cmd, "running apply tool");

        let output = tokio::time::timeout(self.command_timeout, cmd.output())
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "{} {} did not finish within {:?}",
                    self.binary,
                    args.join(" "),
                    self.command_timeout
                ))
            })?
            .map_err(|e| Error::apply(format!("failed to run {}: {}", self.binary, e)))?;

        Ok(CommandOutput::from(output))
    }

    async fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(args).await?;
        if !output.success {
            return Err(Error::apply(format!(
                "{} {} failed: {}",
                self.binary,
                args.first().copied().unwrap_or_default(),
                output.stderr.trim()
            )));
        }
        Ok(output)
    }
}

#[async_trait]
impl ApplyTool for TerraformCli {
    async fn init_and_apply(&self) -> Result<()> {
        retry_transient(&self.init_retry, "terraform init", || self.run_checked(INIT)).await?;
        info!(work_dir = %self.work_dir.display(), "applying");
        self.run_checked(APPLY).await?;
        Ok(())
    }

    async fn outputs(&self) -> Result<BTreeMap<String, String>> {
        let output = self.run_checked(OUTPUT).await?;
        parse_outputs(&output.stdout)
    }

    async fn output(&self, key: &str) -> Result<Option<String>> {
        Ok(self.outputs().await?.remove(key))
    }

    async fn destroy(&self) -> Result<()> {
        info!(work_dir = %self.work_dir.display(), "destroying");
        self.run_checked(DESTROY).await?;
        Ok(())
    }
}

/// Parse `output -json` into name → value
///
/// String values are taken as-is; anything else is kept as compact JSON.
pub fn parse_outputs(json: &str) -> Result<BTreeMap<String, String>> {
    if json.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let parsed: BTreeMap<String, serde_json::Value> = serde_json::from_str(json)?;
    Ok(parsed
        .into_iter()
        .map(|(name, entry)| {
            let value = match entry.get("value") {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            (name, value)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outputs_keep_strings_and_stringify_the_rest() {
        let json = r#"{
            "rke2_server1_public_dns": {"sensitive": false, "type": "string", "value": "ec2-1.example.com"},
            "ports": {"sensitive": false, "type": ["list", "number"], "value": [80, 443]}
        }"#;
        let outputs = parse_outputs(json).unwrap();
        assert_eq!(outputs["rke2_server1_public_dns"], "ec2-1.example.com");
        assert_eq!(outputs["ports"], "[80,443]");
    }

    #[test]
    fn empty_output_means_no_outputs() {
        assert!(parse_outputs("").unwrap().is_empty());
        assert!(parse_outputs("{}").unwrap().is_empty());
    }

    #[test]
    fn malformed_output_is_a_serialization_error() {
        assert!(matches!(parse_outputs("not json"), Err(Error::Serialization(_))));
    }

    #[tokio::test]
    async fn failing_command_is_an_apply_error() {
        let dir = tempfile::tempdir().unwrap();
        let cli = TerraformCli::new("false", dir.path(), Duration::from_secs(10))
            .with_init_retry(Backoff::attempts(1));
        assert!(matches!(cli.init_and_apply().await, Err(Error::Apply(_))));
    }

    #[tokio::test]
    async fn missing_binary_is_an_apply_error() {
        let dir = tempfile::tempdir().unwrap();
        let cli = TerraformCli::new("/nonexistent/terraform", dir.path(), Duration::from_secs(10));
        assert!(matches!(cli.destroy().await, Err(Error::Apply(_))));
    }
}
