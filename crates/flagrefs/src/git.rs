//! Inspect the checked-out repository with the `git` CLI: current branch,
//! head SHA, and the set of branches on the remote.

use crate::error::ScanError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

pub struct GitClient {
    workspace: PathBuf,
    /// Short branch name, from `--branch` or HEAD resolution.
    pub branch: String,
    /// Commit SHA of the branch head.
    pub head_sha: String,
}

impl GitClient {
    /// Resolve the branch and head of the checkout at `dir`.
    ///
    /// `branch_override` is required in CI systems that leave the repository
    /// in a detached-HEAD state; without it a detached HEAD is fatal.
    pub fn new(dir: &Path, branch_override: Option<&str>) -> Result<Self, ScanError> {
        run_git(dir, &["version"])?;

        let branch = match branch_override {
            Some(name) => name.to_string(),
            None => {
                let name = run_git(dir, &["rev-parse", "--abbrev-ref", "HEAD"])?;
                if name == "HEAD" {
                    return Err(ScanError::RepoInspection(
                        "repository is in a detached HEAD state, pass the branch name explicitly"
                            .into(),
                    ));
                }
                name
            }
        };
        let head_sha = run_git(dir, &["rev-parse", "HEAD"])?;
        debug!(branch = %branch, head = %head_sha, "resolved repository state");
        Ok(Self {
            workspace: dir.to_path_buf(),
            branch,
            head_sha,
        })
    }

    /// Branch names currently present on the remote (`refs/heads/` stripped).
    pub fn remote_branches(&self) -> Result<HashSet<String>, ScanError> {
        let out = run_git(&self.workspace, &["ls-remote", "--heads", "--quiet"])?;
        Ok(parse_ls_remote_heads(&out))
    }
}

fn parse_ls_remote_heads(output: &str) -> HashSet<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|r| r.strip_prefix("refs/heads/"))
        .map(|name| name.to_string())
        .collect()
}

fn run_git(dir: &Path, args: &[&str]) -> Result<String, ScanError> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ScanError::EnvironmentMissing("git is not installed or not on PATH".into())
            } else {
                ScanError::RepoInspection(format!("failed to spawn git: {}", e))
            }
        })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ScanError::RepoInspection(format!(
            "git {} exited with {}: {}",
            args.first().unwrap_or(&""),
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
