//! Run configuration: the options every phase consumes, their validation,
//! and the optional alias config file at the repo root.
//!
//! Configuration is assembled once by the binary and passed through the
//! pipeline as an immutable value.

use crate::aliases::AliasSpec;
use crate::error::ScanError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_BASE_URI: &str = "https://app.launchdarkly.com";
pub const DEFAULT_DELIMITERS: [char; 3] = ['"', '\'', '`'];
/// Relative paths probed for the alias config, in order.
pub const YAML_CONFIG_PATHS: [&str; 2] = [
    ".launchdarkly/coderefs.yaml",
    ".launchdarkly/coderefs.yml",
];
pub const MIN_CONTEXT_LINES: i32 = -1;
pub const MAX_CONTEXT_LINES: i32 = 5;

/// Repository service provider, used by the service to categorize repos and
/// build source links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepoType {
    Github,
    Bitbucket,
    #[default]
    Custom,
}

impl RepoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoType::Github => "github",
            RepoType::Bitbucket => "bitbucket",
            RepoType::Custom => "custom",
        }
    }
}

impl FromStr for RepoType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "github" => Ok(RepoType::Github),
            "bitbucket" => Ok(RepoType::Bitbucket),
            "custom" => Ok(RepoType::Custom),
            _ => Err(format!(
                "unknown repo type '{}': expected github, bitbucket, or custom",
                s
            )),
        }
    }
}

impl std::fmt::Display for RepoType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delimiter configuration for word-boundary-like match filtering.
#[derive(Debug, Clone, Default)]
pub struct Delimiters {
    /// Drop the default `"` `'` `` ` `` set.
    pub disable_defaults: bool,
    /// Extra single-character delimiters.
    pub additional: Vec<String>,
}

impl Delimiters {
    pub fn validate(&self) -> Result<(), ScanError> {
        for d in &self.additional {
            if d.chars().count() != 1 {
                return Err(ScanError::Config(format!(
                    "delimiters must be single characters, got '{}'",
                    d
                )));
            }
        }
        Ok(())
    }

    /// The deduplicated delimiter characters the search driver should use.
    pub fn delimiter_string(&self) -> String {
        let mut out = String::new();
        let mut push_unique = |c: char| {
            if !out.contains(c) {
                out.push(c);
            }
        };
        if !self.disable_defaults {
            for c in DEFAULT_DELIMITERS {
                push_unique(c);
            }
        }
        for d in &self.additional {
            if let Some(c) = d.chars().next() {
                push_unique(c);
            }
        }
        out
    }
}

/// Everything one scan run needs. Immutable after validation.
#[derive(Debug, Clone)]
pub struct Options {
    pub access_token: String,
    pub base_uri: String,
    pub proj_key: String,
    pub dir: PathBuf,
    /// Branch override for detached-HEAD CI checkouts.
    pub branch: Option<String>,
    pub default_branch: String,
    pub repo_type: RepoType,
    pub repo_name: String,
    pub repo_url: Option<String>,
    pub commit_url_template: Option<String>,
    pub hunk_url_template: Option<String>,
    pub context_lines: i32,
    pub delimiters: Delimiters,
    /// Negative means unset.
    pub update_sequence_id: i64,
    pub dry_run: bool,
    pub out_dir: Option<PathBuf>,
    pub ignore_service_errors: bool,
    pub debug: bool,
}

impl Options {
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.access_token.is_empty() {
            return Err(ScanError::Config("accessToken is required".into()));
        }
        if self.proj_key.is_empty() {
            return Err(ScanError::Config("projKey is required".into()));
        }
        if self.base_uri.is_empty() {
            return Err(ScanError::Config("baseUri must not be empty".into()));
        }
        let name_ok = !self.repo_name.is_empty()
            && self
                .repo_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !name_ok {
            return Err(ScanError::Config(format!(
                "repoName '{}' may only contain letters, numbers, '.', '_' or '-'",
                self.repo_name
            )));
        }
        if !(MIN_CONTEXT_LINES..=MAX_CONTEXT_LINES).contains(&self.context_lines) {
            return Err(ScanError::Config(format!(
                "contextLines must be between {} and {}",
                MIN_CONTEXT_LINES, MAX_CONTEXT_LINES
            )));
        }
        if !self.dir.is_dir() {
            return Err(ScanError::Config(format!(
                "dir '{}' is not a directory",
                self.dir.display()
            )));
        }
        self.delimiters.validate()?;
        Ok(())
    }

    /// Base URI without a trailing slash, ready for path concatenation.
    pub fn normalized_base_uri(&self) -> String {
        self.base_uri.trim_end_matches('/').to_string()
    }

    /// The optimistic version to submit, if one was provided.
    pub fn update_sequence_id(&self) -> Option<i64> {
        (self.update_sequence_id >= 0).then_some(self.update_sequence_id)
    }
}

/// The repo-root alias config. Unknown keys fail parsing.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YamlConfig {
    #[serde(default)]
    pub aliases: Vec<AliasSpec>,
}

/// Load `.launchdarkly/coderefs.yaml` (or `.yml`) when present and validate
/// every alias spec.
pub fn load_yaml_config(dir: &Path) -> Result<Option<YamlConfig>, ScanError> {
    for rel in YAML_CONFIG_PATHS {
        let path = dir.join(rel);
        if !path.is_file() {
            continue;
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            ScanError::Config(format!("could not read '{}': {}", path.display(), e))
        })?;
        let config: YamlConfig = serde_yaml::from_str(&raw)
            .map_err(|e| ScanError::Config(format!("invalid '{}': {}", path.display(), e)))?;
        for spec in &config.aliases {
            spec.validate()?;
        }
        return Ok(Some(config));
    }
    Ok(None)
}
