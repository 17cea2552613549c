//! Alias generation: expand each flag key into the additional strings the
//! search should attribute to it.
//!
//! Specs come from the repo's `.launchdarkly/coderefs.yaml`. Validation is
//! exhaustive at load time; any invalid spec is fatal before a single file is
//! searched.

use crate::casing;
use crate::error::ScanError;
use crate::types::AliasMap;
use globset::{Glob, GlobSetBuilder};
use ignore::WalkBuilder;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Literal placeholder a file-pattern regex template must contain.
pub const FLAG_KEY_PLACEHOLDER: &str = "FLAG_KEY";

/// One alias-generation rule from the YAML config.
///
/// Tagged by `type`; unknown variants and unknown fields within a variant are
/// rejected at parse time.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AliasSpec {
    #[serde(rename = "literal")]
    Literal(LiteralSpec),
    #[serde(rename = "camelCase", alias = "camelcase")]
    CamelCase(EmptySpec),
    #[serde(rename = "pascalCase", alias = "pascalcase")]
    PascalCase(EmptySpec),
    #[serde(rename = "snakeCase", alias = "snakecase")]
    SnakeCase(EmptySpec),
    #[serde(rename = "upperSnakeCase", alias = "uppersnakecase")]
    UpperSnakeCase(EmptySpec),
    #[serde(rename = "kebabCase", alias = "kebabcase")]
    KebabCase(EmptySpec),
    #[serde(rename = "dotCase", alias = "dotcase")]
    DotCase(EmptySpec),
    #[serde(rename = "filePattern", alias = "filepattern")]
    FilePattern(FilePatternSpec),
    #[serde(rename = "command")]
    Command(CommandSpec),
}

/// Explicit per-flag alias lists.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LiteralSpec {
    pub flags: BTreeMap<String, Vec<String>>,
}

/// Case-transform specs carry no fields beyond the tag.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmptySpec {}

/// Scrape aliases out of matched files with a regex template.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilePatternSpec {
    /// Globs resolved relative to the repo dir.
    pub paths: Vec<String>,
    /// Regex template containing `FLAG_KEY`; capture groups 1+ become
    /// aliases.
    pub pattern: String,
}

/// Delegate alias generation to an external command.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandSpec {
    /// argv as a single whitespace-separated string.
    pub command: String,
    /// Seconds before the command is cancelled.
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl AliasSpec {
    /// Name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            AliasSpec::Literal(_) => "literal",
            AliasSpec::CamelCase(_) => "camelCase",
            AliasSpec::PascalCase(_) => "pascalCase",
            AliasSpec::SnakeCase(_) => "snakeCase",
            AliasSpec::UpperSnakeCase(_) => "upperSnakeCase",
            AliasSpec::KebabCase(_) => "kebabCase",
            AliasSpec::DotCase(_) => "dotCase",
            AliasSpec::FilePattern(_) => "filePattern",
            AliasSpec::Command(_) => "command",
        }
    }

    /// Validate fields serde cannot check structurally.
    pub fn validate(&self) -> Result<(), ScanError> {
        match self {
            AliasSpec::FilePattern(spec) => {
                if spec.paths.is_empty() {
                    return Err(ScanError::Config(
                        "filePattern aliases must provide at least one path in 'paths'".into(),
                    ));
                }
                if !spec.pattern.contains(FLAG_KEY_PLACEHOLDER) {
                    return Err(ScanError::Config(
                        "filePattern 'pattern' must contain 'FLAG_KEY' for templating".into(),
                    ));
                }
                regex::Regex::new(&spec.pattern).map_err(|e| {
                    ScanError::Config(format!("could not validate filePattern regex: {}", e))
                })?;
                for glob in &spec.paths {
                    Glob::new(glob).map_err(|e| {
                        ScanError::Config(format!("invalid filePattern glob '{}': {}", glob, e))
                    })?;
                }
            }
            AliasSpec::Command(spec) => {
                if spec.command.trim().is_empty() {
                    return Err(ScanError::Config(
                        "command aliases must provide a 'command'".into(),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Generate the alias map for the filtered flag set.
///
/// All file contents a `filePattern` spec needs are read once up front; the
/// per-flag loop is pure except for `command` specs, which run once per flag.
pub async fn generate_aliases(
    specs: &[AliasSpec],
    flags: &[String],
    dir: &Path,
) -> Result<AliasMap, ScanError> {
    for spec in specs {
        spec.validate()?;
    }

    // Pre-read file contents for filePattern specs, indexed parallel to specs.
    let mut file_contents: Vec<Option<String>> = Vec::with_capacity(specs.len());
    for spec in specs {
        match spec {
            AliasSpec::FilePattern(fp) => {
                file_contents.push(Some(read_pattern_files(fp, dir)?));
            }
            _ => file_contents.push(None),
        }
    }

    let mut out = AliasMap::new();
    for flag in flags {
        let mut aliases: Vec<String> = Vec::new();
        for (spec, contents) in specs.iter().zip(&file_contents) {
            let generated = match spec {
                AliasSpec::Literal(l) => l.flags.get(flag).cloned().unwrap_or_default(),
                AliasSpec::CamelCase(_) => vec![casing::to_camel(flag)],
                AliasSpec::PascalCase(_) => vec![casing::to_pascal(flag)],
                AliasSpec::SnakeCase(_) => vec![casing::to_snake(flag)],
                AliasSpec::UpperSnakeCase(_) => vec![casing::to_screaming_snake(flag)],
                AliasSpec::KebabCase(_) => vec![casing::to_kebab(flag)],
                AliasSpec::DotCase(_) => vec![casing::to_dotted(flag)],
                AliasSpec::FilePattern(fp) => {
                    scrape_file_aliases(fp, contents.as_deref().unwrap_or_default(), flag)?
                }
                AliasSpec::Command(cmd) => run_command_alias(cmd, flag, dir).await?,
            };
            aliases.extend(generated);
        }
        aliases.retain(|a| !a.is_empty() && a != flag);
        dedupe_in_place(&mut aliases);
        out.insert(flag.clone(), aliases);
    }
    Ok(out)
}

fn dedupe_in_place(values: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    values.retain(|v| seen.insert(v.clone()));
}

/// Resolve the spec's globs under `dir` and concatenate every matched file.
fn read_pattern_files(spec: &FilePatternSpec, dir: &Path) -> Result<String, ScanError> {
    let mut builder = GlobSetBuilder::new();
    for glob in &spec.paths {
        // Already validated in AliasSpec::validate.
        builder.add(Glob::new(glob).map_err(|e| ScanError::Config(e.to_string()))?);
    }
    let set = builder
        .build()
        .map_err(|e| ScanError::Config(e.to_string()))?;

    let mut matched: Vec<std::path::PathBuf> = Vec::new();
    let walker = WalkBuilder::new(dir)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .build();
    for entry in walker {
        let entry = entry.map_err(|e| ScanError::AliasGeneration(e.to_string()))?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        if set.is_match(rel) {
            matched.push(entry.path().to_path_buf());
        }
    }
    matched.sort();

    let mut contents = String::new();
    for path in matched {
        let data = std::fs::read_to_string(&path).map_err(|e| {
            ScanError::AliasGeneration(format!(
                "could not process file at path '{}': {}",
                path.display(),
                e
            ))
        })?;
        contents.push_str(&data);
    }
    Ok(contents)
}

fn scrape_file_aliases(
    spec: &FilePatternSpec,
    contents: &str,
    flag: &str,
) -> Result<Vec<String>, ScanError> {
    let pattern = spec
        .pattern
        .replace(FLAG_KEY_PLACEHOLDER, &regex::escape(flag));
    let re = regex::Regex::new(&pattern).map_err(|e| {
        ScanError::AliasGeneration(format!("filePattern regex failed for '{}': {}", flag, e))
    })?;
    let mut aliases = Vec::new();
    for caps in re.captures_iter(contents) {
        for group in caps.iter().skip(1).flatten() {
            aliases.push(group.as_str().to_string());
        }
    }
    Ok(aliases)
}

/// Run the spec's command with the flag key on stdin and parse a JSON array
/// of aliases from stdout. The child is killed when the timeout elapses.
async fn run_command_alias(
    spec: &CommandSpec,
    flag: &str,
    dir: &Path,
) -> Result<Vec<String>, ScanError> {
    let mut tokens = spec.command.split_whitespace();
    let program = tokens
        .next()
        .ok_or_else(|| ScanError::Config("command aliases must provide a 'command'".into()))?;

    let mut child = tokio::process::Command::new(program)
        .args(tokens)
        .current_dir(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            ScanError::AliasGeneration(format!("failed to execute alias command: {}", e))
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(flag.as_bytes())
            .await
            .map_err(|e| ScanError::AliasGeneration(format!("failed to write to stdin: {}", e)))?;
    }

    let wait = child.wait_with_output();
    let output = match spec.timeout {
        Some(secs) if secs > 0 => tokio::time::timeout(Duration::from_secs(secs), wait)
            .await
            .map_err(|_| {
                ScanError::AliasGeneration(format!(
                    "alias command timed out after {}s for flag '{}'",
                    secs, flag
                ))
            })?,
        _ => wait.await,
    }
    .map_err(|e| ScanError::AliasGeneration(format!("failed to execute alias command: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ScanError::AliasGeneration(format!(
            "alias command exited with {} for flag '{}': {}",
            output.status,
            flag,
            stderr.trim()
        )));
    }

    serde_json::from_slice::<Vec<String>>(&output.stdout).map_err(|e| {
        ScanError::AliasGeneration(format!(
            "could not unmarshal json output of alias command: {}",
            e
        ))
    })
}
