//! Assemble the branch report and the optional local outputs: the CSV dump
//! and the debug reference-count table.

use crate::error::ScanError;
use crate::types::{BranchRep, ReferenceHunksRep};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Build the submission payload for the current branch.
pub fn make_branch_rep(
    branch: &str,
    head_sha: &str,
    update_sequence_id: Option<i64>,
    references: Vec<ReferenceHunksRep>,
) -> BranchRep {
    BranchRep {
        name: branch.trim_start_matches("refs/heads/").to_string(),
        head: head_sha.to_string(),
        update_sequence_id,
        sync_time: chrono::Utc::now().timestamp_millis(),
        references,
    }
}

/// Write one CSV row per hunk. Returns the written path.
pub fn write_csv(
    rep: &BranchRep,
    out_dir: &Path,
    proj_key: &str,
    repo_name: &str,
) -> Result<PathBuf, ScanError> {
    let short_sha = rep.head.get(..7).unwrap_or(&rep.head);
    let path = out_dir.join(format!(
        "coderefs_{}_{}_{}.csv",
        proj_key, repo_name, short_sha
    ));

    let mut out = String::from(
        "repo,branch,projKey,flagKey,path,startingLineNumber,lineCount,aliases\n",
    );
    for reference in &rep.references {
        for hunk in &reference.hunks {
            let row = [
                csv_field(repo_name),
                csv_field(&rep.name),
                csv_field(proj_key),
                csv_field(&hunk.flag_key),
                csv_field(&reference.path),
                hunk.starting_line_number.to_string(),
                hunk.line_count().to_string(),
                csv_field(&hunk.aliases.join(";")),
            ];
            out.push_str(&row.join(","));
            out.push('\n');
        }
    }
    std::fs::write(&path, out).map_err(|e| {
        ScanError::Config(format!("could not write csv '{}': {}", path.display(), e))
    })?;
    Ok(path)
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Log the per-flag reference counts. Debug aid for tuning alias configs.
pub fn log_reference_count_table(rep: &BranchRep) {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for reference in &rep.references {
        for hunk in &reference.hunks {
            *counts.entry(hunk.flag_key.as_str()).or_default() += 1;
        }
    }
    for (flag, count) in counts {
        debug!(flag = %flag, references = count, "flag reference count");
    }
}

/// Replace all but the last four characters of the token for log output.
pub fn mask_access_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}
