use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aliases generated for each flag key. Ordered so report output is stable
/// across runs.
pub type AliasMap = BTreeMap<String, Vec<String>>;

/// One line of search-driver output.
///
/// A line may mention several flags; `flag_keys` records, for each flag, the
/// aliases that caused the hit. A flag whose canonical key matched directly
/// carries an empty alias list. Context lines around a match are represented
/// as result lines with an empty `flag_keys` map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResultLine {
    pub path: String,
    /// 1-based line number in the source file.
    pub line_number: u32,
    /// The source line without its trailing newline.
    pub line_text: String,
    pub flag_keys: BTreeMap<String, Vec<String>>,
}

impl SearchResultLine {
    /// True when at least one flag matched on this line (as opposed to a
    /// pure context line).
    pub fn is_match(&self) -> bool {
        !self.flag_keys.is_empty()
    }
}

/// A contiguous block of source lines carrying references to one flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HunkRep {
    pub starting_line_number: u32,
    /// Verbatim text of the covered lines, `\n`-separated (and terminated).
    /// Empty when the scan ran with `context_lines = -1`.
    #[serde(default)]
    pub lines: String,
    pub proj_key: String,
    pub flag_key: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl HunkRep {
    /// Number of source lines covered by this hunk.
    pub fn line_count(&self) -> u32 {
        self.lines.matches('\n').count() as u32
    }
}

/// All hunks found in one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceHunksRep {
    pub path: String,
    pub hunks: Vec<HunkRep>,
}

/// The per-branch payload submitted to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchRep {
    /// Branch name with any leading `refs/heads/` stripped.
    pub name: String,
    /// Commit SHA of the branch head at scan time.
    pub head: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_sequence_id: Option<i64>,
    /// Epoch milliseconds.
    pub sync_time: i64,
    #[serde(default)]
    pub references: Vec<ReferenceHunksRep>,
}

impl BranchRep {
    pub fn total_hunk_count(&self) -> usize {
        self.references.iter().map(|r| r.hunks.len()).sum()
    }
}

/// Repository metadata upserted to the service before the first submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoParams {
    #[serde(rename = "type")]
    pub repo_type: String,
    pub name: String,
    #[serde(rename = "sourceLink", default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_url_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hunk_url_template: Option<String>,
    pub default_branch: String,
}
