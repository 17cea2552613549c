//! Fold the flat search-result sequence into minimal per-(file, flag)
//! context hunks under defensive size caps.
//!
//! The caps guard against degenerate repos (minified bundles, generated
//! code, very short false-positive keys) producing either an unbounded run
//! time or an oversized submission payload. The service applies its own
//! limits on top.

use crate::error::ScanError;
use crate::types::{HunkRep, ReferenceHunksRep, SearchResultLine};
use std::collections::BTreeMap;
use tracing::{error, warn};

/// Maximum number of files carrying code references.
pub const MAX_FILE_COUNT: usize = 10_000;
/// Maximum number of hunks across all files.
pub const MAX_HUNK_COUNT: usize = 25_000;
/// Maximum bytes of one source line retained in a hunk.
pub const MAX_LINE_BYTES: usize = 500;
/// Maximum hunked lines for one (file, flag) pair.
pub const MAX_HUNKED_LINES_PER_FILE_AND_FLAG: usize = 500;

/// Search results for a single file: the materialized line sequence plus an
/// index from flag key to the positions that mention it.
#[derive(Debug)]
struct FileSearchResults {
    path: String,
    lines: Vec<SearchResultLine>,
    flag_refs: BTreeMap<String, Vec<usize>>,
}

impl FileSearchResults {
    fn new(path: String) -> Self {
        Self {
            path,
            lines: Vec::new(),
            flag_refs: BTreeMap::new(),
        }
    }

    fn push(&mut self, line: SearchResultLine) -> Result<(), ScanError> {
        if let Some(prev) = self.lines.last() {
            if prev.line_number > line.line_number {
                // The hunking algorithm only works on sorted lines; a driver
                // that breaks this invariant cannot be worked around.
                return Err(ScanError::SortOrderViolation(format!(
                    "'{}' line {} arrived after line {}",
                    self.path, line.line_number, prev.line_number
                )));
            }
        }
        let idx = self.lines.len();
        for flag in line.flag_keys.keys() {
            self.flag_refs.entry(flag.clone()).or_default().push(idx);
        }
        self.lines.push(line);
        Ok(())
    }
}

/// Build every file's reference hunks from the driver's flat output.
///
/// `context_lines = -1` yields hunks with empty `lines` (metadata only).
pub fn make_reference_hunks(
    results: Vec<SearchResultLine>,
    proj_key: &str,
    context_lines: i32,
) -> Result<Vec<ReferenceHunksRep>, ScanError> {
    let mut files = aggregate_by_path(results)?;

    if files.len() > MAX_FILE_COUNT {
        warn!(
            found = files.len(),
            limit = MAX_FILE_COUNT,
            "found more files with code references than the limit, truncating"
        );
        files.truncate(MAX_FILE_COUNT);
    }

    let mut reps = Vec::new();
    let mut num_hunks = 0usize;
    let mut suppress_empty_file_error = false;
    for file in &files {
        if num_hunks > MAX_HUNK_COUNT {
            warn!(
                found = num_hunks,
                limit = MAX_HUNK_COUNT,
                "code reference count exceeded the limit, halting hunk generation"
            );
            break;
        }

        let hunks = make_file_hunks(file, proj_key, context_lines);
        if hunks.is_empty() {
            if !suppress_empty_file_error {
                error!(path = %file.path, "expected code references but found none");
                // Likely to repeat for many files; log the first occurrence only.
                suppress_empty_file_error = true;
            }
            continue;
        }
        num_hunks += hunks.len();
        reps.push(ReferenceHunksRep {
            path: file.path.clone(),
            hunks,
        });
    }
    Ok(reps)
}

/// Split the flat sequence into per-path groups, verifying the driver's
/// ordering guarantees as we go.
fn aggregate_by_path(results: Vec<SearchResultLine>) -> Result<Vec<FileSearchResults>, ScanError> {
    let mut files: Vec<FileSearchResults> = Vec::new();
    let mut seen_paths: std::collections::HashSet<String> = std::collections::HashSet::new();
    for line in results {
        let start_new = match files.last() {
            Some(current) => current.path != line.path,
            None => true,
        };
        if start_new {
            if !seen_paths.insert(line.path.clone()) {
                return Err(ScanError::SortOrderViolation(format!(
                    "results for '{}' are not contiguous",
                    line.path
                )));
            }
            files.push(FileSearchResults::new(line.path.clone()));
        }
        files
            .last_mut()
            .expect("a file group was just pushed")
            .push(line)?;
    }
    Ok(files)
}

fn make_file_hunks(file: &FileSearchResults, proj_key: &str, context_lines: i32) -> Vec<HunkRep> {
    let mut hunks = Vec::new();
    // BTreeMap iteration keeps per-file flag order (and so the report)
    // deterministic across runs.
    for (flag, positions) in &file.flag_refs {
        hunks.extend(build_hunks_for_flag(
            proj_key,
            flag,
            file,
            positions,
            context_lines,
        ));
    }
    hunks
}

/// Walk one flag's match positions and emit its hunks.
///
/// Each match either starts a new hunk or extends the previous one. The
/// backward seek steps through the file's materialized line sequence, so a
/// hunk's starting line is a real source line even when the surrounding
/// lines matched nothing. `last_seen` guarantees a source line contributes to
/// at most one hunk and keeps ranges disjoint.
fn build_hunks_for_flag(
    proj_key: &str,
    flag: &str,
    file: &FileSearchResults,
    positions: &[usize],
    context_lines: i32,
) -> Vec<HunkRep> {
    let mut hunks: Vec<HunkRep> = Vec::new();

    let ctx_back = context_lines.max(0) as usize;
    let mut last_seen: i64 = -1;
    let mut buffer = String::new();
    let mut append_to_previous = false;
    let mut num_hunked_lines = 0usize;
    let mut current = init_hunk(proj_key, flag);

    for &ref_idx in positions {
        // Seek back up to context_lines steps toward the hunk start. Seeking
        // past the end of the previous hunk means this reference overlaps it
        // and extends it instead of opening a new hunk.
        let mut ptr = ref_idx;
        let mut num_ctx_before = 0usize;
        for _ in 0..ctx_back {
            if ptr > 0 {
                ptr -= 1;
                num_ctx_before += 1;
            }
            if (file.lines[ptr].line_number as i64) <= last_seen {
                append_to_previous = true;
            }
        }

        if !append_to_previous {
            current = init_hunk(proj_key, flag);
            current.starting_line_number = file.lines[ptr].line_number;
            buffer.clear();
        }

        // Walk forward over the hunk body. With context_lines = -1 this runs
        // zero steps and the hunk stays metadata-only.
        let mut collected: Vec<String> = Vec::new();
        let steps = num_ctx_before as i64 + 1 + context_lines as i64;
        for _ in 0..steps.max(0) {
            let line = &file.lines[ptr];
            if (line.line_number as i64) > last_seen {
                buffer.push_str(&truncate_line(&line.line_text));
                buffer.push('\n');
                last_seen = line.line_number as i64;
                num_hunked_lines += 1;
                if let Some(aliases) = line.flag_keys.get(flag) {
                    collected.extend(aliases.iter().cloned());
                }
            }
            if ptr + 1 < file.lines.len() {
                ptr += 1;
            }
        }

        if append_to_previous {
            let prev = hunks
                .last_mut()
                .expect("append_to_previous implies an emitted hunk");
            prev.lines = buffer.clone();
            prev.aliases.extend(collected);
            dedupe_in_place(&mut prev.aliases);
            append_to_previous = false;
        } else {
            current.lines = buffer.clone();
            current.aliases = collected;
            dedupe_in_place(&mut current.aliases);
            hunks.push(current.clone());
        }

        // Guards against very long files with many false-positive matches.
        if num_hunked_lines > MAX_HUNKED_LINES_PER_FILE_AND_FLAG {
            warn!(
                path = %file.path,
                flag = %flag,
                lines = num_hunked_lines,
                limit = MAX_HUNKED_LINES_PER_FILE_AND_FLAG,
                "hunked line count exceeded the limit, truncating this file and flag"
            );
            return hunks;
        }
    }

    hunks
}

fn init_hunk(proj_key: &str, flag: &str) -> HunkRep {
    HunkRep {
        starting_line_number: 0,
        lines: String::new(),
        proj_key: proj_key.to_string(),
        flag_key: flag.to_string(),
        aliases: Vec::new(),
    }
}

fn dedupe_in_place(values: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    values.retain(|v| seen.insert(v.clone()));
}

/// Truncate a line to its longest char-boundary prefix of at most
/// [`MAX_LINE_BYTES`] bytes, marking the cut with `…`. Truncating through a
/// flag reference is accepted; the service tolerates hunks whose key was cut.
pub fn truncate_line(line: &str) -> String {
    if line.len() <= MAX_LINE_BYTES {
        return line.to_string();
    }
    let mut end = MAX_LINE_BYTES;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::with_capacity(end + '…'.len_utf8());
    out.push_str(&line[..end]);
    out.push('…');
    out
}
