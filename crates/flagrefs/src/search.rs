//! The search driver: walk the working tree and produce a flat,
//! (path, line)-sorted sequence of [`SearchResultLine`]s for a term set.
//!
//! Matching is case-sensitive and literal. When a delimiter set is in force a
//! term only counts when a delimiter character sits immediately on each side
//! of it. Context lines around every match are materialized as result lines
//! with an empty flag map so the hunker can walk real surrounding source.

use crate::error::ScanError;
use crate::types::{AliasMap, SearchResultLine};
use ignore::WalkBuilder;
use regex::RegexSet;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Name of the optional gitignore-style exclusion file at the repo root.
pub const IGNORE_FILE_NAME: &str = ".ldignore";

/// One search term and the flag it is attributed to. `alias` is `None` when
/// the term is the flag's canonical key.
#[derive(Debug, Clone)]
struct Term {
    flag: String,
    alias: Option<String>,
}

pub struct SearchDriver {
    terms: Vec<Term>,
    matcher: RegexSet,
    context_lines: usize,
}

impl SearchDriver {
    /// Build a driver for the given vocabulary.
    ///
    /// `delimiters` is the (possibly empty) concatenation of single-character
    /// delimiters; `context_lines` below zero behaves as zero here — the
    /// metadata-only mode is the hunker's concern.
    pub fn new(
        aliases: &AliasMap,
        delimiters: &str,
        context_lines: i32,
    ) -> Result<Self, ScanError> {
        let mut terms = Vec::new();
        let mut patterns = Vec::new();
        for (flag, flag_aliases) in aliases {
            terms.push(Term {
                flag: flag.clone(),
                alias: None,
            });
            patterns.push(term_pattern(flag, delimiters));
            for alias in flag_aliases {
                terms.push(Term {
                    flag: flag.clone(),
                    alias: Some(alias.clone()),
                });
                patterns.push(term_pattern(alias, delimiters));
            }
        }
        let matcher = RegexSet::new(&patterns)?;
        Ok(Self {
            terms,
            matcher,
            context_lines: context_lines.max(0) as usize,
        })
    }

    /// Scan every searchable file under `dir`, in sorted path order.
    pub fn scan(&self, dir: &Path) -> Result<Vec<SearchResultLine>, ScanError> {
        let mut paths = Vec::new();
        let walker = WalkBuilder::new(dir)
            .add_custom_ignore_filename(IGNORE_FILE_NAME)
            .build();
        for entry in walker {
            let entry = entry.map_err(|e| ScanError::Search(e.to_string()))?;
            if entry.file_type().is_some_and(|t| t.is_file()) {
                paths.push(entry.into_path());
            }
        }
        paths.sort();

        let mut results = Vec::new();
        for path in paths {
            let rel = path
                .strip_prefix(dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            self.scan_file(&path, &rel, &mut results)?;
        }
        Ok(results)
    }

    fn scan_file(
        &self,
        path: &Path,
        rel_path: &str,
        out: &mut Vec<SearchResultLine>,
    ) -> Result<(), ScanError> {
        let bytes = std::fs::read(path)
            .map_err(|e| ScanError::Search(format!("could not read '{}': {}", rel_path, e)))?;
        // Binary and non-UTF-8 files are not searchable.
        let Ok(content) = String::from_utf8(bytes) else {
            return Ok(());
        };

        let lines: Vec<&str> = content.lines().collect();
        // line index -> flags hit on that line
        let mut hits: BTreeMap<usize, BTreeMap<String, Vec<String>>> = BTreeMap::new();
        for (idx, line) in lines.iter().enumerate() {
            let matched = self.matcher.matches(line);
            if !matched.matched_any() {
                continue;
            }
            let entry = hits.entry(idx).or_default();
            for term_idx in matched {
                let term = &self.terms[term_idx];
                let aliases = entry.entry(term.flag.clone()).or_default();
                if let Some(alias) = &term.alias {
                    if !aliases.contains(alias) {
                        aliases.push(alias.clone());
                    }
                }
            }
        }
        if hits.is_empty() {
            return Ok(());
        }

        // Union of the ±context windows around every match.
        let mut include: BTreeSet<usize> = BTreeSet::new();
        for &idx in hits.keys() {
            let lo = idx.saturating_sub(self.context_lines);
            let hi = (idx + self.context_lines).min(lines.len() - 1);
            include.extend(lo..=hi);
        }

        for idx in include {
            out.push(SearchResultLine {
                path: rel_path.to_string(),
                line_number: (idx + 1) as u32,
                line_text: lines[idx].to_string(),
                flag_keys: hits.remove(&idx).unwrap_or_default(),
            });
        }
        Ok(())
    }
}

/// Regex for one literal term, delimiter-wrapped when a delimiter set is in
/// force.
fn term_pattern(term: &str, delimiters: &str) -> String {
    if delimiters.is_empty() {
        regex::escape(term)
    } else {
        let class = escape_char_class(delimiters);
        format!("[{}]{}[{}]", class, regex::escape(term), class)
    }
}

/// Escape characters that are special inside a regex character class.
fn escape_char_class(chars: &str) -> String {
    let mut out = String::with_capacity(chars.len());
    for c in chars.chars() {
        if matches!(c, '\\' | ']' | '^' | '-' | '&' | '~') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn alias_map(entries: &[(&str, &[&str])]) -> AliasMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    fn write_repo(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, contents) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, contents).unwrap();
        }
        dir
    }

    #[test]
    fn finds_delimited_references() {
        let dir = write_repo(&[("app.go", "x := client.Variation(\"my-flag\", false)\n")]);
        let driver = SearchDriver::new(&alias_map(&[("my-flag", &[])]), "\"'`", 0).unwrap();
        let results = driver.scan(dir.path()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].line_number, 1);
        assert!(results[0].flag_keys.contains_key("my-flag"));
        assert!(results[0].flag_keys["my-flag"].is_empty());
    }

    #[test]
    fn undelimited_reference_does_not_match_when_delimiters_required() {
        let dir = write_repo(&[("app.go", "useMyFlag(my-flag)\n")]);
        let driver = SearchDriver::new(&alias_map(&[("my-flag", &[])]), "\"'`", 0).unwrap();
        let results = driver.scan(dir.path()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn empty_delimiter_set_matches_bare_references() {
        let dir = write_repo(&[("app.go", "useMyFlag(my-flag)\n")]);
        let driver = SearchDriver::new(&alias_map(&[("my-flag", &[])]), "", 0).unwrap();
        let results = driver.scan(dir.path()).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn alias_hits_record_the_alias() {
        let dir = write_repo(&[("app.py", "if flags.my_flag:\n    pass\n")]);
        let driver = SearchDriver::new(&alias_map(&[("my-flag", &["my_flag"])]), "", 0).unwrap();
        let results = driver.scan(dir.path()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].flag_keys["my-flag"], vec!["my_flag".to_string()]);
    }

    #[test]
    fn context_lines_are_materialized_with_empty_flag_maps() {
        let dir = write_repo(&[("a.txt", "L1\nL2\n\"my-flag\"\nL4\nL5\n")]);
        let driver = SearchDriver::new(&alias_map(&[("my-flag", &[])]), "\"'`", 1).unwrap();
        let results = driver.scan(dir.path()).unwrap();
        let nums: Vec<u32> = results.iter().map(|r| r.line_number).collect();
        assert_eq!(nums, vec![2, 3, 4]);
        assert!(results[0].flag_keys.is_empty());
        assert!(results[1].is_match());
        assert!(results[2].flag_keys.is_empty());
    }

    #[test]
    fn overlapping_context_windows_dedupe() {
        let dir = write_repo(&[("a.txt", "\"f-one\"\nmid\n\"f-one\"\n")]);
        let driver = SearchDriver::new(&alias_map(&[("f-one", &[])]), "\"'`", 2).unwrap();
        let results = driver.scan(dir.path()).unwrap();
        let nums: Vec<u32> = results.iter().map(|r| r.line_number).collect();
        assert_eq!(nums, vec![1, 2, 3]);
    }

    #[test]
    fn results_are_sorted_by_path_then_line() {
        let dir = write_repo(&[
            ("b.txt", "\"zz-flag\"\n"),
            ("a.txt", "pad\n\"zz-flag\"\n"),
        ]);
        let driver = SearchDriver::new(&alias_map(&[("zz-flag", &[])]), "\"'`", 0).unwrap();
        let results = driver.scan(dir.path()).unwrap();
        let got: Vec<(String, u32)> = results
            .iter()
            .map(|r| (r.path.clone(), r.line_number))
            .collect();
        assert_eq!(
            got,
            vec![("a.txt".to_string(), 2), ("b.txt".to_string(), 1)]
        );
    }

    #[test]
    fn ldignore_excludes_paths() {
        let dir = write_repo(&[
            (".ldignore", "vendor/\n"),
            ("vendor/lib.js", "\"my-flag\"\n"),
            ("app.js", "\"my-flag\"\n"),
        ]);
        let driver = SearchDriver::new(&alias_map(&[("my-flag", &[])]), "\"'`", 0).unwrap();
        let results = driver.scan(dir.path()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, "app.js");
    }

    #[test]
    fn binary_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("blob.bin"), [0xff, 0xfe, b'm', 0x00]).unwrap();
        let driver = SearchDriver::new(&alias_map(&[("my-flag", &[])]), "", 0).unwrap();
        assert!(driver.scan(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn two_flags_on_one_line_union_merge() {
        let dir = write_repo(&[("a.txt", "\"flag-a\" and \"flag-b\"\n")]);
        let driver =
            SearchDriver::new(&alias_map(&[("flag-a", &[]), ("flag-b", &[])]), "\"'`", 0).unwrap();
        let results = driver.scan(dir.path()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].flag_keys.len(), 2);
    }

    #[test]
    fn matching_is_case_sensitive() {
        let dir = write_repo(&[("a.txt", "\"MY-FLAG\"\n")]);
        let driver = SearchDriver::new(&alias_map(&[("my-flag", &[])]), "\"'`", 0).unwrap();
        assert!(driver.scan(dir.path()).unwrap().is_empty());
    }

    proptest::proptest! {
        #[test]
        fn delimiter_wrapping_is_required_exactly_when_delimiters_are_set(
            key in "[a-z][a-z0-9-]{2,15}",
        ) {
            let delimited = regex::Regex::new(&term_pattern(&key, "\"'`")).unwrap();
            let quoted = format!("x \"{}\" y", key);
            let single_quoted_call = format!("f('{}')", key);
            let bare_text = format!("x {} y", key);
            proptest::prop_assert!(delimited.is_match(&quoted));
            proptest::prop_assert!(delimited.is_match(&single_quoted_call));
            proptest::prop_assert!(!delimited.is_match(&bare_text));

            let bare = regex::Regex::new(&term_pattern(&key, "")).unwrap();
            proptest::prop_assert!(bare.is_match(&bare_text));
        }
    }
}
