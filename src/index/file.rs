// SPDX-License-Identifier: MIT OR Apache-2.0

//! Line-oriented content search over a file tree
//!
//! Filters are applied in order: glob, file-type class, size ceiling,
//! modified-time window, hidden-file policy. Binary files are skipped, not
//! errored.

use anyhow::Result;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::cache::FingerprintCache;
use crate::config::SearchConfig;
use crate::filters::{
    classify, context_slices, is_hidden, is_probably_binary, passes_mtime_window, passes_size,
    CompiledGlobs, FileTypeClass,
};
use crate::index::{run_partitioned, FileOutcome, IndexKind, SearchIndex};
use crate::model::{sort_matches, Match, MatchKind, SearchResult};
use crate::scanner::FileScanner;

const FILE_CACHE_VERSION: &str = "v1";

pub struct FileIndex {
    cache: Arc<FingerprintCache>,
}

impl FileIndex {
    pub fn new(cache: Arc<FingerprintCache>) -> Self {
        Self { cache }
    }

    pub fn search(&self, config: &SearchConfig) -> Result<SearchResult> {
        let started = Instant::now();
        let pattern = config.compile_pattern()?;
        let globs = config.compile_globs()?;

        let mut errors = Vec::new();
        let files = self.candidate_files(config, &globs, &mut errors)?;
        let outcome = run_partitioned(&files, config, || (), |_, path| {
            self.scan_cached(path, config, &pattern)
        });

        let mut result = SearchResult {
            matches: outcome.matches,
            errors,
            ..Default::default()
        };
        result.errors.extend(outcome.errors);
        sort_matches(&mut result.matches);
        result.cap(config.max_results);
        result.execution_time = started.elapsed();
        Ok(result)
    }

    fn candidate_files(
        &self,
        config: &SearchConfig,
        globs: &CompiledGlobs,
        errors: &mut Vec<String>,
    ) -> Result<Vec<std::path::PathBuf>> {
        let all = FileScanner::with_excludes(&config.root, config.exclude.clone())
            .with_hidden(config.include_hidden)
            .list_files()?;

        let mut files = Vec::new();
        for path in all {
            let relative = path.strip_prefix(&config.root).unwrap_or(&path);
            if !globs.allows(relative) {
                continue;
            }

            let class = classify(&path);
            if class == FileTypeClass::Binary {
                continue;
            }
            if let Some(wanted) = &config.file_types {
                if !wanted.contains(&class) {
                    continue;
                }
            }

            let meta = match std::fs::metadata(&path) {
                Ok(meta) => meta,
                Err(e) => {
                    errors.push(format!("{}: {}", path.display(), e));
                    continue;
                }
            };
            if !passes_size(&meta, config.max_file_size) {
                continue;
            }
            if !passes_mtime_window(&meta, config.modified_after, config.modified_before) {
                continue;
            }
            if !config.include_hidden && is_hidden(relative) {
                continue;
            }

            files.push(path);
        }
        Ok(files)
    }

    /// Per-file match list, through the fingerprint cache. The key carries a
    /// digest of every flag that changes what this file yields.
    fn scan_cached(&self, path: &Path, config: &SearchConfig, pattern: &Regex) -> FileOutcome {
        let key = match_cache_key(path, config);
        if config.cache_enabled {
            if let Some(matches) = self.cache.get_json::<Vec<Match>>(&key) {
                return FileOutcome {
                    matches,
                    error: None,
                };
            }
        }
        let outcome = scan_file(path, config, pattern);
        if config.cache_enabled && outcome.error.is_none() {
            self.cache.set_json(&key, &outcome.matches, &[path]);
        }
        outcome
    }
}

fn match_cache_key(path: &Path, config: &SearchConfig) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(config.pattern.as_bytes());
    hasher.update(&[
        config.case_sensitive as u8,
        config.literal as u8,
        config.exact_match as u8,
        config.whole_word as u8,
    ]);
    hasher.update(&config.context_lines.to_le_bytes());
    let digest = hasher.finalize().to_hex();
    format!(
        "file:{}:{}:{}",
        FILE_CACHE_VERSION,
        &digest.as_str()[..16],
        path.display()
    )
}

impl SearchIndex for FileIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::File
    }

    fn search(&self, config: &SearchConfig) -> Result<SearchResult> {
        FileIndex::search(self, config)
    }
}

fn scan_file(path: &Path, config: &SearchConfig, pattern: &Regex) -> FileOutcome {
    if is_probably_binary(path) {
        return FileOutcome::default();
    }
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            return FileOutcome::default();
        }
        Err(e) => {
            return FileOutcome {
                matches: Vec::new(),
                error: Some(format!("{}: {}", path.display(), e)),
            }
        }
    };

    let lines: Vec<&str> = content.lines().collect();
    let mut matches = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        let Some(found) = pattern.find(line) else {
            continue;
        };
        let (context_before, context_after) = context_slices(&lines, index, config.context_lines);
        let mut m = Match::new(path, index + 1, MatchKind::Text, line.to_string());
        m.column = Some(found.start() + 1);
        m.context_before = context_before;
        m.context_after = context_after;
        matches.push(m);
    }
    FileOutcome {
        matches,
        error: None,
    }
}
