// SPDX-License-Identifier: MIT OR Apache-2.0

//! Structural code search
//!
//! Parses each candidate file into a declaration outline (functions, classes,
//! imports) and matches declaration names against the configured pattern.
//! Files that cannot be parsed degrade to line-oriented text matching.

use anyhow::Result;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::cache::FingerprintCache;
use crate::config::{CodeSearchKind, SearchConfig};
use crate::filters::{context_slices, CompiledGlobs};
use crate::index::{run_partitioned, FileOutcome, IndexKind, SearchIndex};
use crate::model::{sort_matches, Match, MatchKind, SearchResult};
use crate::parser::{DeclKind, Declaration, OutlineParser};
use crate::scanner::{language_of, FileScanner};

const OUTLINE_CACHE_VERSION: &str = "v1";

pub struct CodeIndex {
    cache: Arc<FingerprintCache>,
}

impl CodeIndex {
    pub fn new(cache: Arc<FingerprintCache>) -> Self {
        Self { cache }
    }

    pub fn search(&self, config: &SearchConfig) -> Result<SearchResult> {
        let started = Instant::now();
        let pattern = config.compile_pattern()?;
        let globs = config.compile_globs()?;

        let files = self.candidate_files(config, &globs)?;
        let outcome = run_partitioned(
            &files,
            config,
            OutlineParser::new,
            |parser, path| self.scan_file(parser, path, config, &pattern),
        );

        let mut result = SearchResult {
            matches: outcome.matches,
            errors: outcome.errors,
            ..Default::default()
        };
        sort_matches(&mut result.matches);
        result.cap(config.max_results);
        result.execution_time = started.elapsed();
        Ok(result)
    }

    fn candidate_files(
        &self,
        config: &SearchConfig,
        globs: &CompiledGlobs,
    ) -> Result<Vec<std::path::PathBuf>> {
        let files = FileScanner::with_excludes(&config.root, config.exclude.clone())
            .with_hidden(config.include_hidden)
            .list_files()?;
        Ok(files
            .into_iter()
            .filter(|path| {
                let relative = path.strip_prefix(&config.root).unwrap_or(path);
                globs.allows(relative)
            })
            .collect())
    }

    fn scan_file(
        &self,
        parser: &mut OutlineParser,
        path: &Path,
        config: &SearchConfig,
        pattern: &Regex,
    ) -> FileOutcome {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                // Undecodable bytes mean a binary file.
                debug!("skipping binary file {}", path.display());
                return FileOutcome::default();
            }
            Err(e) => {
                return FileOutcome {
                    matches: Vec::new(),
                    error: Some(format!("{}: {}", path.display(), e)),
                }
            }
        };

        match self.outline_of(parser, path, &content, config.cache_enabled) {
            Some(declarations) => FileOutcome {
                matches: declaration_matches(path, &content, &declarations, config, pattern),
                error: None,
            },
            None => FileOutcome {
                matches: text_matches(path, &content, config, pattern),
                error: None,
            },
        }
    }

    /// Cached structural parse; `None` means fall back to text search.
    fn outline_of(
        &self,
        parser: &mut OutlineParser,
        path: &Path,
        content: &str,
        cache_enabled: bool,
    ) -> Option<Vec<Declaration>> {
        let language = language_of(path)?;

        let key = format!("outline:{}:{}", OUTLINE_CACHE_VERSION, path.display());
        if cache_enabled {
            if let Some(cached) = self.cache.get_json::<Vec<Declaration>>(&key) {
                return Some(cached);
            }
        }

        match parser.outline(content, language) {
            Ok(declarations) => {
                if cache_enabled {
                    self.cache.set_json(&key, &declarations, &[path]);
                }
                Some(declarations)
            }
            Err(e) => {
                debug!("parse failed for {} ({}); using text search", path.display(), e);
                None
            }
        }
    }
}

impl SearchIndex for CodeIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Code
    }

    fn search(&self, config: &SearchConfig) -> Result<SearchResult> {
        CodeIndex::search(self, config)
    }
}

fn wanted(kind: DeclKind, search: CodeSearchKind) -> bool {
    match search {
        CodeSearchKind::All => true,
        CodeSearchKind::Function => kind == DeclKind::Function,
        CodeSearchKind::Class => kind == DeclKind::Class,
        CodeSearchKind::Import => kind == DeclKind::Import,
    }
}

fn declaration_matches(
    path: &Path,
    content: &str,
    declarations: &[Declaration],
    config: &SearchConfig,
    pattern: &Regex,
) -> Vec<Match> {
    let lines: Vec<&str> = content.lines().collect();
    let mut matches = Vec::new();

    for decl in declarations {
        if !wanted(decl.kind, config.code_kind) || !pattern.is_match(&decl.name) {
            continue;
        }
        if matches!(decl.kind, DeclKind::Function | DeclKind::Class) {
            if !config.complexity_allows(decl.complexity) || !config.lines_allows(decl.lines()) {
                continue;
            }
        }

        let line_index = decl.line.saturating_sub(1).min(lines.len().saturating_sub(1));
        let (context_before, context_after) =
            context_slices(&lines, line_index, config.context_lines);

        let kind = match decl.kind {
            DeclKind::Function => MatchKind::Function,
            DeclKind::Class => MatchKind::Class,
            DeclKind::Import => MatchKind::Import,
        };
        let mut m = Match::new(
            path,
            decl.line,
            kind,
            lines.get(line_index).map(|l| l.to_string()).unwrap_or_default(),
        );
        m.column = Some(decl.column);
        m.name = Some(decl.name.clone());
        m.context_before = context_before;
        m.context_after = context_after;
        if decl.kind != DeclKind::Import {
            m.metadata
                .insert("complexity".into(), decl.complexity.to_string());
            m.metadata.insert("lines".into(), decl.lines().to_string());
            m.metadata.insert("end_line".into(), decl.end_line.to_string());
        }
        if let Some(root) = &decl.module_root {
            m.metadata.insert("module".into(), root.clone());
        }
        matches.push(m);
    }

    matches
}

/// Line-oriented fallback for unsupported or unparseable files.
fn text_matches(
    path: &Path,
    content: &str,
    config: &SearchConfig,
    pattern: &Regex,
) -> Vec<Match> {
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
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn index() -> CodeIndex {
        CodeIndex::new(Arc::new(FingerprintCache::in_memory().unwrap()))
    }

    fn write_file(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_function_search_with_complexity() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "auth.py",
            "def login(user, pw):\n    if user:\n        return True\n    return False\n",
        );

        let mut config = SearchConfig::new(dir.path(), "login");
        config.code_kind = CodeSearchKind::Function;
        config.complexity_range = (Some(1), None);

        let result = index().search(&config).unwrap();
        assert_eq!(result.matches.len(), 1);
        let m = &result.matches[0];
        assert_eq!(m.line, 1);
        assert_eq!(m.kind, MatchKind::Function);
        assert_eq!(m.metadata.get("complexity").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_exact_match_excludes_substrings() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "a.py",
            "def login():\n    pass\n\ndef login_user():\n    pass\n",
        );

        let mut config = SearchConfig::new(dir.path(), "login");
        config.code_kind = CodeSearchKind::Function;
        let loose = index().search(&config).unwrap();
        assert_eq!(loose.matches.len(), 2);

        config.exact_match = true;
        let exact = index().search(&config).unwrap();
        assert_eq!(exact.matches.len(), 1);
        assert_eq!(exact.matches[0].name.as_deref(), Some("login"));
    }

    #[test]
    fn test_unparseable_file_falls_back_to_text() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "notes.cfg", "login timeout = 30\n");

        let config = SearchConfig::new(dir.path(), "login");
        let result = index().search(&config).unwrap();
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].kind, MatchKind::Text);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_parallel_equals_sequential() {
        let dir = TempDir::new().unwrap();
        for i in 0..12 {
            write_file(
                dir.path(),
                &format!("m{}.py", i),
                &format!("def handler_{}():\n    pass\n\ndef other():\n    pass\n", i),
            );
        }

        let mut config = SearchConfig::new(dir.path(), "handler");
        config.code_kind = CodeSearchKind::Function;
        config.parallel = false;
        let sequential = index().search(&config).unwrap();
        config.parallel = true;
        config.threads = Some(4);
        let parallel = index().search(&config).unwrap();

        let key = |r: &SearchResult| {
            r.matches
                .iter()
                .map(|m| (m.file.clone(), m.line, m.name.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(key(&sequential), key(&parallel));
        assert_eq!(sequential.matches.len(), 12);
    }

    #[test]
    fn test_result_capping_sets_truncated() {
        let dir = TempDir::new().unwrap();
        for i in 0..5 {
            write_file(dir.path(), &format!("f{}.py", i), "def target():\n    pass\n");
        }

        let mut config = SearchConfig::new(dir.path(), "target");
        config.max_results = 3;
        let result = index().search(&config).unwrap();
        assert_eq!(result.matches.len(), 3);
        assert!(result.truncated);

        config.max_results = 100;
        let all = index().search(&config).unwrap();
        assert_eq!(all.matches.len(), 5);
        assert!(!all.truncated);
    }

    #[test]
    fn test_import_search_carries_module_root() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "app.py", "import requests\nfrom flask import Flask\n");

        let mut config = SearchConfig::new(dir.path(), "requests");
        config.code_kind = CodeSearchKind::Import;
        let result = index().search(&config).unwrap();
        assert_eq!(result.matches.len(), 1);
        assert_eq!(
            result.matches[0].metadata.get("module").map(String::as_str),
            Some("requests")
        );
    }

    #[test]
    fn test_outline_cache_reused_and_invalidated() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.py", "def first():\n    pass\n");
        let cache = Arc::new(FingerprintCache::in_memory().unwrap());
        let code = CodeIndex::new(Arc::clone(&cache));

        let mut config = SearchConfig::new(dir.path(), "first");
        config.code_kind = CodeSearchKind::Function;
        assert_eq!(code.search(&config).unwrap().matches.len(), 1);
        assert!(!cache.is_empty());

        // Rewrite the file; the fingerprint mismatch must force a re-parse.
        write_file(dir.path(), "a.py", "def second_renamed():\n    pass\n");
        assert!(code.search(&config).unwrap().matches.is_empty());
        config.pattern = "second_renamed".into();
        assert_eq!(code.search(&config).unwrap().matches.len(), 1);
    }

    #[test]
    fn test_context_lines_clamped() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "top.py", "def top():\n    pass\n");

        let mut config = SearchConfig::new(dir.path(), "top");
        config.context_lines = 3;
        let result = index().search(&config).unwrap();
        let m = &result.matches[0];
        assert!(m.context_before.is_empty());
        assert_eq!(m.context_after.len(), 1);
    }
}
