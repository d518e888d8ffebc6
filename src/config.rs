// SPDX-License-Identifier: MIT OR Apache-2.0

//! Search configuration
//!
//! `SearchConfig` is the immutable per-call value object handed to every
//! index. Engine-wide defaults load from .scourrc.toml in the project root or
//! ~/.config/scour/config.toml.

use chrono::NaiveDateTime;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::EngineError;
use crate::filters::{CompiledGlobs, FileTypeClass};
use crate::model::{LogLevel, LogSource};

/// Declaration kinds CodeIndex searches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodeSearchKind {
    Function,
    Class,
    Import,
    #[default]
    All,
}

/// Which dependency surface DependencyIndex reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepSearchKind {
    Installed,
    #[default]
    Requirements,
    Pyproject,
    Lockfile,
    Imports,
}

/// Immutable per-query configuration. Constructed by the caller, never
/// mutated after construction; passed by reference into every index.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Regex pattern for the pattern-driven indexes, free text for
    /// SemanticIndex. An empty pattern matches everything.
    pub pattern: String,
    pub root: PathBuf,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub case_sensitive: bool,
    /// Full-string equality for declaration names, not substring.
    pub exact_match: bool,
    /// Treat `pattern` as a literal, not a regex (FileIndex).
    pub literal: bool,
    pub whole_word: bool,
    pub context_lines: usize,
    pub max_results: usize,
    pub complexity_range: (Option<u32>, Option<u32>),
    pub lines_range: (Option<usize>, Option<usize>),
    pub max_file_size: Option<u64>,
    pub modified_after: Option<NaiveDateTime>,
    pub modified_before: Option<NaiveDateTime>,
    pub include_hidden: bool,
    /// Restrict FileIndex to these extension classes; `None` means all
    /// non-binary files.
    pub file_types: Option<Vec<FileTypeClass>>,
    pub parallel: bool,
    /// Worker pool size; `None` means available cores.
    pub threads: Option<usize>,
    pub cache_enabled: bool,
    pub code_kind: CodeSearchKind,
    pub dep_kind: DepSearchKind,
    /// Keep only dependencies with zero usage sites.
    pub unused_only: bool,
    pub log_sources: Vec<LogSource>,
    pub min_level: Option<LogLevel>,
    pub since: Option<NaiveDateTime>,
    pub until: Option<NaiveDateTime>,
    /// Restrict LogIndex to one named source.
    pub log_source_filter: Option<String>,
    pub correlation_id: Option<String>,
    pub similarity_threshold: f32,
    pub explain_results: bool,
}

impl SearchConfig {
    pub fn new(root: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            root: root.into(),
            include: Vec::new(),
            exclude: Vec::new(),
            case_sensitive: true,
            exact_match: false,
            literal: false,
            whole_word: false,
            context_lines: 0,
            max_results: 100,
            complexity_range: (None, None),
            lines_range: (None, None),
            max_file_size: None,
            modified_after: None,
            modified_before: None,
            include_hidden: false,
            file_types: None,
            parallel: false,
            threads: None,
            cache_enabled: true,
            code_kind: CodeSearchKind::All,
            dep_kind: DepSearchKind::Requirements,
            unused_only: false,
            log_sources: Vec::new(),
            min_level: None,
            since: None,
            until: None,
            log_source_filter: None,
            correlation_id: None,
            similarity_threshold: 0.2,
            explain_results: false,
        }
    }

    /// Fail-fast validation: bad regex, bad globs, missing root and inverted
    /// ranges are rejected before any work is scheduled.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.root.exists() {
            return Err(EngineError::RootNotFound(self.root.clone()));
        }
        self.compile_pattern()?;
        CompiledGlobs::compile(&self.include, &self.exclude)?;
        if let (Some(min), Some(max)) = self.complexity_range {
            if min > max {
                return Err(EngineError::InvalidRange {
                    field: "complexity",
                    min: min as u64,
                    max: max as u64,
                });
            }
        }
        if let (Some(min), Some(max)) = self.lines_range {
            if min > max {
                return Err(EngineError::InvalidRange {
                    field: "lines",
                    min: min as u64,
                    max: max as u64,
                });
            }
        }
        Ok(())
    }

    /// Compile `pattern` honoring the literal, exact-match and
    /// case-sensitivity flags. An empty pattern compiles to match-anything.
    pub fn compile_pattern(&self) -> Result<Regex, EngineError> {
        let mut source = if self.literal {
            regex::escape(&self.pattern)
        } else {
            self.pattern.clone()
        };
        if self.exact_match {
            source = format!("^(?:{})$", source);
        } else if self.whole_word {
            source = format!(r"\b(?:{})\b", source);
        }
        RegexBuilder::new(&source)
            .case_insensitive(!self.case_sensitive)
            .build()
            .map_err(|e| EngineError::InvalidPattern {
                pattern: self.pattern.clone(),
                source: e,
            })
    }

    pub fn compile_globs(&self) -> Result<CompiledGlobs, EngineError> {
        CompiledGlobs::compile(&self.include, &self.exclude)
    }

    /// Effective worker pool size.
    pub fn thread_count(&self) -> usize {
        self.threads
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1)
    }

    pub fn complexity_allows(&self, complexity: u32) -> bool {
        let (min, max) = self.complexity_range;
        min.map_or(true, |m| complexity >= m) && max.map_or(true, |m| complexity <= m)
    }

    pub fn lines_allows(&self, lines: usize) -> bool {
        let (min, max) = self.lines_range;
        min.map_or(true, |m| lines >= m) && max.map_or(true, |m| lines <= m)
    }
}

/// Per-index and external-backend call deadline.
pub const DEFAULT_INDEX_TIMEOUT: Duration = Duration::from_secs(30);

/// Engine defaults loaded from .scourrc.toml or ~/.config/scour/config.toml
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of results per index
    pub max_results: Option<usize>,
    /// Patterns to exclude from every search
    pub exclude_patterns: Vec<String>,
    /// Cache directory override (default: <root>/.scour)
    pub cache_dir: Option<PathBuf>,
    /// External embedding command for SemanticIndex
    pub embedding_command: Option<String>,
}

impl EngineConfig {
    /// Load configuration from files
    ///
    /// Precedence (highest to lowest):
    /// 1. .scourrc.toml in the project root
    /// 2. ~/.config/scour/config.toml
    pub fn load(root: &std::path::Path) -> Self {
        if let Some(config) = Self::load_from_path(&root.join(".scourrc.toml")) {
            return config;
        }

        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".config").join("scour").join("config.toml");
            if let Some(config) = Self::load_from_path(&config_path) {
                return config;
            }
        }

        Self::default()
    }

    fn load_from_path(path: &PathBuf) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match toml::from_str(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!("failed to parse {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge caller options with config (caller wins)
    pub fn merge_max_results(&self, caller_value: Option<usize>) -> usize {
        caller_value.or(self.max_results).unwrap_or(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_requires_full_string() {
        let mut config = SearchConfig::new(".", "login");
        config.exact_match = true;
        let re = config.compile_pattern().unwrap();
        assert!(re.is_match("login"));
        assert!(!re.is_match("login_user"));
        assert!(!re.is_match("relogin"));
    }

    #[test]
    fn test_case_insensitive_pattern() {
        let mut config = SearchConfig::new(".", "Login");
        config.case_sensitive = false;
        let re = config.compile_pattern().unwrap();
        assert!(re.is_match("LOGIN"));
        assert!(re.is_match("login"));
    }

    #[test]
    fn test_literal_pattern_escapes_metacharacters() {
        let mut config = SearchConfig::new(".", "a.b(c)");
        config.literal = true;
        let re = config.compile_pattern().unwrap();
        assert!(re.is_match("a.b(c)"));
        assert!(!re.is_match("aXb(c)"));
    }

    #[test]
    fn test_validate_rejects_bad_regex() {
        let config = SearchConfig::new(".", "f(unclosed");
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_missing_root() {
        let config = SearchConfig::new("/nonexistent/scour-root", "x");
        assert!(matches!(
            config.validate(),
            Err(EngineError::RootNotFound(_))
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let mut config = SearchConfig::new(".", "x");
        config.complexity_range = (Some(5), Some(2));
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_merge_max_results_caller_wins() {
        let config = EngineConfig {
            max_results: Some(25),
            ..Default::default()
        };
        assert_eq!(config.merge_max_results(Some(5)), 5);
        assert_eq!(config.merge_max_results(None), 25);
        assert_eq!(EngineConfig::default().merge_max_results(None), 100);
    }
}
