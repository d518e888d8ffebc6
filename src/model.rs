// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common result types shared by every index

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Kind of a single match, closed across all indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Function,
    Class,
    Import,
    Text,
    Log,
    Semantic,
}

impl std::fmt::Display for MatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchKind::Function => write!(f, "function"),
            MatchKind::Class => write!(f, "class"),
            MatchKind::Import => write!(f, "import"),
            MatchKind::Text => write!(f, "text"),
            MatchKind::Log => write!(f, "log"),
            MatchKind::Semantic => write!(f, "semantic"),
        }
    }
}

/// One search hit. `line` is 1-based; context slices are clamped at file
/// boundaries and never exceed the requested context-line count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub file: PathBuf,
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub kind: MatchKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_before: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_after: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Match {
    pub fn new(file: impl Into<PathBuf>, line: usize, kind: MatchKind, content: String) -> Self {
        Self {
            file: file.into(),
            line,
            column: None,
            name: None,
            kind,
            content,
            context_before: Vec::new(),
            context_after: Vec::new(),
            score: None,
            metadata: BTreeMap::new(),
        }
    }
}

/// Canonical ordering: path, then line, then column, then name. Applied by
/// every index except SemanticIndex (similarity descending) so that parallel
/// and sequential runs emit the same sequence.
pub fn sort_matches(matches: &mut [Match]) {
    matches.sort_by(|a, b| {
        a.file
            .cmp(&b.file)
            .then(a.line.cmp(&b.line))
            .then(a.column.cmp(&b.column))
            .then(a.name.cmp(&b.name))
    });
}

/// Result of one index's search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    pub matches: Vec<Match>,
    pub execution_time: Duration,
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl SearchResult {
    /// Result carrying only an error, used for backend-unavailable and
    /// per-index failure reporting at the dispatcher.
    pub fn from_error(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
            ..Default::default()
        }
    }

    /// Cap `matches` to `max_results`. `truncated` is set iff more matches
    /// existed than the cap allowed.
    pub fn cap(&mut self, max_results: usize) {
        if self.matches.len() > max_results {
            self.matches.truncate(max_results);
            self.truncated = true;
        }
    }
}

/// Where a declared dependency came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencySource {
    Installed,
    Requirements,
    Pyproject,
    Lockfile,
}

impl std::fmt::Display for DependencySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencySource::Installed => write!(f, "installed"),
            DependencySource::Requirements => write!(f, "requirements"),
            DependencySource::Pyproject => write!(f, "pyproject"),
            DependencySource::Lockfile => write!(f, "lockfile"),
        }
    }
}

/// A declared dependency joined with the import sites that use it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyRecord {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub source: DependencySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default)]
    pub usage_sites: Vec<Match>,
}

/// Log severity, ordered so that a threshold filter can use `>=`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "err" | "error" => Ok(LogLevel::Error),
            "fatal" | "critical" => Ok(LogLevel::Critical),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warning => write!(f, "warning"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Critical => write!(f, "critical"),
        }
    }
}

/// A named log stream to search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSource {
    pub name: String,
    pub path: PathBuf,
}

impl LogSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_matches_is_path_then_line() {
        let mut matches = vec![
            Match::new("b.rs", 3, MatchKind::Text, "x".into()),
            Match::new("a.rs", 9, MatchKind::Text, "y".into()),
            Match::new("a.rs", 2, MatchKind::Text, "z".into()),
        ];
        sort_matches(&mut matches);
        let order: Vec<(String, usize)> = matches
            .iter()
            .map(|m| (m.file.display().to_string(), m.line))
            .collect();
        assert_eq!(
            order,
            vec![
                ("a.rs".to_string(), 2),
                ("a.rs".to_string(), 9),
                ("b.rs".to_string(), 3)
            ]
        );
    }

    #[test]
    fn test_cap_sets_truncated_only_when_over() {
        let mut result = SearchResult {
            matches: vec![
                Match::new("a.rs", 1, MatchKind::Text, "1".into()),
                Match::new("a.rs", 2, MatchKind::Text, "2".into()),
            ],
            ..Default::default()
        };
        result.cap(2);
        assert!(!result.truncated);
        result.cap(1);
        assert!(result.truncated);
        assert_eq!(result.matches.len(), 1);
    }

    #[test]
    fn test_log_level_threshold_ordering() {
        assert!(LogLevel::Critical >= LogLevel::Error);
        assert!(LogLevel::Error > LogLevel::Warning);
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!("CRITICAL".parse::<LogLevel>().unwrap(), LogLevel::Critical);
    }
}
