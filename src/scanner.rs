// SPDX-License-Identifier: MIT OR Apache-2.0

//! File scanner using the ignore crate (same as ripgrep)

use anyhow::Result;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

/// File scanner that respects .gitignore and custom excludes. Output is
/// sorted so every downstream partitioning is deterministic.
pub struct FileScanner {
    root: PathBuf,
    exclude_patterns: Vec<String>,
    respect_git_ignore: bool,
    include_hidden: bool,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            exclude_patterns: Vec::new(),
            respect_git_ignore: true,
            include_hidden: false,
        }
    }

    /// Create scanner with exclude patterns
    pub fn with_excludes(root: impl AsRef<Path>, excludes: Vec<String>) -> Self {
        let mut scanner = Self::new(root);
        scanner.exclude_patterns = excludes;
        scanner
    }

    /// Enable or disable respect for git ignore rules
    pub fn with_gitignore(mut self, enabled: bool) -> Self {
        self.respect_git_ignore = enabled;
        self
    }

    /// Include dotfiles and dot-directories in the walk
    pub fn with_hidden(mut self, include_hidden: bool) -> Self {
        self.include_hidden = include_hidden;
        self
    }

    fn make_builder(&self) -> WalkBuilder {
        let mut builder = WalkBuilder::new(&self.root);
        builder.hidden(!self.include_hidden);
        builder.follow_links(false);

        if self.respect_git_ignore {
            builder.git_ignore(true).git_exclude(true).git_global(true);
        } else {
            builder
                .git_ignore(false)
                .git_exclude(false)
                .git_global(false);
        }

        builder
    }

    /// List all files in the tree, sorted by path.
    pub fn list_files(&self) -> Result<Vec<PathBuf>> {
        let walker = self
            .make_builder()
            .filter_entry(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(|name| {
                        name != ".scour" && name != ".git" && name != ".hg" && name != ".svn"
                    })
                    .unwrap_or(true)
            })
            .build();

        let mut files = Vec::new();
        for entry in walker.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if !self.exclude_patterns.is_empty() {
                let path_str = path.to_string_lossy();
                if self
                    .exclude_patterns
                    .iter()
                    .any(|pattern| path_str.contains(pattern.as_str()))
                {
                    continue;
                }
            }
            files.push(path.to_path_buf());
        }

        files.sort();
        Ok(files)
    }
}

/// Detect language from file extension
pub fn detect_language(ext: &str) -> Option<&'static str> {
    match ext.to_lowercase().as_str() {
        "rs" => Some("rust"),
        "ts" | "tsx" => Some("typescript"),
        "js" | "jsx" | "mjs" => Some("javascript"),
        "py" | "pyi" => Some("python"),
        "go" => Some("go"),
        "java" => Some("java"),
        _ => None,
    }
}

/// Language for a path, by extension.
pub fn language_of(path: &Path) -> Option<&'static str> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(detect_language)
}
