// SPDX-License-Identifier: MIT OR Apache-2.0

//! File filters: glob sets, extension classes, size/mtime windows, binary
//! detection and context-line extraction.

use chrono::NaiveDateTime;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::io::Read;
use std::path::Path;

use crate::errors::EngineError;

/// Compiled include/exclude glob sets. Empty include means "everything".
#[derive(Debug)]
pub struct CompiledGlobs {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl CompiledGlobs {
    pub fn compile(include: &[String], exclude: &[String]) -> Result<Self, EngineError> {
        Ok(Self {
            include: Self::build(include)?,
            exclude: Self::build(exclude)?,
        })
    }

    fn build(patterns: &[String]) -> Result<Option<GlobSet>, EngineError> {
        if patterns.is_empty() {
            return Ok(None);
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| EngineError::InvalidGlob {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            builder.add(glob);
        }
        builder
            .build()
            .map(Some)
            .map_err(|e| EngineError::InvalidGlob {
                pattern: patterns.join(","),
                reason: e.to_string(),
            })
    }

    /// Match against the path relative to the search root.
    pub fn allows(&self, relative: &Path) -> bool {
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(relative) {
                return false;
            }
        }
        match &self.include {
            Some(include) => include.is_match(relative),
            None => true,
        }
    }
}

/// Coarse file classes used by FileIndex filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileTypeClass {
    Source,
    Doc,
    Config,
    Binary,
    Other,
}

const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "mjs", "py", "pyi", "go", "java", "c", "cpp", "h", "hpp",
    "cs", "rb", "php", "swift", "kt", "scala", "lua", "sh",
];
const DOC_EXTENSIONS: &[&str] = &["md", "txt", "rst", "adoc", "org"];
const CONFIG_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "json", "ini", "cfg", "env", "lock"];
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "pdf", "zip", "gz", "tar", "exe", "dll", "so", "dylib",
    "o", "a", "bin", "woff", "woff2", "class", "pyc", "db",
];

/// Classify a path by its extension table.
pub fn classify(path: &Path) -> FileTypeClass {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return FileTypeClass::Other;
    };
    let lower = ext.to_ascii_lowercase();
    let ext = lower.as_str();
    if SOURCE_EXTENSIONS.contains(&ext) {
        FileTypeClass::Source
    } else if DOC_EXTENSIONS.contains(&ext) {
        FileTypeClass::Doc
    } else if CONFIG_EXTENSIONS.contains(&ext) {
        FileTypeClass::Config
    } else if BINARY_EXTENSIONS.contains(&ext) {
        FileTypeClass::Binary
    } else {
        FileTypeClass::Other
    }
}

/// Sniff the leading chunk: a failed UTF-8 decode marks the file binary.
pub fn is_probably_binary(path: &Path) -> bool {
    let Ok(mut file) = std::fs::File::open(path) else {
        return false;
    };
    let mut buffer = [0u8; 1024];
    let Ok(read) = file.read(&mut buffer) else {
        return false;
    };
    let chunk = &buffer[..read];
    if chunk.contains(&0) {
        return true;
    }
    match std::str::from_utf8(chunk) {
        Ok(_) => false,
        // A multi-byte sequence cut at the chunk boundary is not binary.
        Err(e) => read - e.valid_up_to() > 3,
    }
}

pub fn passes_size(meta: &Metadata, ceiling: Option<u64>) -> bool {
    ceiling.map_or(true, |max| meta.len() <= max)
}

/// Modified-time window check against naive UTC timestamps.
pub fn passes_mtime_window(
    meta: &Metadata,
    after: Option<NaiveDateTime>,
    before: Option<NaiveDateTime>,
) -> bool {
    if after.is_none() && before.is_none() {
        return true;
    }
    let Ok(modified) = meta.modified() else {
        return false;
    };
    let Ok(since_epoch) = modified.duration_since(std::time::UNIX_EPOCH) else {
        return false;
    };
    let Some(mtime) = chrono::DateTime::from_timestamp(
        since_epoch.as_secs() as i64,
        since_epoch.subsec_nanos(),
    ) else {
        return false;
    };
    let mtime = mtime.naive_utc();
    after.map_or(true, |a| mtime >= a) && before.map_or(true, |b| mtime <= b)
}

/// Dotfile or inside a dot-directory, relative to the root.
pub fn is_hidden(relative: &Path) -> bool {
    relative.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| s.starts_with('.') && s.len() > 1)
            .unwrap_or(false)
    })
}

/// Context slices around `index`, clamped at file boundaries: each slice
/// holds at most `count` lines and never errors on short files.
pub fn context_slices(lines: &[&str], index: usize, count: usize) -> (Vec<String>, Vec<String>) {
    if count == 0 {
        return (Vec::new(), Vec::new());
    }
    let start = index.saturating_sub(count);
    let before = lines[start..index].iter().map(|s| s.to_string()).collect();
    let end = (index + 1 + count).min(lines.len());
    let after = lines[index + 1..end].iter().map(|s| s.to_string()).collect();
    (before, after)
}
