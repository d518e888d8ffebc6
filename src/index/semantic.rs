// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding-based similarity search
//!
//! Chunks candidate files (by declaration for code, by paragraph for docs),
//! embeds each chunk and ranks by cosine similarity against the query.
//! Without a backend the index reports an explicit error instead of silently
//! degrading to keyword search.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::cache::FingerprintCache;
use crate::config::SearchConfig;
use crate::embedding::{cosine_similarity, tokenize, EmbeddingProvider};
use crate::index::{run_partitioned, FileOutcome, IndexKind, SearchIndex};
use crate::model::{Match, MatchKind, SearchResult};
use crate::parser::{DeclKind, OutlineParser};
use crate::scanner::{language_of, FileScanner};

const EMBED_CACHE_VERSION: &str = "v1";
const MAX_PARAGRAPH_LINES: usize = 40;

/// A chunk of a file pending scoring.
struct Chunk {
    start_line: usize,
    end_line: usize,
    name: Option<String>,
    text: String,
}

/// Cached per-chunk embedding; chunk text is re-derived from the file.
#[derive(Serialize, Deserialize)]
struct StoredVector {
    start_line: usize,
    vector: Vec<f32>,
}

pub struct SemanticIndex {
    cache: Arc<FingerprintCache>,
    backend: Option<Arc<dyn EmbeddingProvider>>,
    unavailable_reason: String,
}

impl SemanticIndex {
    pub fn new(cache: Arc<FingerprintCache>, backend: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        Self {
            cache,
            backend,
            unavailable_reason: "no embedding provider configured".into(),
        }
    }

    /// Backend resolution failed at startup; keep the reason for reporting.
    pub fn unavailable(cache: Arc<FingerprintCache>, reason: impl Into<String>) -> Self {
        Self {
            cache,
            backend: None,
            unavailable_reason: reason.into(),
        }
    }

    pub fn search(&self, config: &SearchConfig) -> Result<SearchResult> {
        let started = Instant::now();
        let Some(provider) = &self.backend else {
            return Ok(SearchResult::from_error(format!(
                "embedding backend unavailable: {}",
                self.unavailable_reason
            )));
        };
        let globs = config.compile_globs()?;

        let query_vector = match provider.embed(&[config.pattern.clone()]) {
            Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
            Ok(_) => {
                return Ok(SearchResult::from_error(
                    "embedding backend returned no query vector",
                ))
            }
            Err(e) => {
                return Ok(SearchResult::from_error(format!(
                    "embedding backend unavailable: {}",
                    e
                )))
            }
        };
        let query_terms = tokenize(&config.pattern);

        let files: Vec<_> = FileScanner::with_excludes(&config.root, config.exclude.clone())
            .with_hidden(config.include_hidden)
            .list_files()?
            .into_iter()
            .filter(|path| {
                let relative = path.strip_prefix(&config.root).unwrap_or(path);
                globs.allows(relative)
            })
            .collect();

        let outcome = run_partitioned(&files, config, OutlineParser::new, |parser, path| {
            self.scan_file(parser, path, config, provider.as_ref(), &query_vector, &query_terms)
        });

        let mut result = SearchResult {
            matches: outcome.matches,
            errors: outcome.errors,
            ..Default::default()
        };
        // Similarity descending; canonical path order breaks ties.
        result.matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.file.cmp(&b.file))
                .then(a.line.cmp(&b.line))
        });
        result.cap(config.max_results);
        result.execution_time = started.elapsed();
        Ok(result)
    }

    fn scan_file(
        &self,
        parser: &mut OutlineParser,
        path: &Path,
        config: &SearchConfig,
        provider: &dyn EmbeddingProvider,
        query_vector: &[f32],
        query_terms: &[String],
    ) -> FileOutcome {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                return FileOutcome::default()
            }
            Err(e) => {
                return FileOutcome {
                    matches: Vec::new(),
                    error: Some(format!("{}: {}", path.display(), e)),
                }
            }
        };

        let chunks = chunk_file(parser, path, &content);
        if chunks.is_empty() {
            return FileOutcome::default();
        }

        let vectors = match self.vectors_for(path, config, provider, &chunks) {
            Ok(vectors) => vectors,
            Err(e) => {
                return FileOutcome {
                    matches: Vec::new(),
                    error: Some(format!("{}: {}", path.display(), e)),
                }
            }
        };

        let mut matches = Vec::new();
        for (chunk, vector) in chunks.iter().zip(&vectors) {
            let similarity = cosine_similarity(query_vector, vector);
            if similarity < config.similarity_threshold {
                continue;
            }
            let snippet = chunk
                .text
                .lines()
                .find(|l| !l.trim().is_empty())
                .unwrap_or_default()
                .trim_end()
                .to_string();
            let mut m = Match::new(path, chunk.start_line, MatchKind::Semantic, snippet);
            m.name = chunk.name.clone();
            m.score = Some(similarity);
            m.metadata
                .insert("end_line".into(), chunk.end_line.to_string());
            if config.explain_results {
                let chunk_terms = tokenize(&chunk.text);
                let mut shared: Vec<&str> = query_terms
                    .iter()
                    .filter(|t| chunk_terms.contains(*t))
                    .map(String::as_str)
                    .collect();
                shared.dedup();
                m.metadata
                    .insert("matched_terms".into(), shared.join(","));
            }
            matches.push(m);
        }
        FileOutcome {
            matches,
            error: None,
        }
    }

    /// Chunk vectors, through the fingerprint cache when enabled.
    fn vectors_for(
        &self,
        path: &Path,
        config: &SearchConfig,
        provider: &dyn EmbeddingProvider,
        chunks: &[Chunk],
    ) -> Result<Vec<Vec<f32>>> {
        let key = format!(
            "embed:{}:{}:{}",
            EMBED_CACHE_VERSION,
            provider.id(),
            path.display()
        );
        if config.cache_enabled {
            if let Some(stored) = self.cache.get_json::<Vec<StoredVector>>(&key) {
                if stored.len() == chunks.len()
                    && stored
                        .iter()
                        .zip(chunks)
                        .all(|(s, c)| s.start_line == c.start_line)
                {
                    return Ok(stored.into_iter().map(|s| s.vector).collect());
                }
            }
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = provider.embed(&texts)?;
        if config.cache_enabled && vectors.len() == chunks.len() {
            let stored: Vec<StoredVector> = chunks
                .iter()
                .zip(&vectors)
                .map(|(c, v)| StoredVector {
                    start_line: c.start_line,
                    vector: v.clone(),
                })
                .collect();
            self.cache.set_json(&key, &stored, &[path]);
        }
        Ok(vectors)
    }
}

impl SearchIndex for SemanticIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Semantic
    }

    fn search(&self, config: &SearchConfig) -> Result<SearchResult> {
        SemanticIndex::search(self, config)
    }
}

/// Declarations for parseable code, blank-line paragraphs otherwise.
fn chunk_file(parser: &mut OutlineParser, path: &Path, content: &str) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    if let Some(language) = language_of(path) {
        if let Ok(declarations) = parser.outline(content, language) {
            let chunks: Vec<Chunk> = declarations
                .iter()
                .filter(|d| matches!(d.kind, DeclKind::Function | DeclKind::Class))
                .map(|d| {
                    let start = d.line.saturating_sub(1);
                    let end = d.end_line.min(lines.len());
                    Chunk {
                        start_line: d.line,
                        end_line: d.end_line,
                        name: Some(d.name.clone()),
                        text: lines[start..end].join("\n"),
                    }
                })
                .collect();
            if !chunks.is_empty() {
                return chunks;
            }
        }
    }

    paragraph_chunks(&lines)
}

fn paragraph_chunks(lines: &[&str]) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut start = None;
    for (index, line) in lines.iter().enumerate() {
        let blank = line.trim().is_empty();
        match (start, blank) {
            (None, false) => start = Some(index),
            (Some(s), true) => {
                chunks.push(make_paragraph(lines, s, index));
                start = None;
            }
            (Some(s), false) if index - s + 1 >= MAX_PARAGRAPH_LINES => {
                chunks.push(make_paragraph(lines, s, index + 1));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        chunks.push(make_paragraph(lines, s, lines.len()));
    }
    chunks
}

fn make_paragraph(lines: &[&str], start: usize, end: usize) -> Chunk {
    Chunk {
        start_line: start + 1,
        end_line: end,
        name: None,
        text: lines[start..end].join("\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashProvider;
    use std::fs;
    use tempfile::TempDir;

    fn write_file(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn with_backend() -> SemanticIndex {
        SemanticIndex::new(
            Arc::new(FingerprintCache::in_memory().unwrap()),
            Some(Arc::new(HashProvider::default())),
        )
    }

    #[test]
    fn test_missing_backend_reports_explicit_error() {
        let dir = TempDir::new().unwrap();
        let index = SemanticIndex::new(Arc::new(FingerprintCache::in_memory().unwrap()), None);
        let config = SearchConfig::new(dir.path(), "auth flow");
        let result = index.search(&config).unwrap();
        assert!(result.matches.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("embedding backend unavailable:"));
    }

    #[test]
    fn test_unavailable_reason_is_preserved() {
        let dir = TempDir::new().unwrap();
        let index = SemanticIndex::unavailable(
            Arc::new(FingerprintCache::in_memory().unwrap()),
            "command 'embedder' not found",
        );
        let config = SearchConfig::new(dir.path(), "query");
        let result = index.search(&config).unwrap();
        assert!(result.errors[0].contains("embedder"));
    }

    #[test]
    fn test_ranks_related_chunk_first() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "auth.py",
            "def login_user(user, password):\n    return check_password(user, password)\n\ndef render_chart(data):\n    return draw(data)\n",
        );

        let mut config = SearchConfig::new(dir.path(), "user login password check");
        config.similarity_threshold = 0.0;
        config.explain_results = true;
        let result = with_backend().search(&config).unwrap();
        assert!(!result.matches.is_empty());
        assert_eq!(result.matches[0].name.as_deref(), Some("login_user"));
        assert!(result.matches[0]
            .metadata
            .get("matched_terms")
            .unwrap()
            .contains("login"));
        // Descending similarity.
        for pair in result.matches.windows(2) {
            assert!(pair[0].score.unwrap() >= pair[1].score.unwrap());
        }
    }

    #[test]
    fn test_threshold_filters_unrelated_chunks() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "misc.md",
            "completely unrelated prose about cooking pasta\n\nlogin password authentication notes\n",
        );

        let mut config = SearchConfig::new(dir.path(), "login password authentication");
        config.similarity_threshold = 0.9;
        let result = with_backend().search(&config).unwrap();
        assert!(result
            .matches
            .iter()
            .all(|m| m.score.unwrap() >= config.similarity_threshold));
    }

    #[test]
    fn test_paragraph_chunking_lines() {
        let lines: Vec<&str> = "one\ntwo\n\nthree\n".lines().collect();
        let chunks = paragraph_chunks(&lines);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 2);
        assert_eq!(chunks[1].start_line, 4);
    }

    #[test]
    fn test_embeddings_cached_per_file() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "doc.md", "alpha beta gamma\n");
        let cache = Arc::new(FingerprintCache::in_memory().unwrap());
        let index = SemanticIndex::new(Arc::clone(&cache), Some(Arc::new(HashProvider::default())));

        let mut config = SearchConfig::new(dir.path(), "alpha");
        config.similarity_threshold = 0.0;
        index.search(&config).unwrap();
        assert!(!cache.is_empty());
    }
}
