// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query fan-out across indexes
//!
//! Runs each selected index concurrently behind its own error and timeout
//! boundary. One failing index never suppresses the others; configuration
//! errors stop the query before any work is scheduled.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::cache::FingerprintCache;
use crate::config::{EngineConfig, SearchConfig, DEFAULT_INDEX_TIMEOUT};
use crate::embedding::{CommandProvider, EmbeddingProvider};
use crate::errors::EngineError;
use crate::index::code::CodeIndex;
use crate::index::deps::DependencyIndex;
use crate::index::file::FileIndex;
use crate::index::log::LogIndex;
use crate::index::semantic::SemanticIndex;
use crate::index::IndexKind;
use crate::model::SearchResult;

/// Aggregated response of one `search_all` call: one result per selected
/// index, always present even when that index failed or timed out.
#[derive(Debug, serde::Serialize)]
pub struct AggregateResult {
    pub results: BTreeMap<IndexKind, SearchResult>,
    pub execution_time: Duration,
}

impl AggregateResult {
    pub fn total_matches(&self) -> usize {
        self.results.values().map(|r| r.matches.len()).sum()
    }

    /// All per-index errors, prefixed with the index name.
    pub fn errors(&self) -> Vec<String> {
        self.results
            .iter()
            .flat_map(|(kind, result)| {
                result.errors.iter().map(move |e| format!("{}: {}", kind, e))
            })
            .collect()
    }
}

/// Owns the shared cache handle and the embedding capability, and fans a
/// query out to the selected indexes.
pub struct Dispatcher {
    cache: Arc<FingerprintCache>,
    backend: Option<Arc<dyn EmbeddingProvider>>,
    backend_reason: String,
    index_timeout: Duration,
}

impl Dispatcher {
    pub fn new(cache: Arc<FingerprintCache>) -> Self {
        Self {
            cache,
            backend: None,
            backend_reason: "no embedding provider configured".into(),
            index_timeout: DEFAULT_INDEX_TIMEOUT,
        }
    }

    /// Open the per-project cache and apply engine defaults from
    /// .scourrc.toml (cache directory, embedding command).
    pub fn from_project(root: &std::path::Path) -> anyhow::Result<Self> {
        let engine_config = EngineConfig::load(root);
        let cache = match &engine_config.cache_dir {
            Some(dir) => FingerprintCache::open_at(&dir.join("cache.db"))?,
            None => FingerprintCache::open(root)?,
        };
        let mut dispatcher = Self::new(Arc::new(cache));
        if let Some(command) = &engine_config.embedding_command {
            dispatcher = dispatcher.with_embedding_command(command);
        }
        Ok(dispatcher)
    }

    pub fn with_embedding(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.backend = Some(provider);
        self
    }

    /// Resolve an external embedding command once, at construction. A
    /// missing command leaves SemanticIndex reporting the reason instead of
    /// failing the whole dispatcher.
    pub fn with_embedding_command(mut self, command: &str) -> Self {
        match CommandProvider::resolve(command) {
            Ok(provider) => self.backend = Some(Arc::new(provider)),
            Err(e) => {
                warn!("{}", e);
                self.backend_reason = e.to_string();
            }
        }
        self
    }

    pub fn with_index_timeout(mut self, timeout: Duration) -> Self {
        self.index_timeout = timeout;
        self
    }

    /// Fan `config` out to `selected` indexes. The only failing path is a
    /// configuration error; every index failure is absorbed into its own
    /// `SearchResult.errors`.
    pub fn search_all(
        &self,
        config: &SearchConfig,
        selected: &[IndexKind],
    ) -> Result<AggregateResult, EngineError> {
        let started = Instant::now();
        config.validate()?;

        let mut kinds: Vec<IndexKind> = selected.to_vec();
        kinds.sort_unstable();
        kinds.dedup();

        let (tx, rx) = mpsc::channel::<(IndexKind, SearchResult)>();
        for kind in &kinds {
            let kind = *kind;
            let tx = tx.clone();
            let cache = Arc::clone(&self.cache);
            let backend = self.backend.clone();
            let backend_reason = self.backend_reason.clone();
            let config = config.clone();
            std::thread::spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    run_index(kind, cache, backend, backend_reason, &config)
                }))
                .unwrap_or_else(|_| SearchResult::from_error("index worker panicked"));
                // The receiver may have given up on a slow index already.
                let _ = tx.send((kind, outcome));
            });
        }
        drop(tx);

        let deadline = started + self.index_timeout;
        let mut results: BTreeMap<IndexKind, SearchResult> = BTreeMap::new();
        while results.len() < kinds.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((kind, result)) => {
                    debug!(
                        "{} index returned {} matches",
                        kind,
                        result.matches.len()
                    );
                    results.insert(kind, result);
                }
                Err(_) => break,
            }
        }

        for kind in &kinds {
            results.entry(*kind).or_insert_with(|| {
                SearchResult::from_error(format!(
                    "timed out after {}s",
                    self.index_timeout.as_secs()
                ))
            });
        }

        // Uniform per-index cap, whatever the index itself did.
        for result in results.values_mut() {
            result.cap(config.max_results);
        }

        Ok(AggregateResult {
            results,
            execution_time: started.elapsed(),
        })
    }
}

fn run_index(
    kind: IndexKind,
    cache: Arc<FingerprintCache>,
    backend: Option<Arc<dyn EmbeddingProvider>>,
    backend_reason: String,
    config: &SearchConfig,
) -> SearchResult {
    let outcome = match kind {
        IndexKind::Code => CodeIndex::new(cache).search(config),
        IndexKind::File => FileIndex::new(cache).search(config),
        IndexKind::Dependency => DependencyIndex::new(cache).search(config),
        IndexKind::Log => LogIndex::new(cache).search(config),
        IndexKind::Semantic => match backend {
            Some(provider) => SemanticIndex::new(cache, Some(provider)).search(config),
            None => SemanticIndex::unavailable(cache, backend_reason).search(config),
        },
    };
    outcome.unwrap_or_else(|e| SearchResult::from_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(FingerprintCache::in_memory().unwrap()))
    }

    #[test]
    fn test_config_error_fails_fast() {
        let dir = TempDir::new().unwrap();
        let config = SearchConfig::new(dir.path(), "f(unclosed");
        let err = dispatcher()
            .search_all(&config, &[IndexKind::Code])
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidPattern { .. }));
    }

    #[test]
    fn test_partial_failure_keeps_sibling_results() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.py"), "def login():\n    pass\n").unwrap();

        let config = SearchConfig::new(dir.path(), "login");
        let aggregate = dispatcher()
            .search_all(
                &config,
                &[IndexKind::Code, IndexKind::File, IndexKind::Semantic],
            )
            .unwrap();

        assert_eq!(aggregate.results.len(), 3);
        assert!(!aggregate.results[&IndexKind::Code].matches.is_empty());
        assert!(!aggregate.results[&IndexKind::File].matches.is_empty());
        let semantic = &aggregate.results[&IndexKind::Semantic];
        assert!(semantic.matches.is_empty());
        assert!(semantic.errors[0].starts_with("embedding backend unavailable:"));
    }

    #[test]
    fn test_duplicate_selection_collapses() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "x\n").unwrap();
        let config = SearchConfig::new(dir.path(), "x");
        let aggregate = dispatcher()
            .search_all(&config, &[IndexKind::File, IndexKind::File])
            .unwrap();
        assert_eq!(aggregate.results.len(), 1);
    }

    #[test]
    fn test_uniform_cap_across_indexes() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("a.py"),
            "def a():\n    pass\n\ndef b():\n    pass\n\ndef c():\n    pass\n",
        )
        .unwrap();

        let mut config = SearchConfig::new(dir.path(), "");
        config.max_results = 2;
        let aggregate = dispatcher()
            .search_all(&config, &[IndexKind::Code, IndexKind::File])
            .unwrap();
        for result in aggregate.results.values() {
            assert!(result.matches.len() <= 2);
        }
    }

    #[test]
    fn test_aggregate_errors_are_prefixed() {
        let dir = TempDir::new().unwrap();
        let config = SearchConfig::new(dir.path(), "q");
        let aggregate = dispatcher()
            .search_all(&config, &[IndexKind::Semantic])
            .unwrap();
        let errors = aggregate.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("semantic:"));
    }
}
