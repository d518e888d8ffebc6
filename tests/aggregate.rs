// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use scour::embedding::HashProvider;
use scour::model::LogSource;
use scour::{Dispatcher, FingerprintCache, IndexKind, LogLevel, SearchConfig};

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, content).expect("write file");
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn write_fixture(root: &Path) {
    write_file(
        &root.join("auth.py"),
        "def login(user, pw):\n    if user and pw:\n        return True\n    return False\n",
    );
    write_file(&root.join("README.md"), "login handling notes\n");
    write_file(
        &root.join("server.log"),
        "2024-06-01T09:00:00 INFO web.auth login ok user=1\n\
         2024-06-01T09:00:02 ERROR web.auth login failed user=2\n",
    );
}

#[test]
fn aggregate_partial_failure_without_embedding_backend() {
    init_tracing();
    let dir = TempDir::new().expect("tempdir");
    write_fixture(dir.path());

    let engine = Dispatcher::new(Arc::new(FingerprintCache::in_memory().expect("cache")));
    let config = SearchConfig::new(dir.path(), "login");

    let aggregate = engine
        .search_all(
            &config,
            &[IndexKind::Code, IndexKind::File, IndexKind::Semantic],
        )
        .expect("no exception reaches the caller");

    assert!(!aggregate.results[&IndexKind::Code].matches.is_empty());
    assert!(!aggregate.results[&IndexKind::File].matches.is_empty());
    let semantic = &aggregate.results[&IndexKind::Semantic];
    assert!(semantic.matches.is_empty());
    assert!(!semantic.errors.is_empty());
}

#[test]
fn full_fan_out_with_backend_and_logs() {
    let dir = TempDir::new().expect("tempdir");
    write_fixture(dir.path());

    let engine = Dispatcher::new(Arc::new(FingerprintCache::in_memory().expect("cache")))
        .with_embedding(Arc::new(HashProvider::default()));

    let mut config = SearchConfig::new(dir.path(), "login");
    config.exclude = vec!["server.log".into()];
    config.log_sources = vec![LogSource::new("server", dir.path().join("server.log"))];
    config.min_level = Some(LogLevel::Error);
    config.similarity_threshold = 0.0;

    let aggregate = engine
        .search_all(&config, &IndexKind::ALL)
        .expect("fan-out");

    assert_eq!(aggregate.results.len(), IndexKind::ALL.len());
    let log = &aggregate.results[&IndexKind::Log];
    assert_eq!(log.matches.len(), 1);
    assert_eq!(
        log.matches[0].metadata.get("level").map(String::as_str),
        Some("error")
    );
    assert!(!aggregate.results[&IndexKind::Semantic].matches.is_empty());
    assert!(aggregate.total_matches() >= 3);
}

#[test]
fn missing_root_rejected_before_any_work() {
    let engine = Dispatcher::new(Arc::new(FingerprintCache::in_memory().expect("cache")));
    let config = SearchConfig::new("/definitely/not/a/root", "x");
    assert!(engine.search_all(&config, &IndexKind::ALL).is_err());
}
