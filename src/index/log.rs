// SPDX-License-Identifier: MIT OR Apache-2.0

//! Structured log search
//!
//! Parses tokenized log lines (ISO-8601 timestamp, level, logger, message)
//! from named sources. Lines that fail to parse continue the previous
//! record's message, never error. Results keep chronological order within a
//! source.

use anyhow::Result;
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::cache::FingerprintCache;
use crate::config::SearchConfig;
use crate::index::{IndexKind, SearchIndex};
use crate::model::{LogLevel, Match, MatchKind, SearchResult};

const LOG_CACHE_VERSION: &str = "v1";

/// `2024-01-15T10:30:00[.123][Z|+02:00] [LEVEL] logger[:] message`
static LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<ts>\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d{1,9})?)(?:Z|[+-]\d{2}:?\d{2})?\s+\[?(?P<level>[A-Za-z]+)\]?\s+(?P<logger>[\w.:/\-]+?)\s*[:\-]?\s+(?P<msg>.*)$",
    )
    .expect("log line regex")
});

/// One parsed (possibly multi-line) log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogRecord {
    timestamp: NaiveDateTime,
    level: LogLevel,
    logger: String,
    message: String,
    line: usize,
}

pub struct LogIndex {
    cache: Arc<FingerprintCache>,
}

impl LogIndex {
    pub fn new(cache: Arc<FingerprintCache>) -> Self {
        Self { cache }
    }

    /// Parsed records for one source, through the fingerprint cache.
    fn records_for(&self, path: &Path, content: &str, cache_enabled: bool) -> Vec<LogRecord> {
        let key = format!("log:{}:{}", LOG_CACHE_VERSION, path.display());
        if cache_enabled {
            if let Some(records) = self.cache.get_json::<Vec<LogRecord>>(&key) {
                return records;
            }
        }
        let records = parse_records(content);
        if cache_enabled {
            self.cache.set_json(&key, &records, &[path]);
        }
        records
    }

    pub fn search(&self, config: &SearchConfig) -> Result<SearchResult> {
        let started = Instant::now();
        let pattern = config.compile_pattern()?;

        let mut matches = Vec::new();
        let mut errors = Vec::new();

        for source in &config.log_sources {
            if let Some(filter) = &config.log_source_filter {
                if &source.name != filter {
                    continue;
                }
            }
            let content = match std::fs::read_to_string(&source.path) {
                Ok(content) => content,
                Err(e) => {
                    errors.push(format!("{}: {}", source.path.display(), e));
                    continue;
                }
            };

            for record in self.records_for(&source.path, &content, config.cache_enabled) {
                if !passes_filters(&record, config) {
                    continue;
                }
                if !config.pattern.is_empty() && !pattern.is_match(&record.message) {
                    continue;
                }
                matches.push(record_match(&record, &source.name, &source.path));
            }
        }

        let mut result = SearchResult {
            matches,
            errors,
            ..Default::default()
        };
        result.cap(config.max_results);
        result.execution_time = started.elapsed();
        Ok(result)
    }
}

impl SearchIndex for LogIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Log
    }

    fn search(&self, config: &SearchConfig) -> Result<SearchResult> {
        LogIndex::search(self, config)
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let normalized = raw.replace(',', ".").replace(' ', "T");
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(&normalized, format) {
            return Some(ts);
        }
    }
    None
}

fn parse_records(content: &str) -> Vec<LogRecord> {
    let mut records: Vec<LogRecord> = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let parsed = LINE_RE.captures(line).and_then(|caps| {
            let timestamp = parse_timestamp(caps.name("ts")?.as_str())?;
            let level: LogLevel = caps.name("level")?.as_str().parse().ok()?;
            Some(LogRecord {
                timestamp,
                level,
                logger: caps.name("logger")?.as_str().to_string(),
                message: caps.name("msg")?.as_str().to_string(),
                line: index + 1,
            })
        });
        match parsed {
            Some(record) => records.push(record),
            // Continuation of a multi-line entry (tracebacks and the like).
            None => {
                if let Some(last) = records.last_mut() {
                    last.message.push('\n');
                    last.message.push_str(line);
                }
            }
        }
    }
    records
}

fn passes_filters(record: &LogRecord, config: &SearchConfig) -> bool {
    if let Some(min) = config.min_level {
        if record.level < min {
            return false;
        }
    }
    if let Some(since) = config.since {
        if record.timestamp < since {
            return false;
        }
    }
    if let Some(until) = config.until {
        if record.timestamp > until {
            return false;
        }
    }
    if let Some(correlation) = &config.correlation_id {
        if !record.message.contains(correlation.as_str()) {
            return false;
        }
    }
    true
}

fn record_match(record: &LogRecord, source_name: &str, path: &Path) -> Match {
    let mut m = Match::new(path, record.line, MatchKind::Log, record.message.clone());
    m.name = Some(record.logger.clone());
    m.metadata.insert("level".into(), record.level.to_string());
    m.metadata.insert("source".into(), source_name.to_string());
    m.metadata.insert(
        "timestamp".into(),
        record.timestamp.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
    );
    m
}
