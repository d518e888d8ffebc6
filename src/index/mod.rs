// SPDX-License-Identifier: MIT OR Apache-2.0

//! Index implementations behind one shared search interface

pub mod code;
pub mod deps;
pub mod file;
pub mod log;
pub mod semantic;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::SearchConfig;
use crate::model::{Match, SearchResult};

/// Closed set of index kinds the dispatcher fans out to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Code,
    File,
    Dependency,
    Log,
    Semantic,
}

impl IndexKind {
    pub const ALL: [IndexKind; 5] = [
        IndexKind::Code,
        IndexKind::File,
        IndexKind::Dependency,
        IndexKind::Log,
        IndexKind::Semantic,
    ];
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexKind::Code => write!(f, "code"),
            IndexKind::File => write!(f, "file"),
            IndexKind::Dependency => write!(f, "dependency"),
            IndexKind::Log => write!(f, "log"),
            IndexKind::Semantic => write!(f, "semantic"),
        }
    }
}

/// One shared search interface over every index.
pub trait SearchIndex {
    fn kind(&self) -> IndexKind;
    fn search(&self, config: &SearchConfig) -> Result<SearchResult>;
}

/// Per-file scan output.
#[derive(Default)]
pub(crate) struct FileOutcome {
    pub matches: Vec<Match>,
    pub error: Option<String>,
}

pub(crate) struct PartitionOutcome {
    pub matches: Vec<Match>,
    pub errors: Vec<String>,
}

/// Run `per_file` over the sorted candidate list, sequentially or across a
/// bounded rayon pool. Once more than `cap` matches are collected, no further
/// files are scheduled (in-flight files finish). `init` builds per-worker
/// state such as a parser, merged output stays in input order.
pub(crate) fn run_partitioned<S, I, F>(
    files: &[PathBuf],
    config: &SearchConfig,
    init: I,
    per_file: F,
) -> PartitionOutcome
where
    S: Send,
    I: Fn() -> S + Send + Sync,
    F: Fn(&mut S, &Path) -> FileOutcome + Send + Sync,
{
    let cap = config.max_results;
    let found = AtomicUsize::new(0);

    let outcomes: Vec<FileOutcome> = if config.parallel {
        use rayon::prelude::*;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.thread_count())
            .build();
        match pool {
            Ok(pool) => pool.install(|| {
                files
                    .par_iter()
                    .map_init(&init, |state, path| {
                        if found.load(Ordering::Relaxed) > cap {
                            return FileOutcome::default();
                        }
                        let outcome = per_file(state, path);
                        found.fetch_add(outcome.matches.len(), Ordering::Relaxed);
                        outcome
                    })
                    .collect()
            }),
            Err(e) => {
                tracing::warn!("worker pool unavailable ({}); scanning sequentially", e);
                run_sequential(files, cap, &init, &per_file)
            }
        }
    } else {
        run_sequential(files, cap, &init, &per_file)
    };

    let mut matches = Vec::new();
    let mut errors = Vec::new();
    for outcome in outcomes {
        matches.extend(outcome.matches);
        errors.extend(outcome.error);
    }
    PartitionOutcome { matches, errors }
}

fn run_sequential<S, I, F>(files: &[PathBuf], cap: usize, init: &I, per_file: &F) -> Vec<FileOutcome>
where
    I: Fn() -> S,
    F: Fn(&mut S, &Path) -> FileOutcome,
{
    let mut state = init();
    let mut outcomes = Vec::new();
    let mut found = 0usize;
    for path in files {
        if found > cap {
            break;
        }
        let outcome = per_file(&mut state, path);
        found += outcome.matches.len();
        outcomes.push(outcome);
    }
    outcomes
}
