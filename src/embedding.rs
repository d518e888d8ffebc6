// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding backends for SemanticIndex
//!
//! The backend is resolved once at dispatcher construction; SemanticIndex
//! checks the capability explicitly instead of catching failures per call.

use anyhow::{Context, Result};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

use crate::config::DEFAULT_INDEX_TIMEOUT;
use crate::errors::EngineError;

pub const DEFAULT_EMBEDDING_DIM: usize = 256;

/// A backend that turns texts into fixed-dimension vectors.
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier, part of embedding cache keys.
    fn id(&self) -> &str;

    /// Embed a batch of texts; one vector per input, in order.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// External embedding command. Receives a JSON array of strings on stdin and
/// must print a JSON array of f32 arrays on stdout. Calls are bounded by a
/// hard deadline and the process is killed on expiry.
pub struct CommandProvider {
    program: PathBuf,
    id: String,
    timeout: Duration,
}

impl CommandProvider {
    /// Resolve `command` on PATH. Absence surfaces as the structured
    /// backend-unavailable error, detected at startup rather than per call.
    pub fn resolve(command: &str) -> Result<Self, EngineError> {
        let program = which::which(command).map_err(|e| {
            EngineError::EmbeddingUnavailable(format!("command '{}' not found: {}", command, e))
        })?;
        Ok(Self {
            program,
            id: format!("cmd:{}", command),
            timeout: DEFAULT_INDEX_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl EmbeddingProvider for CommandProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let payload = serde_json::to_vec(texts)?;

        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program.display()))?;

        {
            let mut stdin = child
                .stdin
                .take()
                .context("embedding command has no stdin")?;
            stdin.write_all(&payload)?;
        }

        let mut stdout = child
            .stdout
            .take()
            .context("embedding command has no stdout")?;
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut output = String::new();
            let read = stdout.read_to_string(&mut output).map(|_| output);
            let _ = tx.send(read);
        });

        let output = match rx.recv_timeout(self.timeout) {
            Ok(read) => {
                child.wait()?;
                read.context("failed to read embedding command output")?
            }
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                anyhow::bail!(
                    "embedding command timed out after {}s",
                    self.timeout.as_secs()
                );
            }
        };

        let vectors: Vec<Vec<f32>> =
            serde_json::from_str(&output).context("embedding command emitted invalid JSON")?;
        if vectors.len() != texts.len() {
            anyhow::bail!(
                "embedding command returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            );
        }
        Ok(vectors)
    }
}

/// Deterministic token-hash embedder. Stands in for a model in tests and
/// offline runs; selected explicitly, never a silent fallback.
pub struct HashProvider {
    dim: usize,
}

impl Default for HashProvider {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIM)
    }
}

impl HashProvider {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }
}

impl EmbeddingProvider for HashProvider {
    fn id(&self) -> &str {
        "hash"
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0f32; self.dim];
                for token in tokenize(text) {
                    let digest = blake3::hash(token.as_bytes());
                    let bytes = digest.as_bytes();
                    let index = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
                        as usize
                        % self.dim;
                    let sign = if bytes[4] & 1 == 0 { 1.0 } else { -1.0 };
                    vector[index] += sign;
                }
                normalize(&mut vector);
                vector
            })
            .collect())
    }
}

/// Lowercased alphanumeric tokens, also used for explain output.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() > 1)
        .map(|t| t.to_ascii_lowercase())
        .collect()
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
