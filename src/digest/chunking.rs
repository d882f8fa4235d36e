//! Greedy, order-preserving packing of clusters into token-bounded chunks.

use crate::digest::links::LinkProcessor;
use crate::digest::relationship::Cluster;
use crate::error::DigestError;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::warn;

const CLUSTER_SEPARATOR: &str = "---\n";

/// Token count estimate. Must be monotone in text length.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// `ceil(bytes / bytes_per_token)`.
#[derive(Debug, Clone, Copy)]
pub struct ByteRatioEstimator {
    pub bytes_per_token: f64,
}

impl ByteRatioEstimator {
    pub fn new(bytes_per_token: f64) -> Self {
        Self { bytes_per_token }
    }
}

impl TokenEstimator for ByteRatioEstimator {
    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        (text.len() as f64 / self.bytes_per_token).ceil() as usize
    }
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    pub clusters: Vec<Cluster>,
    pub estimated_tokens: usize,
    pub oversized: bool,
}

impl Chunk {
    pub fn message_ids(&self) -> HashSet<&str> {
        self.clusters.iter().flat_map(Cluster::message_ids).collect()
    }

    pub fn message_count(&self) -> usize {
        self.clusters.iter().map(Cluster::len).sum()
    }

    pub fn render(&self, links: &LinkProcessor) -> String {
        self.clusters
            .iter()
            .map(|c| c.render(links))
            .collect::<Vec<_>>()
            .join(CLUSTER_SEPARATOR)
    }

    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.clusters.iter().map(|c| c.start).min()?;
        let end = self.clusters.iter().map(|c| c.end).max()?;
        Some((start, end))
    }
}

/// Result of a packing pass; `overflows` lists every oversized placement.
#[derive(Debug, Default)]
pub struct PackedChunks {
    pub chunks: Vec<Chunk>,
    pub overflows: Vec<DigestError>,
}

impl PackedChunks {
    fn close(&mut self, clusters: Vec<Cluster>, estimated_tokens: usize, oversized: bool) {
        let index = self.chunks.len();
        self.chunks.push(Chunk {
            index,
            clusters,
            estimated_tokens,
            oversized,
        });
    }
}

pub struct ChunkOptimizer<'a> {
    links: &'a LinkProcessor,
    reserved_tokens: usize,
}

impl<'a> ChunkOptimizer<'a> {
    pub fn new(links: &'a LinkProcessor) -> Self {
        Self {
            links,
            reserved_tokens: 0,
        }
    }

    /// Tokens held back from every chunk for the fixed prompt around it.
    pub fn with_reserved_tokens(mut self, reserved_tokens: usize) -> Self {
        self.reserved_tokens = reserved_tokens;
        self
    }

    /// A chunk's estimate covers its rendered text, separators included, plus
    /// the reserved prompt overhead.
    pub fn pack(
        &self,
        clusters: Vec<Cluster>,
        max_tokens_per_chunk: usize,
        estimator: &dyn TokenEstimator,
    ) -> Result<PackedChunks, DigestError> {
        if max_tokens_per_chunk == 0 {
            return Err(DigestError::InvalidConfig(
                "max_tokens_per_chunk must be >= 1".to_string(),
            ));
        }
        if self.reserved_tokens >= max_tokens_per_chunk {
            return Err(DigestError::InvalidConfig(format!(
                "reserved prompt tokens {} leave no room in chunk budget {max_tokens_per_chunk}",
                self.reserved_tokens
            )));
        }

        let mut out = PackedChunks::default();
        let mut current: Vec<Cluster> = Vec::new();
        let mut current_text = String::new();
        let mut current_tokens = 0usize;

        for cluster in clusters {
            let rendered = cluster.render(self.links);
            let alone = self.reserved_tokens + estimator.estimate(&rendered);

            if alone > max_tokens_per_chunk {
                if !current.is_empty() {
                    out.close(std::mem::take(&mut current), current_tokens, false);
                    current_text.clear();
                }
                let overflow = DigestError::ClusterOverflow {
                    cluster: cluster.id,
                    estimated: alone,
                    budget: max_tokens_per_chunk,
                };
                warn!(chunk = out.chunks.len(), "{overflow}");
                out.overflows.push(overflow);
                out.close(vec![cluster], alone, true);
                continue;
            }

            let mut candidate = current_text.clone();
            if !current.is_empty() {
                candidate.push_str(CLUSTER_SEPARATOR);
            }
            candidate.push_str(&rendered);
            let combined = self.reserved_tokens + estimator.estimate(&candidate);

            if !current.is_empty() && combined > max_tokens_per_chunk {
                out.close(std::mem::take(&mut current), current_tokens, false);
                current_text = rendered;
                current_tokens = alone;
            } else {
                current_text = candidate;
                current_tokens = combined;
            }
            current.push(cluster);
        }

        if !current.is_empty() {
            out.close(current, current_tokens, false);
        }
        Ok(out)
    }
}
