//! Wires the stages together: cluster, pack, generate, parse, validate, finalize.

use crate::digest::bullets::BulletProcessor;
use crate::digest::chunk_processor::{ChunkOutcome, ChunkProcessor};
use crate::digest::chunking::{ChunkOptimizer, PackedChunks, TokenEstimator};
use crate::digest::config::{self, DigestConfig};
use crate::digest::diagnostics::{DiagnosticsReport, FailedChunk, OversizedChunk, RejectedEntry};
use crate::digest::finalizer::{CoverageWindow, Summary, SummaryFinalizer};
use crate::digest::links::LinkProcessor;
use crate::digest::message::Message;
use crate::digest::provider::Generator;
use crate::digest::relationship::RelationshipAnalyzer;
use crate::digest::retry::CancelToken;
use crate::digest::validator::BulletValidator;
use crate::error::DigestError;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct DigestOutcome {
    pub summary: Summary,
    pub diagnostics: DiagnosticsReport,
}

pub struct DigestPipeline {
    config: DigestConfig,
    generator: Arc<dyn Generator>,
    estimator: Box<dyn TokenEstimator>,
    generated_at: Option<DateTime<Utc>>,
}

fn coverage_of(messages: &[Message]) -> Option<CoverageWindow> {
    let start = messages.iter().map(|m| m.timestamp).min()?;
    let end = messages.iter().map(|m| m.timestamp).max()?;
    Some(CoverageWindow { start, end })
}

fn check_unique_ids(messages: &[Message]) -> Result<(), DigestError> {
    let mut seen = HashSet::with_capacity(messages.len());
    for message in messages {
        if !seen.insert(message.id.as_str()) {
            return Err(DigestError::DuplicateMessageId(message.id.clone()));
        }
    }
    Ok(())
}

impl DigestPipeline {
    /// Rejects an invalid configuration before anything else can run.
    pub fn new(
        config: DigestConfig,
        generator: Arc<dyn Generator>,
        estimator: Box<dyn TokenEstimator>,
    ) -> Result<Self, DigestError> {
        config::validate(&config)?;
        Ok(Self {
            config,
            generator,
            estimator,
            generated_at: None,
        })
    }

    pub fn generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = Some(at);
        self
    }

    pub fn run(&self, messages: Vec<Message>, cancel: &CancelToken) -> Result<DigestOutcome> {
        check_unique_ids(&messages)?;

        let cfg = &self.config;
        let links = LinkProcessor::new(&cfg.links.base_url);
        let mut diag = DiagnosticsReport {
            generator: self.generator.label(),
            input_fingerprint: DiagnosticsReport::fingerprint(&messages),
            messages: messages.len(),
            ..DiagnosticsReport::default()
        };
        let coverage = coverage_of(&messages);

        let clusters = RelationshipAnalyzer::new(cfg.clustering.clone()).cluster(messages);
        diag.clusters = clusters.len();
        diag.forward_references = clusters.iter().map(|c| c.forward_refs.len()).sum();

        let packed = ChunkOptimizer::new(&links)
            .with_reserved_tokens(cfg.chunking.reserved_prompt_tokens)
            .pack(
            clusters,
            cfg.chunking.max_tokens_per_chunk,
            self.estimator.as_ref(),
        )?;
        let PackedChunks { chunks, overflows } = packed;
        diag.chunks = chunks.len();
        // one overflow per oversized chunk, in chunk order
        diag.oversized_chunks = chunks
            .iter()
            .filter(|c| c.oversized)
            .zip(overflows)
            .map(|(c, overflow)| OversizedChunk {
                chunk: c.index,
                estimated_tokens: c.estimated_tokens,
                budget: cfg.chunking.max_tokens_per_chunk,
                reason: overflow.to_string(),
            })
            .collect();
        info!(
            messages = diag.messages,
            clusters = diag.clusters,
            chunks = diag.chunks,
            oversized = diag.oversized_chunks.len(),
            "packed transcript"
        );

        let outcomes = if chunks.is_empty() {
            Vec::new()
        } else {
            ChunkProcessor::new(cfg, Arc::clone(&self.generator)).process_all(&chunks, cancel)?
        };

        let parser = BulletProcessor::new(links.clone());
        let validator = BulletValidator::new(cfg.taxonomy.clone(), &cfg.validation);
        let mut accepted = Vec::new();
        for (chunk, outcome) in chunks.iter().zip(outcomes) {
            let raw = match outcome {
                ChunkOutcome::Completed(raw) => raw,
                ChunkOutcome::Failed(err) => {
                    warn!(chunk = chunk.index, "{err}");
                    if let DigestError::GenerationFailure {
                        chunk,
                        attempts,
                        reason,
                    } = err
                    {
                        diag.failed_chunks.push(FailedChunk {
                            chunk,
                            attempts,
                            reason,
                        });
                    }
                    continue;
                }
                ChunkOutcome::Skipped(index) => {
                    diag.skipped_chunks.push(index);
                    continue;
                }
            };
            diag.completed_chunks.push(chunk.index);
            debug!(chunk = raw.chunk_index, attempts = raw.attempts, "parsing generation");

            let parsed = parser.parse(&raw.text, chunk);
            if parsed.malformed_lines > 0 {
                diag.malformed_lines.insert(chunk.index, parsed.malformed_lines);
            }
            diag.malformed_links += parsed.malformed_links;
            diag.stripped_links += parsed.stripped_links;
            diag.repaired_links += parsed.repaired_links;
            diag.parsed_bullets += parsed.bullets.len();

            let validated = validator.validate(parsed.bullets);
            diag.remapped_categories += validated.remapped;
            diag.rejected_bullets
                .extend(validated.rejected.iter().map(RejectedEntry::from));
            accepted.extend(validated.valid);
        }
        diag.cancelled = cancel.is_cancelled();

        let finalized = SummaryFinalizer::new(
            cfg.taxonomy.clone(),
            &cfg.finalize,
            cfg.validation.similarity_threshold,
        )
        .generated_at(self.generated_at)
        .finalize(accepted, coverage);
        diag.merged_bullets = finalized.merged;
        diag.capped_bullets = finalized.capped;
        diag.final_bullets = finalized.summary.bullet_count();

        if finalized.summary.is_empty() && !chunks.is_empty() {
            diag.no_valid_bullets = true;
            warn!("{}", DigestError::NoValidBullets);
        }
        let unaccounted = diag.unaccounted_bullets();
        if unaccounted != 0 {
            warn!(unaccounted, "bullet accounting does not balance");
        }
        info!("{}", diag.summary_line());

        Ok(DigestOutcome {
            summary: finalized.summary,
            diagnostics: diag,
        })
    }
}
