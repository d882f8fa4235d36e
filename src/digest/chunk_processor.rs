//! One generation call per chunk, fanned out over a bounded worker pool.

use crate::digest::bullets::{self, NONE_SENTINEL};
use crate::digest::chunking::Chunk;
use crate::digest::config::{DigestConfig, TaxonomyConfig};
use crate::digest::links::LinkProcessor;
use crate::digest::provider::Generator;
use crate::digest::retry::{CancelToken, RateLimiter, RetryPolicy};
use crate::error::DigestError;
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RawGeneration {
    pub chunk_index: usize,
    pub text: String,
    pub attempts: u32,
}

#[derive(Debug)]
pub enum ChunkOutcome {
    Completed(RawGeneration),
    /// Always a `DigestError::GenerationFailure`.
    Failed(DigestError),
    /// Never dispatched because the run was cancelled.
    Skipped(usize),
}

pub struct ChunkProcessor {
    generator: Arc<dyn Generator>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    links: LinkProcessor,
    taxonomy: TaxonomyConfig,
    style: String,
    max_output_tokens: usize,
    concurrency: usize,
}

impl ChunkProcessor {
    pub fn new(cfg: &DigestConfig, generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            limiter: Arc::new(RateLimiter::from_config(&cfg.generation)),
            policy: RetryPolicy::from_config(&cfg.retry),
            links: LinkProcessor::new(&cfg.links.base_url),
            taxonomy: cfg.taxonomy.clone(),
            style: cfg.generation.style.clone(),
            max_output_tokens: cfg.generation.max_output_tokens as usize,
            concurrency: cfg.generation.concurrency.max(1),
        }
    }

    pub fn build_prompt(&self, chunk: &Chunk) -> String {
        let mut prompt = String::new();
        prompt.push_str(
            "Summarize the chat transcript excerpt below into digest bullets for people who missed the conversation.\n\n",
        );
        prompt.push_str("Categories (use exactly one per bullet):\n");
        for category in &self.taxonomy.categories {
            prompt.push_str(&format!("- {} {}\n", category.marker, category.name));
        }
        prompt.push_str(&format!("\nStyle: {}\n\n", self.style.trim()));
        prompt.push_str("Output rules:\n");
        prompt.push_str("- One bullet per line, exactly: - [marker] [Category] (priority) summary text <link> <link>\n");
        prompt.push_str("- priority is a number from 0 to 1; higher means more important.\n");
        prompt.push_str("- Cite at least one message link per bullet, copied verbatim from the transcript.\n");
        prompt.push_str("- Never invent links. No headings, no commentary.\n");
        prompt.push_str(&format!(
            "- If nothing is worth reporting, answer with the single word {NONE_SENTINEL}.\n"
        ));
        if chunk.oversized {
            prompt.push_str(
                "- This excerpt is unusually long; focus on the most significant points.\n",
            );
        }
        let window = chunk
            .span()
            .map(|(start, end)| {
                format!(
                    ", {} to {} UTC",
                    start.format("%Y-%m-%d %H:%M"),
                    end.format("%Y-%m-%d %H:%M")
                )
            })
            .unwrap_or_default();
        prompt.push_str(&format!(
            "\nTranscript ({} messages{window}):\n\n{}",
            chunk.message_count(),
            chunk.render(&self.links)
        ));
        prompt
    }

    fn attempt(&self, prompt: &str) -> Result<String> {
        let output = self.generator.generate(prompt, self.max_output_tokens)?;
        let trimmed = output.trim();
        if trimmed.is_empty() {
            anyhow::bail!("empty output");
        }
        if !bullets::is_none_sentinel(trimmed) && !bullets::has_bullet_shape(trimmed) {
            anyhow::bail!("output has no bullet lines");
        }
        Ok(trimmed.to_string())
    }

    /// Calls the generator for one chunk, retrying per the policy. Cancellation
    /// stops further attempts; a chunk cancelled before its first call is skipped.
    pub fn summarize(&self, chunk: &Chunk, cancel: &CancelToken) -> ChunkOutcome {
        let prompt = self.build_prompt(chunk);
        let mut last_error = String::new();

        for attempt in 1..=self.policy.max_attempts {
            if !self.limiter.acquire(cancel) {
                if attempt == 1 {
                    debug!(chunk = chunk.index, "skipping chunk after cancellation");
                    return ChunkOutcome::Skipped(chunk.index);
                }
                return ChunkOutcome::Failed(DigestError::GenerationFailure {
                    chunk: chunk.index,
                    attempts: attempt - 1,
                    reason: format!("cancelled before retry; last error: {last_error}"),
                });
            }

            match self.attempt(&prompt) {
                Ok(text) => {
                    debug!(chunk = chunk.index, attempt, "chunk generated");
                    return ChunkOutcome::Completed(RawGeneration {
                        chunk_index: chunk.index,
                        text,
                        attempts: attempt,
                    });
                }
                Err(err) => {
                    last_error = format!("{err:#}");
                    warn!(chunk = chunk.index, attempt, error = %last_error, "generation attempt failed");
                    if err
                        .downcast_ref::<DigestError>()
                        .is_some_and(DigestError::is_fatal)
                    {
                        return ChunkOutcome::Failed(DigestError::GenerationFailure {
                            chunk: chunk.index,
                            attempts: attempt,
                            reason: last_error,
                        });
                    }
                }
            }

            if attempt < self.policy.max_attempts
                && !cancel.sleep(self.policy.backoff_after(attempt))
            {
                return ChunkOutcome::Failed(DigestError::GenerationFailure {
                    chunk: chunk.index,
                    attempts: attempt,
                    reason: format!("cancelled before retry; last error: {last_error}"),
                });
            }
        }

        ChunkOutcome::Failed(DigestError::GenerationFailure {
            chunk: chunk.index,
            attempts: self.policy.max_attempts,
            reason: last_error,
        })
    }

    /// Outcomes in chunk-index order regardless of completion order: the
    /// indexed parallel collect writes each result into its chunk's slot.
    pub fn process_all(&self, chunks: &[Chunk], cancel: &CancelToken) -> Result<Vec<ChunkOutcome>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .thread_name(|i| format!("digest-worker-{i}"))
            .build()
            .context("failed to build generation worker pool")?;
        info!(
            chunks = chunks.len(),
            workers = self.concurrency,
            generator = %self.generator.label(),
            "dispatching chunks"
        );
        Ok(pool.install(|| {
            chunks
                .par_iter()
                .with_max_len(1)
                .map(|chunk| self.summarize(chunk, cancel))
                .collect()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::{ChunkOutcome, ChunkProcessor};
    use crate::digest::config::DigestConfig;
    use crate::digest::provider::Generator;
    use crate::digest::retry::CancelToken;
    use crate::digest::testing::{chunk_of, message};
    use crate::error::DigestError;
    use anyhow::{Result, anyhow};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` calls, then answers with `reply`.
    struct Flaky {
        failures: usize,
        reply: &'static str,
        calls: AtomicUsize,
    }

    impl Generator for Flaky {
        fn generate(&self, _prompt: &str, _max: usize) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(anyhow!("upstream 503"));
            }
            Ok(self.reply.to_string())
        }

        fn label(&self) -> String {
            "flaky".to_string()
        }
    }

    fn config(max_attempts: u32) -> DigestConfig {
        let mut cfg = DigestConfig::default();
        cfg.retry.max_attempts = max_attempts;
        cfg.retry.initial_backoff_ms = 1;
        cfg.retry.max_backoff_ms = 2;
        cfg.generation.concurrency = 3;
        cfg
    }

    fn chunk(index: usize) -> crate::digest::chunking::Chunk {
        chunk_of(
            index,
            vec![message(&format!("{index}0"), "ana", "7", index as i64 * 60, "release notes are out")],
        )
    }

    #[test]
    fn prompt_embeds_taxonomy_style_and_transcript() {
        let generator = Arc::new(Flaky {
            failures: 0,
            reply: "NONE",
            calls: AtomicUsize::new(0),
        });
        let processor = ChunkProcessor::new(&config(1), generator);
        let prompt = processor.build_prompt(&chunk(0));
        assert!(prompt.contains("- 🛠️ Development"));
        assert!(prompt.contains("Style: Keep a technical"));
        assert!(prompt.contains("https://discord.com/channels/100/7/00"));
        assert!(prompt.contains("release notes are out"));
        assert!(prompt.contains("single word NONE"));
    }

    #[test]
    fn retries_until_success() {
        let generator = Arc::new(Flaky {
            failures: 2,
            reply: "- [Development] ok <x>",
            calls: AtomicUsize::new(0),
        });
        let processor = ChunkProcessor::new(&config(3), generator.clone());
        match processor.summarize(&chunk(0), &CancelToken::new()) {
            ChunkOutcome::Completed(raw) => assert_eq!(raw.attempts, 3),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn malformed_output_counts_as_failure() {
        let generator = Arc::new(Flaky {
            failures: 0,
            reply: "I could not find anything useful, sorry.",
            calls: AtomicUsize::new(0),
        });
        let processor = ChunkProcessor::new(&config(2), generator.clone());
        match processor.summarize(&chunk(4), &CancelToken::new()) {
            ChunkOutcome::Failed(DigestError::GenerationFailure { chunk, attempts, reason }) => {
                assert_eq!(chunk, 4);
                assert_eq!(attempts, 2);
                assert!(reason.contains("no bullet lines"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cancelled_run_skips_undispatched_chunks() {
        let generator = Arc::new(Flaky {
            failures: 0,
            reply: "NONE",
            calls: AtomicUsize::new(0),
        });
        let processor = ChunkProcessor::new(&config(2), generator.clone());
        let cancel = CancelToken::new();
        cancel.cancel();
        let chunks = vec![chunk(0), chunk(1), chunk(2)];
        let outcomes = processor.process_all(&chunks, &cancel).expect("pool");
        let skipped: Vec<usize> = outcomes
            .iter()
            .filter_map(|o| match o {
                ChunkOutcome::Skipped(index) => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(skipped, vec![0, 1, 2]);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn outcomes_are_returned_in_chunk_order() {
        let generator = Arc::new(Flaky {
            failures: 0,
            reply: "NONE",
            calls: AtomicUsize::new(0),
        });
        let processor = ChunkProcessor::new(&config(1), generator);
        let chunks: Vec<_> = (0..8).map(chunk).collect();
        let outcomes = processor.process_all(&chunks, &CancelToken::new()).expect("pool");
        let order: Vec<usize> = outcomes
            .iter()
            .map(|o| match o {
                ChunkOutcome::Completed(raw) => raw.chunk_index,
                other => panic!("unexpected outcome: {other:?}"),
            })
            .collect();
        assert_eq!(order, (0..8).collect::<Vec<_>>());
    }

    struct Misconfigured {
        calls: AtomicUsize,
    }

    impl Generator for Misconfigured {
        fn generate(&self, _prompt: &str, _max: usize) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DigestError::InvalidConfig("model name is empty".to_string()).into())
        }

        fn label(&self) -> String {
            "misconfigured".to_string()
        }
    }

    #[test]
    fn fatal_generator_error_is_not_retried() {
        let generator = Arc::new(Misconfigured {
            calls: AtomicUsize::new(0),
        });
        let processor = ChunkProcessor::new(&config(4), generator.clone());
        match processor.summarize(&chunk(1), &CancelToken::new()) {
            ChunkOutcome::Failed(DigestError::GenerationFailure { attempts, reason, .. }) => {
                assert_eq!(attempts, 1);
                assert!(reason.contains("model name is empty"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }
}
