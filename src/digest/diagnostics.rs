use crate::digest::finalizer::{CapRecord, MergeRecord};
use crate::digest::message::Message;
use crate::digest::validator::RejectedBullet;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
pub struct OversizedChunk {
    pub chunk: usize,
    pub estimated_tokens: usize,
    pub budget: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedChunk {
    pub chunk: usize,
    pub attempts: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedEntry {
    pub chunk: usize,
    pub code: String,
    pub reason: String,
    pub text: String,
}

impl From<&RejectedBullet> for RejectedEntry {
    fn from(rejected: &RejectedBullet) -> Self {
        Self {
            chunk: rejected.bullet.chunk_index,
            code: rejected.reason.code().to_string(),
            reason: rejected.reason.to_string(),
            text: rejected.bullet.text.clone(),
        }
    }
}

/// Everything a run dropped, repaired or skipped, written next to the summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticsReport {
    pub generator: String,
    pub input_fingerprint: String,
    pub messages: usize,
    pub skipped_empty_messages: usize,
    pub skipped_missing_id_messages: usize,
    pub clusters: usize,
    pub forward_references: usize,
    pub chunks: usize,
    pub oversized_chunks: Vec<OversizedChunk>,
    pub completed_chunks: Vec<usize>,
    pub failed_chunks: Vec<FailedChunk>,
    pub skipped_chunks: Vec<usize>,
    /// chunk index -> dropped line count
    pub malformed_lines: BTreeMap<usize, usize>,
    pub malformed_links: usize,
    pub stripped_links: usize,
    pub repaired_links: usize,
    pub parsed_bullets: usize,
    pub rejected_bullets: Vec<RejectedEntry>,
    pub remapped_categories: usize,
    pub merged_bullets: Vec<MergeRecord>,
    pub capped_bullets: Vec<CapRecord>,
    pub final_bullets: usize,
    pub no_valid_bullets: bool,
    pub cancelled: bool,
}

impl DiagnosticsReport {
    pub fn fingerprint(messages: &[Message]) -> String {
        let mut hasher = Sha256::new();
        for message in messages {
            hasher.update(message.id.as_bytes());
            hasher.update([0u8]);
            hasher.update(message.body.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Parsed bullets minus every accounted drop. Zero means nothing vanished.
    pub fn unaccounted_bullets(&self) -> i64 {
        self.parsed_bullets as i64
            - self.rejected_bullets.len() as i64
            - self.merged_bullets.len() as i64
            - self.capped_bullets.len() as i64
            - self.final_bullets as i64
    }

    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.skipped_missing_id_messages > 0 {
            issues.push(format!(
                "skipped {} exported message(s) without an id",
                self.skipped_missing_id_messages
            ));
        }
        for failed in &self.failed_chunks {
            issues.push(format!(
                "chunk {} failed after {} attempt(s): {}",
                failed.chunk, failed.attempts, failed.reason
            ));
        }
        if !self.skipped_chunks.is_empty() {
            issues.push(format!("skipped chunks: {:?}", self.skipped_chunks));
        }
        for oversized in &self.oversized_chunks {
            issues.push(format!(
                "chunk {} oversized: {} tokens over budget {}",
                oversized.chunk, oversized.estimated_tokens, oversized.budget
            ));
        }
        if !self.rejected_bullets.is_empty() {
            issues.push(format!("rejected bullets: {}", self.rejected_bullets.len()));
        }
        if self.no_valid_bullets {
            issues.push("no valid bullets survived validation".to_string());
        }
        if self.cancelled {
            issues.push("run cancelled before all chunks were dispatched".to_string());
        }
        issues
    }

    pub fn summary_line(&self) -> String {
        format!(
            "messages={} clusters={} chunks={} failed={} skipped={} bullets={} rejected={} merged={} capped={}",
            self.messages,
            self.clusters,
            self.chunks,
            self.failed_chunks.len(),
            self.skipped_chunks.len(),
            self.final_bullets,
            self.rejected_bullets.len(),
            self.merged_bullets.len(),
            self.capped_bullets.len()
        )
    }
}
