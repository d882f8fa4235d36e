use crate::digest::bullets::{BulletPoint, BulletState};
use crate::digest::config::{TaxonomyConfig, ValidationConfig};
use crate::digest::similarity;
use crate::digest::text_cleaner;
use crate::error::RejectReason;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RejectedBullet {
    pub bullet: BulletPoint,
    pub reason: RejectReason,
}

#[derive(Debug, Default)]
pub struct ValidationOutcome {
    pub valid: Vec<BulletPoint>,
    pub rejected: Vec<RejectedBullet>,
    /// Bullets moved into the uncategorized bucket.
    pub remapped: usize,
}

pub struct BulletValidator {
    taxonomy: TaxonomyConfig,
    min_text_chars: usize,
    similarity_threshold: f64,
}

impl BulletValidator {
    pub fn new(taxonomy: TaxonomyConfig, cfg: &ValidationConfig) -> Self {
        Self {
            taxonomy,
            min_text_chars: cfg.min_text_chars,
            similarity_threshold: cfg.similarity_threshold,
        }
    }

    /// Applies the rules in order, stopping at the first failure.
    /// Duplicates are only checked against bullets of the same chunk.
    pub fn validate(&self, bullets: Vec<BulletPoint>) -> ValidationOutcome {
        let mut out = ValidationOutcome::default();
        let mut accepted: HashMap<usize, Vec<String>> = HashMap::new();

        for mut bullet in bullets {
            bullet.text = text_cleaner::clean(&bullet.text);
            let chars = bullet.text.chars().count();
            if chars == 0 || chars < self.min_text_chars {
                out.reject(bullet, RejectReason::EmptyContent {
                    min_chars: self.min_text_chars,
                });
                continue;
            }

            if bullet.links.is_empty()
                || bullet.state == BulletState::Invalid(RejectReason::MissingProvenance)
            {
                out.reject(bullet, RejectReason::MissingProvenance);
                continue;
            }

            match self.taxonomy.find(&bullet.category) {
                Some(spec) => {
                    bullet.category = spec.name.clone();
                    if bullet.marker.is_empty() {
                        bullet.marker = spec.marker.clone();
                    }
                }
                None => {
                    debug!(
                        chunk = bullet.chunk_index,
                        category = %bullet.category,
                        "remapping unknown category"
                    );
                    bullet.category = self.taxonomy.uncategorized.name.clone();
                    if bullet.marker.is_empty() {
                        bullet.marker = self.taxonomy.uncategorized.marker.clone();
                    }
                    out.remapped += 1;
                }
            }

            let seen = accepted.entry(bullet.chunk_index).or_default();
            if let Some(original) = seen
                .iter()
                .find(|prior| similarity::is_duplicate(prior, &bullet.text, self.similarity_threshold))
            {
                let reason = RejectReason::IntraChunkDuplicate {
                    chunk: bullet.chunk_index,
                    duplicate_of: original.clone(),
                };
                out.reject(bullet, reason);
                continue;
            }

            seen.push(bullet.text.clone());
            bullet.state = BulletState::Valid;
            out.valid.push(bullet);
        }
        out
    }
}

impl ValidationOutcome {
    fn reject(&mut self, mut bullet: BulletPoint, reason: RejectReason) {
        warn!(
            chunk = bullet.chunk_index,
            reason = reason.code(),
            text = %bullet.text,
            "rejected bullet"
        );
        bullet.state = BulletState::Invalid(reason.clone());
        self.rejected.push(RejectedBullet { bullet, reason });
    }
}

#[cfg(test)]
mod tests {
    use super::BulletValidator;
    use crate::digest::bullets::{BulletPoint, BulletState};
    use crate::digest::config::{TaxonomyConfig, ValidationConfig};
    use crate::error::RejectReason;
    use std::collections::BTreeSet;

    fn bullet(chunk: usize, category: &str, text: &str, links: &[&str]) -> BulletPoint {
        BulletPoint {
            category: category.to_string(),
            marker: String::new(),
            text: text.to_string(),
            priority: 0.5,
            links: links.iter().map(|l| l.to_string()).collect::<BTreeSet<_>>(),
            chunk_index: chunk,
            state: BulletState::Parsed,
        }
    }

    fn validator(threshold: f64) -> BulletValidator {
        BulletValidator::new(
            TaxonomyConfig::default(),
            &ValidationConfig {
                min_text_chars: 12,
                similarity_threshold: threshold,
            },
        )
    }

    #[test]
    fn short_or_empty_text_is_rejected_first() {
        let out = validator(0.7).validate(vec![
            bullet(0, "Development", "  **ok**  ", &[]),
            bullet(0, "Development", "", &["l1"]),
        ]);
        assert!(out.valid.is_empty());
        assert!(
            out.rejected
                .iter()
                .all(|r| matches!(r.reason, RejectReason::EmptyContent { min_chars: 12 }))
        );
    }

    #[test]
    fn bullet_without_links_is_rejected() {
        let mut stripped = bullet(1, "Development", "Node release with faster sync", &[]);
        stripped.state = BulletState::Invalid(RejectReason::MissingProvenance);
        let out = validator(0.7).validate(vec![stripped]);
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.rejected[0].reason, RejectReason::MissingProvenance);
    }

    #[test]
    fn unknown_category_is_remapped_not_rejected() {
        let out = validator(0.7).validate(vec![
            bullet(0, "Gossip", "Someone renamed the meme channel", &["l1"]),
            bullet(0, "development", "Wallet fix merged for ledger users", &["l2"]),
        ]);
        assert_eq!(out.valid.len(), 2);
        assert_eq!(out.remapped, 1);
        assert_eq!(out.valid[0].category, "Uncategorized");
        assert_eq!(out.valid[0].marker, "🔹");
        assert_eq!(out.valid[1].category, "Development");
        assert_eq!(out.valid[1].marker, "🛠️");
        assert!(out.valid.iter().all(|b| b.state == BulletState::Valid));
    }

    #[test]
    fn duplicates_are_rejected_within_a_chunk_only() {
        let text = "Node 5.0.20 released with faster sync";
        let near = "Node 5.0.20 released with much faster sync";
        let out = validator(0.7).validate(vec![
            bullet(0, "Development", text, &["l1"]),
            bullet(0, "Development", near, &["l2"]),
            bullet(1, "Development", near, &["l3"]),
        ]);
        assert_eq!(out.valid.len(), 2);
        assert_eq!(out.valid[1].chunk_index, 1);
        assert_eq!(
            out.rejected[0].reason,
            RejectReason::IntraChunkDuplicate {
                chunk: 0,
                duplicate_of: text.to_string()
            }
        );
    }

    #[test]
    fn duplicate_detection_follows_the_threshold() {
        let a = "alpha beta gamma delta release";
        let b = "alpha beta gamma omega release";
        for (threshold, expected_valid) in [(0.5, 1), (0.8, 1), (0.81, 2), (0.95, 2)] {
            let out = validator(threshold).validate(vec![
                bullet(0, "Development", a, &["l1"]),
                bullet(0, "Development", b, &["l2"]),
            ]);
            assert_eq!(out.valid.len(), expected_valid, "threshold {threshold}");
        }
    }

    #[test]
    fn text_is_repaired_by_cleaning() {
        let out = validator(0.7).validate(vec![bullet(
            0,
            "Development",
            "**Merged**   the <@123> wallet fix",
            &["l1"],
        )]);
        assert_eq!(out.valid[0].text, "Merged the wallet fix");
    }
}
