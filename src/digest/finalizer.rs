//! Cross-chunk merge of validated bullets into the final summary.

use crate::digest::bullets::BulletPoint;
use crate::digest::config::{FinalizeConfig, TaxonomyConfig};
use crate::digest::similarity;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoverageWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySection {
    pub category: String,
    pub marker: String,
    pub bullets: Vec<BulletPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub title: String,
    pub generated_at: DateTime<Utc>,
    pub coverage: Option<CoverageWindow>,
    pub sections: Vec<CategorySection>,
}

/// A bullet folded into a surviving one.
#[derive(Debug, Clone, Serialize)]
pub struct MergeRecord {
    pub category: String,
    pub kept: String,
    pub dropped: String,
    pub dropped_chunk: usize,
}

/// A bullet dropped by the per-section cap.
#[derive(Debug, Clone, Serialize)]
pub struct CapRecord {
    pub category: String,
    pub text: String,
    pub priority: f64,
    pub chunk: usize,
}

#[derive(Debug)]
pub struct FinalizeOutcome {
    pub summary: Summary,
    pub merged: Vec<MergeRecord>,
    pub capped: Vec<CapRecord>,
}

fn display_order(a: &BulletPoint, b: &BulletPoint) -> Ordering {
    a.chunk_index
        .cmp(&b.chunk_index)
        .then_with(|| b.priority.total_cmp(&a.priority))
        .then_with(|| a.text.cmp(&b.text))
}

/// Overflow order: lowest priority first, then latest chunk.
fn drop_order(a: &BulletPoint, b: &BulletPoint) -> Ordering {
    a.priority
        .total_cmp(&b.priority)
        .then_with(|| b.chunk_index.cmp(&a.chunk_index))
        .then_with(|| b.text.cmp(&a.text))
}

pub struct SummaryFinalizer {
    taxonomy: TaxonomyConfig,
    similarity_threshold: f64,
    max_bullets_per_section: usize,
    title: String,
    generated_at: Option<DateTime<Utc>>,
}

impl SummaryFinalizer {
    pub fn new(taxonomy: TaxonomyConfig, cfg: &FinalizeConfig, similarity_threshold: f64) -> Self {
        Self {
            taxonomy,
            similarity_threshold,
            max_bullets_per_section: cfg.max_bullets_per_section,
            title: cfg.title.clone(),
            generated_at: None,
        }
    }

    /// Pins the generation timestamp instead of reading the clock.
    pub fn generated_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.generated_at = at;
        self
    }

    /// Folds near-duplicates together until no pair collides. The higher
    /// priority bullet survives and absorbs the other's links.
    fn dedupe(&self, bullets: &mut Vec<BulletPoint>, merged: &mut Vec<MergeRecord>) {
        'restart: loop {
            for i in 0..bullets.len() {
                for j in (i + 1)..bullets.len() {
                    if !similarity::is_duplicate(
                        &bullets[i].text,
                        &bullets[j].text,
                        self.similarity_threshold,
                    ) {
                        continue;
                    }
                    let mut dropped = bullets.remove(j);
                    let kept = &mut bullets[i];
                    if dropped.priority > kept.priority {
                        std::mem::swap(kept, &mut dropped);
                    }
                    kept.links.extend(dropped.links.iter().cloned());
                    debug!(category = %kept.category, kept = %kept.text, dropped = %dropped.text, "merged bullets");
                    merged.push(MergeRecord {
                        category: kept.category.clone(),
                        kept: kept.text.clone(),
                        dropped: dropped.text,
                        dropped_chunk: dropped.chunk_index,
                    });
                    continue 'restart;
                }
            }
            break;
        }
    }

    pub fn finalize(
        &self,
        bullets: Vec<BulletPoint>,
        coverage: Option<CoverageWindow>,
    ) -> FinalizeOutcome {
        let mut grouped: BTreeMap<(usize, String), Vec<BulletPoint>> = BTreeMap::new();
        for bullet in bullets {
            let rank = self.taxonomy.rank(&bullet.category);
            grouped
                .entry((rank, bullet.category.clone()))
                .or_default()
                .push(bullet);
        }

        let mut merged = Vec::new();
        let mut capped = Vec::new();
        let mut sections = Vec::new();
        for ((_, category), mut bullets) in grouped {
            bullets.sort_by(display_order);
            self.dedupe(&mut bullets, &mut merged);

            if bullets.len() > self.max_bullets_per_section {
                bullets.sort_by(|a, b| drop_order(b, a));
                for overflow in bullets.split_off(self.max_bullets_per_section) {
                    debug!(category = %category, text = %overflow.text, "capped bullet");
                    capped.push(CapRecord {
                        category: category.clone(),
                        text: overflow.text,
                        priority: overflow.priority,
                        chunk: overflow.chunk_index,
                    });
                }
            }
            bullets.sort_by(display_order);

            sections.push(CategorySection {
                marker: self.taxonomy.marker_for(&category).to_string(),
                category,
                bullets,
            });
        }

        FinalizeOutcome {
            summary: Summary {
                title: self.title.clone(),
                generated_at: self.generated_at.unwrap_or_else(Utc::now),
                coverage,
                sections,
            },
            merged,
            capped,
        }
    }
}

impl Summary {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn bullet_count(&self) -> usize {
        self.bullets().count()
    }

    pub fn bullets(&self) -> impl Iterator<Item = &BulletPoint> {
        self.sections.iter().flat_map(|s| s.bullets.iter())
    }

    fn coverage_line(&self, tz: Tz) -> Option<String> {
        let window = self.coverage?;
        Some(format!(
            "{} to {} ({tz})",
            window.start.with_timezone(&tz).format("%Y-%m-%d %H:%M"),
            window.end.with_timezone(&tz).format("%Y-%m-%d %H:%M"),
        ))
    }

    pub fn to_markdown(&self, tz: Tz) -> String {
        let mut out = format!("# {}\n\n", self.title);
        if let Some(coverage) = self.coverage_line(tz) {
            out.push_str(&format!("_Coverage: {coverage}_\n"));
        }
        out.push_str(&format!(
            "_Generated: {}_\n",
            self.generated_at.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z")
        ));

        if self.is_empty() {
            out.push_str("\nNo notable activity in this window.\n");
            return out;
        }
        for section in &self.sections {
            out.push_str(&format!("\n### {} {}\n", section.marker, section.category));
            for bullet in &section.bullets {
                let refs = bullet
                    .links
                    .iter()
                    .enumerate()
                    .map(|(i, link)| format!("[{}]({link})", i + 1))
                    .collect::<Vec<_>>()
                    .join(", ");
                out.push_str(&format!(
                    "- {} **{}**: {} ({refs})\n",
                    bullet.marker, bullet.category, bullet.text
                ));
            }
        }
        out
    }

    /// Social-post rendering: no links, no markup.
    pub fn to_plain_text(&self, tz: Tz) -> String {
        let mut out = format!("{}\n", self.title);
        if let Some(coverage) = self.coverage_line(tz) {
            out.push_str(&format!("{coverage}\n"));
        }
        if self.is_empty() {
            out.push_str("\nNo notable activity in this window.\n");
            return out;
        }
        for section in &self.sections {
            out.push_str(&format!("\n{} {}\n", section.marker, section.category));
            for bullet in &section.bullets {
                out.push_str(&format!("{} {}\n", bullet.marker, bullet.text));
            }
        }
        out
    }
}
