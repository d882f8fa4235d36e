//! Parses raw generator output into structured, provenance-checked bullets.

use crate::digest::chunking::Chunk;
use crate::digest::links::LinkProcessor;
use crate::digest::message::Message;
use crate::error::RejectReason;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;
use tracing::{debug, warn};

pub const NONE_SENTINEL: &str = "NONE";
pub const DEFAULT_PRIORITY: f64 = 0.5;

/// `[marker] [Category] (priority) body`, marker and priority optional.
/// Markers are symbols only, never letters or digits.
static BRACKET_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:\[([^\]\p{L}\p{N}]*)\]\s*)?\[([^\]]+)\]\s*(?:\((\d*\.?\d+)\)\s*)?(.*)$",
    )
    .expect("bracket bullet regex")
});
/// `marker **Category**: body`, marker and priority optional.
static BOLD_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:([^\s\p{L}\p{N}]+)\s+)?\*\*([^*]+)\*\*:?\s*(?:\((\d*\.?\d+)\)\s*)?(.*)$",
    )
    .expect("bold bullet regex")
});
/// Dates and clock times, as echoed from transcript lines.
static TIMESTAMP_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}|^\d{1,2}:\d{2}").expect("timestamp regex")
});
static EMPTY_WRAPPERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\d+\]\(\s*\)|<\s*>|\(\s*(?:,\s*)*\)").expect("empty wrapper regex")
});
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

#[derive(Debug, Clone, PartialEq, Default)]
pub enum BulletState {
    #[default]
    Parsed,
    Invalid(RejectReason),
    Valid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulletPoint {
    pub category: String,
    /// Empty until validation assigns the category's marker.
    pub marker: String,
    pub text: String,
    pub priority: f64,
    pub links: BTreeSet<String>,
    pub chunk_index: usize,
    #[serde(skip)]
    pub state: BulletState,
}

#[derive(Debug, Default)]
pub struct ParsedChunk {
    pub bullets: Vec<BulletPoint>,
    pub malformed_lines: usize,
    pub malformed_links: usize,
    pub stripped_links: usize,
    pub repaired_links: usize,
}

struct LineParts<'a> {
    marker: Option<&'a str>,
    category: &'a str,
    priority: Option<&'a str>,
    body: &'a str,
}

fn strip_list_prefix(line: &str) -> Option<&str> {
    ["- ", "* ", "• "]
        .iter()
        .find_map(|prefix| line.strip_prefix(prefix))
        .map(str::trim_start)
}

fn is_category_name(raw: &str) -> bool {
    let name = raw.trim();
    name.chars().any(char::is_alphabetic) && !TIMESTAMP_LIKE.is_match(name)
}

fn names_category(caps: &Captures<'_>) -> bool {
    caps.get(2).is_some_and(|m| is_category_name(m.as_str()))
}

fn split_line(line: &str) -> Option<LineParts<'_>> {
    let rest = strip_list_prefix(line.trim())?;
    let caps = BRACKET_FORM
        .captures(rest)
        .filter(names_category)
        .or_else(|| BOLD_FORM.captures(rest).filter(names_category))?;
    let category = caps.get(2)?.as_str().trim();
    Some(LineParts {
        marker: caps.get(1).map(|m| m.as_str().trim()).filter(|m| !m.is_empty()),
        category,
        priority: caps.get(3).map(|m| m.as_str()),
        body: caps.get(4).map_or("", |m| m.as_str()),
    })
}

pub fn is_none_sentinel(raw: &str) -> bool {
    raw.lines()
        .map(str::trim)
        .any(|l| l.trim_matches('.').eq_ignore_ascii_case(NONE_SENTINEL))
}

/// Whether any line of `raw` has the bullet grammar's shape.
pub fn has_bullet_shape(raw: &str) -> bool {
    raw.lines().any(|line| split_line(line).is_some())
}

fn parse_priority(raw: Option<&str>) -> f64 {
    raw.and_then(|p| p.parse::<f64>().ok())
        .filter(|p| p.is_finite())
        .map_or(DEFAULT_PRIORITY, |p| p.clamp(0.0, 1.0))
}

pub struct BulletProcessor {
    links: LinkProcessor,
}

impl BulletProcessor {
    pub fn new(links: LinkProcessor) -> Self {
        Self { links }
    }

    fn strip_links(body: &str, found: &[(usize, &str)]) -> String {
        let mut text = body.to_string();
        for (start, link) in found.iter().rev() {
            text.replace_range(*start..*start + link.len(), "");
        }
        loop {
            let next = EMPTY_WRAPPERS.replace_all(&text, "").into_owned();
            if next == text {
                break;
            }
            text = next;
        }
        WHITESPACE
            .replace_all(&text, " ")
            .trim()
            .trim_end_matches([',', ';', ':', '-'])
            .trim()
            .to_string()
    }

    pub fn parse(&self, raw: &str, chunk: &Chunk) -> ParsedChunk {
        let by_id: HashMap<&str, &Message> = chunk
            .clusters
            .iter()
            .flat_map(|c| c.messages.iter())
            .map(|m| (m.id.as_str(), m))
            .collect();
        let mut out = ParsedChunk::default();

        for line in raw.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || is_none_sentinel(trimmed) {
                continue;
            }
            let Some(parts) = split_line(trimmed) else {
                debug!(chunk = chunk.index, line = trimmed, "dropping malformed bullet line");
                out.malformed_lines += 1;
                continue;
            };

            let found = self.links.find_candidates(parts.body);
            let mut links = BTreeSet::new();
            for (_, candidate) in &found {
                let reference = match self.links.parse_link(candidate) {
                    Ok(reference) => reference,
                    Err(err) => {
                        warn!(chunk = chunk.index, "{err}");
                        out.malformed_links += 1;
                        continue;
                    }
                };
                let Some(message) = by_id.get(reference.message_id.as_str()) else {
                    debug!(chunk = chunk.index, link = *candidate, "stripping link outside chunk");
                    out.stripped_links += 1;
                    continue;
                };
                let canonical = self.links.link_for(message);
                if canonical != *candidate {
                    debug!(chunk = chunk.index, from = *candidate, to = %canonical, "repaired link");
                    out.repaired_links += 1;
                }
                links.insert(canonical);
            }

            let state = if links.is_empty() {
                BulletState::Invalid(RejectReason::MissingProvenance)
            } else {
                BulletState::Parsed
            };
            out.bullets.push(BulletPoint {
                category: parts.category.to_string(),
                marker: parts.marker.unwrap_or_default().to_string(),
                text: Self::strip_links(parts.body, &found),
                priority: parse_priority(parts.priority),
                links,
                chunk_index: chunk.index,
                state,
            });
        }
        out
    }
}
