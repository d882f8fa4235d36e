use crate::digest::paths::DigestPaths;
use crate::error::DigestError;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub inactivity_gap_secs: u64,
    pub max_cluster_messages: usize,
    pub keyword_overlap_min: usize,
    pub keyword_window_secs: u64,
    pub max_cluster_keywords: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            inactivity_gap_secs: 900,
            max_cluster_messages: 12,
            keyword_overlap_min: 2,
            keyword_window_secs: 300,
            max_cluster_keywords: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_tokens_per_chunk: usize,
    /// Held back from every chunk for the instructions and headers around the transcript.
    pub reserved_prompt_tokens: usize,
    pub bytes_per_token: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_chunk: 24_000,
            reserved_prompt_tokens: 1_024,
            bytes_per_token: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySpec {
    pub name: String,
    pub marker: String,
}

impl CategorySpec {
    pub fn new(name: &str, marker: &str) -> Self {
        Self {
            name: name.to_string(),
            marker: marker.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxonomyConfig {
    pub categories: Vec<CategorySpec>,
    pub uncategorized: CategorySpec,
}

impl Default for TaxonomyConfig {
    fn default() -> Self {
        Self {
            categories: vec![
                CategorySpec::new("Development", "🛠️"),
                CategorySpec::new("Infrastructure", "🏗️"),
                CategorySpec::new("DeFi", "💱"),
                CategorySpec::new("Documentation", "📚"),
                CategorySpec::new("Community", "🤝"),
                CategorySpec::new("Announcements", "📢"),
            ],
            uncategorized: CategorySpec::new("Uncategorized", "🔹"),
        }
    }
}

impl TaxonomyConfig {
    /// Case-insensitive lookup returning the canonical spelling.
    pub fn find(&self, name: &str) -> Option<&CategorySpec> {
        let wanted = name.trim();
        self.categories
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(wanted))
    }

    /// Section position: taxonomy order first, the uncategorized bucket last.
    pub fn rank(&self, name: &str) -> usize {
        self.categories
            .iter()
            .position(|c| c.name == name)
            .unwrap_or(self.categories.len())
    }

    pub fn marker_for(&self, name: &str) -> &str {
        self.find(name)
            .map(|c| c.marker.as_str())
            .unwrap_or(self.uncategorized.marker.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub concurrency: usize,
    pub max_output_tokens: u32,
    pub request_timeout_secs: u64,
    pub requests_per_minute: u32,
    pub rate_burst: u32,
    pub temperature: f64,
    pub style: String,
}

fn default_style() -> String {
    "Keep a technical, professional tone. Focus on concrete changes, decisions, releases and open problems. Skip greetings, jokes and off-topic chatter.".to_string()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_output_tokens: 4_000,
            request_timeout_secs: 45,
            requests_per_minute: 0,
            rate_burst: 1,
            temperature: 0.2,
            style: default_style(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
            max_backoff_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_text_chars: usize,
    pub similarity_threshold: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_text_chars: 20,
            similarity_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalizeConfig {
    pub max_bullets_per_section: usize,
    pub title: String,
    pub timezone: String,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            max_bullets_per_section: 8,
            title: "Community Digest".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinksConfig {
    pub base_url: String,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            base_url: "https://discord.com/channels".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DigestConfig {
    pub clustering: ClusteringConfig,
    pub chunking: ChunkingConfig,
    pub taxonomy: TaxonomyConfig,
    pub generation: GenerationConfig,
    pub retry: RetryConfig,
    pub validation: ValidationConfig,
    pub finalize: FinalizeConfig,
    pub links: LinksConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialDigestConfig {
    clustering: Option<ClusteringConfig>,
    chunking: Option<ChunkingConfig>,
    taxonomy: Option<TaxonomyConfig>,
    generation: Option<GenerationConfig>,
    retry: Option<RetryConfig>,
    validation: Option<ValidationConfig>,
    finalize: Option<FinalizeConfig>,
    links: Option<LinksConfig>,
}

fn env_or_f64(var: &str, fallback: f64) -> f64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<f64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u32(var: &str, fallback: u32) -> u32 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u32>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

/// Parse `Name=marker,Other` into category specs; a missing marker falls
/// back to the uncategorized marker.
pub fn parse_categories_csv(raw: &str, default_marker: &str) -> Vec<CategorySpec> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|item| match item.split_once('=') {
            Some((name, marker)) if !marker.trim().is_empty() => {
                CategorySpec::new(name.trim(), marker.trim())
            }
            Some((name, _)) => CategorySpec::new(name.trim(), default_marker),
            None => CategorySpec::new(item, default_marker),
        })
        .filter(|c| !c.name.is_empty())
        .collect()
}

pub fn validate(cfg: &DigestConfig) -> Result<(), DigestError> {
    let invalid = |msg: &str| Err(DigestError::InvalidConfig(msg.to_string()));

    if cfg.chunking.max_tokens_per_chunk == 0 {
        return invalid("chunking.max_tokens_per_chunk must be >= 1");
    }
    if cfg.chunking.reserved_prompt_tokens >= cfg.chunking.max_tokens_per_chunk {
        return invalid("chunking.reserved_prompt_tokens must be below max_tokens_per_chunk");
    }
    if !(cfg.chunking.bytes_per_token > 0.0) {
        return invalid("chunking.bytes_per_token must be > 0");
    }
    if cfg.clustering.max_cluster_messages == 0 {
        return invalid("clustering.max_cluster_messages must be >= 1");
    }
    if cfg.taxonomy.categories.is_empty() {
        return invalid("taxonomy.categories cannot be empty");
    }
    let mut seen = BTreeSet::new();
    for category in &cfg.taxonomy.categories {
        if category.name.trim().is_empty() {
            return invalid("taxonomy category names cannot be empty");
        }
        if !seen.insert(category.name.to_ascii_lowercase()) {
            return Err(DigestError::InvalidConfig(format!(
                "taxonomy category `{}` is listed twice",
                category.name
            )));
        }
    }
    if cfg.taxonomy.uncategorized.name.trim().is_empty() {
        return invalid("taxonomy.uncategorized.name cannot be empty");
    }
    if seen.contains(&cfg.taxonomy.uncategorized.name.to_ascii_lowercase()) {
        return invalid("taxonomy.uncategorized must not repeat a taxonomy category");
    }
    if cfg.generation.concurrency == 0 {
        return invalid("generation.concurrency must be >= 1");
    }
    if cfg.generation.max_output_tokens == 0 {
        return invalid("generation.max_output_tokens must be >= 1");
    }
    if cfg.generation.request_timeout_secs == 0 {
        return invalid("generation.request_timeout_secs must be >= 1");
    }
    if cfg.generation.requests_per_minute > 0 && cfg.generation.rate_burst == 0 {
        return invalid("generation.rate_burst must be >= 1 when rate limiting is enabled");
    }
    if cfg.retry.max_attempts == 0 {
        return invalid("retry.max_attempts must be >= 1");
    }
    if cfg.retry.backoff_multiplier < 1.0 {
        return invalid("retry.backoff_multiplier must be >= 1.0");
    }
    let t = cfg.validation.similarity_threshold;
    if !(t > 0.0 && t <= 1.0) {
        return invalid("validation.similarity_threshold: require 0 < threshold <= 1.0");
    }
    if cfg.finalize.max_bullets_per_section == 0 {
        return invalid("finalize.max_bullets_per_section must be >= 1");
    }
    if cfg.finalize.timezone.parse::<chrono_tz::Tz>().is_err() {
        return Err(DigestError::InvalidConfig(format!(
            "finalize.timezone `{}` is not a known IANA zone",
            cfg.finalize.timezone
        )));
    }
    if cfg.links.base_url.trim().trim_end_matches('/').is_empty() {
        return invalid("links.base_url cannot be empty");
    }
    Ok(())
}

/// Overlay the sections present in a TOML document onto `base`.
pub fn merge_toml(base: &mut DigestConfig, raw: &str) -> Result<()> {
    let parsed: PartialDigestConfig = toml::from_str(raw)?;
    if let Some(clustering) = parsed.clustering {
        base.clustering = clustering;
    }
    if let Some(chunking) = parsed.chunking {
        base.chunking = chunking;
    }
    if let Some(taxonomy) = parsed.taxonomy {
        base.taxonomy = taxonomy;
    }
    if let Some(generation) = parsed.generation {
        base.generation = generation;
    }
    if let Some(retry) = parsed.retry {
        base.retry = retry;
    }
    if let Some(validation) = parsed.validation {
        base.validation = validation;
    }
    if let Some(finalize) = parsed.finalize {
        base.finalize = finalize;
    }
    if let Some(links) = parsed.links {
        base.links = links;
    }
    Ok(())
}

fn merge_file_config(base: &mut DigestConfig, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let raw = fs::read_to_string(path)?;
    merge_toml(base, &raw)
        .map_err(|err| anyhow!("failed to parse digest config {}: {err}", path.display()))
}

fn apply_env_overrides(cfg: &mut DigestConfig) {
    cfg.clustering.inactivity_gap_secs =
        env_or_u64("DIGEST_INACTIVITY_GAP_SECS", cfg.clustering.inactivity_gap_secs);
    cfg.clustering.max_cluster_messages =
        env_or_usize("DIGEST_MAX_CLUSTER_MESSAGES", cfg.clustering.max_cluster_messages);
    cfg.clustering.keyword_overlap_min =
        env_or_usize("DIGEST_KEYWORD_OVERLAP_MIN", cfg.clustering.keyword_overlap_min);
    cfg.clustering.keyword_window_secs =
        env_or_u64("DIGEST_KEYWORD_WINDOW_SECS", cfg.clustering.keyword_window_secs);
    cfg.chunking.max_tokens_per_chunk =
        env_or_usize("DIGEST_MAX_CHUNK_TOKENS", cfg.chunking.max_tokens_per_chunk);
    cfg.chunking.reserved_prompt_tokens = env_or_usize(
        "DIGEST_RESERVED_PROMPT_TOKENS",
        cfg.chunking.reserved_prompt_tokens,
    );
    cfg.chunking.bytes_per_token =
        env_or_f64("DIGEST_BYTES_PER_TOKEN", cfg.chunking.bytes_per_token);
    cfg.generation.concurrency = env_or_usize("DIGEST_CONCURRENCY", cfg.generation.concurrency);
    cfg.generation.max_output_tokens =
        env_or_u32("DIGEST_MAX_OUTPUT_TOKENS", cfg.generation.max_output_tokens);
    cfg.generation.request_timeout_secs =
        env_or_u64("DIGEST_REQUEST_TIMEOUT_SECS", cfg.generation.request_timeout_secs);
    cfg.generation.requests_per_minute =
        env_or_u32("DIGEST_REQUESTS_PER_MINUTE", cfg.generation.requests_per_minute);
    cfg.generation.rate_burst = env_or_u32("DIGEST_RATE_BURST", cfg.generation.rate_burst);
    cfg.retry.max_attempts = env_or_u32("DIGEST_RETRY_MAX_ATTEMPTS", cfg.retry.max_attempts);
    cfg.retry.initial_backoff_ms =
        env_or_u64("DIGEST_RETRY_INITIAL_BACKOFF_MS", cfg.retry.initial_backoff_ms);
    cfg.retry.max_backoff_ms = env_or_u64("DIGEST_RETRY_MAX_BACKOFF_MS", cfg.retry.max_backoff_ms);
    cfg.validation.min_text_chars =
        env_or_usize("DIGEST_MIN_TEXT_CHARS", cfg.validation.min_text_chars);
    cfg.validation.similarity_threshold = env_or_f64(
        "DIGEST_SIMILARITY_THRESHOLD",
        cfg.validation.similarity_threshold,
    );
    cfg.finalize.max_bullets_per_section = env_or_usize(
        "DIGEST_MAX_BULLETS_PER_SECTION",
        cfg.finalize.max_bullets_per_section,
    );
    cfg.finalize.title = env_or_string("DIGEST_TITLE", &cfg.finalize.title);
    cfg.finalize.timezone = env_or_string("DIGEST_TIMEZONE", &cfg.finalize.timezone);
    cfg.links.base_url = env_or_string("DIGEST_LINK_BASE_URL", &cfg.links.base_url);

    if let Ok(raw) = env::var("DIGEST_CATEGORIES") {
        let parsed = parse_categories_csv(&raw, &cfg.taxonomy.uncategorized.marker);
        if !parsed.is_empty() {
            cfg.taxonomy.categories = parsed;
        }
    }
}

pub fn load_config(paths: &DigestPaths) -> Result<DigestConfig> {
    let mut cfg = DigestConfig::default();
    merge_file_config(&mut cfg, &paths.config_file)?;
    apply_env_overrides(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}
