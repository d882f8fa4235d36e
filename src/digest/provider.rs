use crate::digest::config::{CategorySpec, GenerationConfig, TaxonomyConfig};
use crate::digest::util::truncate_with_ellipsis;
use anyhow::{Context, Result};
use regex::Regex;
use reqwest::blocking::Client;
use serde_json::Value;
use std::env;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

/// Text generation backend. Implementations must be callable from many
/// worker threads at once.
pub trait Generator: Send + Sync {
    fn generate(&self, prompt: &str, max_output_tokens: usize) -> Result<String>;
    fn label(&self) -> String;
}

const SIGNAL_KEYWORDS: [(&str, &[&str]); 7] = [
    ("release", &["Announcements", "Development"]),
    ("launch", &["Announcements"]),
    ("announce", &["Announcements"]),
    ("fix", &["Development"]),
    ("merge", &["Development"]),
    ("deploy", &["Infrastructure", "Development"]),
    ("decision", &["Community"]),
];
const MAX_SIGNAL_LINES: usize = 20;
const MAX_LOCAL_TEXT_CHARS: usize = 240;
const LOCAL_PRIORITY: f64 = 0.6;

static TRANSCRIPT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^- \[\d{4}-\d{2}-\d{2} \d{2}:\d{2}\] .+? <(\S+)>(?: \(reply to [^)]*\))?: (.+)$")
        .expect("transcript line regex")
});

/// Offline generator: turns transcript lines carrying release/fix/deploy
/// style signals into bullets without calling any model.
pub struct LocalGenerator {
    taxonomy: TaxonomyConfig,
}

impl LocalGenerator {
    pub fn new(taxonomy: TaxonomyConfig) -> Self {
        Self { taxonomy }
    }

    fn category_named(&self, preferred: &[&str]) -> &CategorySpec {
        preferred
            .iter()
            .find_map(|name| self.taxonomy.find(name))
            .unwrap_or(&self.taxonomy.uncategorized)
    }

    fn signal_category(&self, text: &str) -> Option<&CategorySpec> {
        let lower = text.to_ascii_lowercase();
        let (_, preferred) = SIGNAL_KEYWORDS.iter().find(|(kw, _)| lower.contains(kw))?;
        Some(self.category_named(preferred))
    }
}

/// Worded markers are left out; validation restores them from the taxonomy.
fn local_bullet(spec: &CategorySpec, text: &str, link: &str) -> String {
    let marker = if spec.marker.chars().any(char::is_alphanumeric) {
        String::new()
    } else {
        format!("[{}] ", spec.marker)
    };
    format!(
        "- {marker}[{}] ({LOCAL_PRIORITY}) {} <{link}>",
        spec.name,
        truncate_with_ellipsis(text, MAX_LOCAL_TEXT_CHARS)
    )
}

impl Generator for LocalGenerator {
    fn generate(&self, prompt: &str, _max_output_tokens: usize) -> Result<String> {
        let mut lines = Vec::new();
        let mut first: Option<(String, String)> = None;
        for line in prompt.lines().map(str::trim) {
            let Some(caps) = TRANSCRIPT_LINE.captures(line) else {
                continue;
            };
            let (link, text) = (&caps[1], caps[2].trim());
            if first.is_none() {
                first = Some((link.to_string(), text.to_string()));
            }
            let Some(spec) = self.signal_category(text) else {
                continue;
            };
            lines.push(local_bullet(spec, text, link));
            if lines.len() >= MAX_SIGNAL_LINES {
                break;
            }
        }
        if lines.is_empty() {
            // no signal lines: summarize the opening message instead
            return Ok(match first {
                Some((link, text)) => local_bullet(self.category_named(&["Community"]), &text, &link),
                None => "NONE".to_string(),
            });
        }
        Ok(lines.join("\n"))
    }

    fn label(&self) -> String {
        "local".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteProvider {
    OpenAi,
    Anthropic,
    Gemini,
    OpenAiCompatible,
}

/// Static description of a hosted API: how users name it, which models
/// belong to it, where its key lives and where its reply text sits.
struct ProviderSpec {
    provider: RemoteProvider,
    label: &'static str,
    aliases: &'static [&'static str],
    model_prefixes: &'static [&'static str],
    default_model: &'static str,
    /// Checked in order; the first one also marks the provider as available.
    key_vars: &'static [&'static str],
    /// Candidate JSON paths to the reply text, tried in order. `*` walks
    /// every array element, digits index into an array.
    text_paths: &'static [&'static [&'static str]],
}

/// Ordered by preference when only a key is configured.
static PROVIDERS: [ProviderSpec; 4] = [
    ProviderSpec {
        provider: RemoteProvider::OpenAiCompatible,
        label: "openai-compatible",
        aliases: &["openai-compatible", "compatible", "deepseek"],
        model_prefixes: &["deepseek-"],
        default_model: "deepseek-chat",
        key_vars: &["AI_API_KEY", "DEEPSEEK_API_KEY", "OPENAI_API_KEY"],
        text_paths: &[&["choices", "0", "message", "content"]],
    },
    ProviderSpec {
        provider: RemoteProvider::OpenAi,
        label: "openai",
        aliases: &["openai"],
        model_prefixes: &["gpt-", "o1", "o3", "o4"],
        default_model: "gpt-4.1-mini",
        key_vars: &["OPENAI_API_KEY", "AI_API_KEY"],
        text_paths: &[&["output_text"], &["output", "*", "content"]],
    },
    ProviderSpec {
        provider: RemoteProvider::Anthropic,
        label: "anthropic",
        aliases: &["anthropic", "claude"],
        model_prefixes: &["claude-"],
        default_model: "claude-3-5-haiku-latest",
        key_vars: &["ANTHROPIC_API_KEY", "AI_API_KEY"],
        text_paths: &[&["content"]],
    },
    ProviderSpec {
        provider: RemoteProvider::Gemini,
        label: "gemini",
        aliases: &["gemini", "google"],
        model_prefixes: &["gemini-"],
        default_model: "gemini-2.5-flash-lite",
        key_vars: &["GEMINI_API_KEY", "AI_API_KEY"],
        text_paths: &[&["candidates", "0", "content", "parts"]],
    },
];

const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";

impl RemoteProvider {
    fn spec(self) -> &'static ProviderSpec {
        PROVIDERS
            .iter()
            .find(|spec| spec.provider == self)
            .unwrap_or(&PROVIDERS[0])
    }

    pub fn label(self) -> &'static str {
        self.spec().label
    }

    fn from_alias(raw: &str) -> Option<Self> {
        let wanted = raw.trim().to_ascii_lowercase();
        PROVIDERS
            .iter()
            .find(|spec| spec.aliases.contains(&wanted.as_str()))
            .map(|spec| spec.provider)
    }

    fn for_model(model: &str) -> Option<Self> {
        let lower = model.trim().to_ascii_lowercase();
        PROVIDERS
            .iter()
            .find(|spec| spec.model_prefixes.iter().any(|p| lower.starts_with(p)))
            .map(|spec| spec.provider)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteModelConfig {
    pub provider: RemoteProvider,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
}

fn trimmed_env(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `provider:model` names pick the provider explicitly; anything else is a bare model.
fn split_provider_prefix(raw: &str) -> (Option<RemoteProvider>, String) {
    let raw = raw.trim();
    raw.split_once(':')
        .and_then(|(prefix, model)| {
            RemoteProvider::from_alias(prefix).map(|p| (Some(p), model.trim().to_string()))
        })
        .unwrap_or_else(|| (None, raw.to_string()))
}

/// Provider and credential resolution over an arbitrary variable lookup.
fn resolve_remote_config_from(lookup: &dyn Fn(&str) -> Option<String>) -> Option<RemoteModelConfig> {
    let requested = lookup("DIGEST_PROVIDER");
    if requested
        .as_deref()
        .is_some_and(|v| v.eq_ignore_ascii_case("local"))
    {
        return None;
    }

    let (prefixed, model) = lookup("DIGEST_MODEL")
        .or_else(|| lookup("AI_MODEL"))
        .map(|raw| split_provider_prefix(&raw))
        .unwrap_or((None, String::new()));
    let provider = requested
        .as_deref()
        .and_then(RemoteProvider::from_alias)
        .or(prefixed)
        .or_else(|| RemoteProvider::for_model(&model))
        .or_else(|| {
            PROVIDERS
                .iter()
                .find(|spec| lookup(spec.key_vars[0]).is_some())
                .map(|spec| spec.provider)
        })?;

    let spec = provider.spec();
    let api_key = spec.key_vars.iter().find_map(|var| lookup(var))?;
    let model = if model.is_empty() {
        spec.default_model.to_string()
    } else {
        model
    };
    let base_url = (provider == RemoteProvider::OpenAiCompatible)
        .then(|| {
            lookup("AI_BASE_URL").or_else(|| {
                model
                    .to_ascii_lowercase()
                    .starts_with("deepseek-")
                    .then(|| DEEPSEEK_BASE_URL.to_string())
            })
        })
        .flatten();
    Some(RemoteModelConfig {
        provider,
        model,
        api_key,
        base_url,
    })
}

pub fn resolve_remote_config() -> Option<RemoteModelConfig> {
    resolve_remote_config_from(&trimmed_env)
}

fn collect_texts<'a>(value: &'a Value, path: &[&str], out: &mut Vec<&'a str>) {
    match path.split_first() {
        None => match value {
            Value::String(text) => out.push(text),
            Value::Array(parts) => {
                out.extend(parts.iter().filter_map(|p| p.get("text").and_then(Value::as_str)))
            }
            _ => {}
        },
        Some((&"*", rest)) => {
            for item in value.as_array().into_iter().flatten() {
                collect_texts(item, rest, out);
            }
        }
        Some((key, rest)) => {
            let next = match key.parse::<usize>() {
                Ok(index) => value.get(index),
                Err(_) => value.get(*key),
            };
            if let Some(next) = next {
                collect_texts(next, rest, out);
            }
        }
    }
}

/// Reply text for `provider`, joined across content parts.
fn response_text(provider: RemoteProvider, json: &Value) -> Option<String> {
    provider.spec().text_paths.iter().find_map(|path| {
        let mut texts = Vec::new();
        collect_texts(json, path, &mut texts);
        (!texts.is_empty()).then(|| texts.join("\n"))
    })
}

/// Blocking HTTP generator for the hosted model APIs.
pub struct RemoteGenerator {
    remote: RemoteModelConfig,
    client: Client,
    temperature: f64,
}

impl RemoteGenerator {
    pub fn new(remote: RemoteModelConfig, cfg: &GenerationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            remote,
            client,
            temperature: cfg.temperature,
        })
    }

    fn post_json(
        &self,
        request: reqwest::blocking::RequestBuilder,
        payload: &Value,
    ) -> Result<Value> {
        let label = self.remote.provider.label();
        let response = request
            .json(payload)
            .send()
            .with_context(|| format!("{label} request failed"))?;
        if !response.status().is_success() {
            anyhow::bail!("{label} call failed with status {}", response.status());
        }
        response
            .json()
            .with_context(|| format!("{label} returned a non-json body"))
    }
}

impl Generator for RemoteGenerator {
    fn generate(&self, prompt: &str, max_output_tokens: usize) -> Result<String> {
        let RemoteModelConfig {
            provider,
            model,
            api_key,
            base_url,
        } = &self.remote;

        let reply = match provider {
            RemoteProvider::OpenAi => {
                let payload = serde_json::json!({
                    "model": model,
                    "input": prompt,
                    "max_output_tokens": max_output_tokens,
                    "temperature": self.temperature
                });
                let request = self
                    .client
                    .post("https://api.openai.com/v1/responses")
                    .bearer_auth(api_key);
                self.post_json(request, &payload)?
            }
            RemoteProvider::Anthropic => {
                let payload = serde_json::json!({
                    "model": model,
                    "max_tokens": max_output_tokens,
                    "temperature": self.temperature,
                    "messages": [{"role": "user", "content": prompt}]
                });
                let request = self
                    .client
                    .post("https://api.anthropic.com/v1/messages")
                    .header("x-api-key", api_key)
                    .header("anthropic-version", "2023-06-01");
                self.post_json(request, &payload)?
            }
            RemoteProvider::Gemini => {
                let url = format!(
                    "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent"
                );
                let payload = serde_json::json!({
                    "contents": [{"parts": [{"text": prompt}]}],
                    "generationConfig": {
                        "maxOutputTokens": max_output_tokens,
                        "temperature": self.temperature
                    }
                });
                let request = self.client.post(&url).header("x-goog-api-key", api_key);
                self.post_json(request, &payload)?
            }
            RemoteProvider::OpenAiCompatible => {
                let base = base_url
                    .as_deref()
                    .context("openai-compatible provider requires AI_BASE_URL")?
                    .trim_end_matches('/');
                let payload = serde_json::json!({
                    "model": model,
                    "messages": [{"role": "user", "content": prompt}],
                    "max_tokens": max_output_tokens,
                    "temperature": self.temperature
                });
                let request = self
                    .client
                    .post(format!("{base}/v1/chat/completions"))
                    .bearer_auth(api_key);
                self.post_json(request, &payload)?
            }
        };
        response_text(*provider, &reply)
            .with_context(|| format!("{} response missing text content", provider.label()))
    }

    fn label(&self) -> String {
        format!("{}:{}", self.remote.provider.label(), self.remote.model)
    }
}

/// Remote generator when credentials resolve, local otherwise.
pub fn build_generator(
    cfg: &GenerationConfig,
    taxonomy: &TaxonomyConfig,
) -> Result<Arc<dyn Generator>> {
    match resolve_remote_config() {
        Some(remote) => Ok(Arc::new(RemoteGenerator::new(remote, cfg)?)),
        None => Ok(Arc::new(LocalGenerator::new(taxonomy.clone()))),
    }
}
