use crate::commands::CommandReport;
use crate::digest::config;
use crate::digest::paths;
use crate::digest::provider;
use anyhow::Result;
use std::env;

include!(concat!(env!("OUT_DIR"), "/digest_env_allowlist.rs"));

fn unknown_digest_env_vars<I>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut unknown: Vec<String> = keys
        .into_iter()
        .filter(|key| key.starts_with("DIGEST_"))
        .filter(|key| !GENERATED_DIGEST_ENV_ALLOWLIST.contains(&key.as_str()))
        .collect();
    unknown.sort();
    unknown
}

pub fn run() -> Result<CommandReport> {
    let paths = paths::resolve_paths()?;
    let mut report = CommandReport::new("config");
    let cfg = config::load_config(&paths)?;

    report.detail(format!("digest_home={}", paths.digest_home.display()));
    report.detail(format!(
        "config_file={} exists={}",
        paths.config_file.display(),
        paths.config_file.exists()
    ));
    report.detail(format!("output_dir={}", paths.output_dir.display()));
    report.detail(format!(
        "generator={}",
        provider::build_generator(&cfg.generation, &cfg.taxonomy)?.label()
    ));
    report.detail(format!(
        "categories={}",
        cfg.taxonomy
            .categories
            .iter()
            .map(|c| format!("{}={}", c.name, c.marker))
            .collect::<Vec<_>>()
            .join(",")
    ));

    let rendered = toml::to_string_pretty(&cfg)?;
    for line in rendered.lines().filter(|l| !l.trim().is_empty()) {
        report.detail(line.to_string());
    }

    for key in unknown_digest_env_vars(env::vars().map(|(k, _)| k)) {
        report.detail(format!("warning: unknown env var {key}"));
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::unknown_digest_env_vars;

    #[test]
    fn flags_only_unknown_digest_keys() {
        // built at runtime so the allowlist scan never picks it up
        let typo = format!("DIGEST_{}", "MAX_CHUNK_TOKEN");
        let keys = vec![
            "DIGEST_HOME".to_string(),
            "DIGEST_MAX_CHUNK_TOKENS".to_string(),
            typo.clone(),
            "PATH".to_string(),
        ];
        assert_eq!(unknown_digest_env_vars(keys), vec![typo]);
    }
}
