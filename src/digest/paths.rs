use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct DigestPaths {
    pub digest_home: PathBuf,
    pub output_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub config_file: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<DigestPaths> {
    let home = required_home_dir()?;
    let digest_home = env_or_default_path("DIGEST_HOME", home.join(".chat-digest"));

    let output_dir = env_or_default_path("DIGEST_OUTPUT_DIR", digest_home.join("output"));
    let logs_dir = env_or_default_path("DIGEST_LOGS_DIR", digest_home.join("logs"));
    let config_file = env_or_default_path("DIGEST_CONFIG_PATH", digest_home.join("digest.toml"));

    Ok(DigestPaths {
        digest_home,
        output_dir,
        logs_dir,
        config_file,
    })
}
