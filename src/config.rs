#![forbid(unsafe_code)]

use crate::quality::{AudioQuality, VideoQuality};
use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_CACHE_FILE: &str = "likes.json";
pub const DEFAULT_OUTPUT_DIR: &str = "videos";
pub const DEFAULT_API_BASE: &str = "https://coub.com/api/v2";

/// Everything a single archival run needs to know before it touches the
/// network or the disk.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub api_token: Option<String>,
    pub api_base: String,
    pub video_quality: VideoQuality,
    pub audio_quality: AudioQuality,
    pub cache_path: PathBuf,
    pub output_dir: PathBuf,
    pub work_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl RunConfig {
    /// The token is only needed when the listing has to be fetched, so a run
    /// that reuses an existing cache works without it.
    pub fn require_token(&self) -> Result<&str> {
        self.api_token
            .as_deref()
            .ok_or_else(|| anyhow!("API_TOKEN environment variable must be specified"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub env_path: Option<PathBuf>,
    pub cache_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

pub fn resolve_run_config(overrides: ConfigOverrides) -> Result<RunConfig> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    build_run_config_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_run_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<RunConfig> {
    build_run_config_with_overrides(file_vars, env_lookup, ConfigOverrides::default())
}

fn build_run_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ConfigOverrides,
) -> Result<RunConfig> {
    let video_quality = match lookup_value("VIDEO_QUALITY", file_vars, &env_lookup) {
        Some(value) => value
            .parse::<VideoQuality>()
            .context("invalid VIDEO_QUALITY")?,
        None => VideoQuality::default(),
    };
    let audio_quality = match lookup_value("AUDIO_QUALITY", file_vars, &env_lookup) {
        Some(value) => value
            .parse::<AudioQuality>()
            .context("invalid AUDIO_QUALITY")?,
        None => AudioQuality::default(),
    };
    let api_token = lookup_value("API_TOKEN", file_vars, &env_lookup);
    let api_base = lookup_value("COUB_API_BASE", file_vars, &env_lookup)
        .map(|value| value.trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

    let work_dir = overrides.work_dir.unwrap_or_else(|| PathBuf::from("."));
    let cache_path = overrides
        .cache_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_FILE));
    let output_dir = overrides
        .output_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
    let log_dir = overrides.log_dir.unwrap_or_else(|| PathBuf::from("."));

    Ok(RunConfig {
        api_token,
        api_base,
        video_quality,
        audio_quality,
        cache_path,
        output_dir,
        work_dir,
        log_dir,
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string())
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    let present = |value: &String| !value.trim().is_empty();
    env_lookup(key)
        .filter(present)
        .or_else(|| file_vars.get(key).cloned().filter(present))
}

/// Reads `KEY=value` pairs from a dotenv-style file. A missing file yields no
/// values.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
    };
    Ok(content
        .lines()
        .filter_map(parse_env_line)
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect())
}

/// Accepts an optional `export ` prefix and one layer of matching quotes.
fn parse_env_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, unquote(value.trim())))
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .into_iter()
        .find_map(|quote| value.strip_prefix(quote)?.strip_suffix(quote))
        .unwrap_or(value)
}
