use anyhow::{Context, Result, bail};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use crate::catalog::DEFAULT_MAX_VIDEOS;
use crate::comments::DEFAULT_MAX_COMMENTS;
use crate::export::{DEFAULT_DATE_FORMAT, is_valid_date_format};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/tubeharvest-env";
pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";
pub const DEFAULT_PAGE_DELAY_MS: u64 = 200;
pub const DEFAULT_ITEM_DELAY_MS: u64 = 1000;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_OUTPUT_DIR: &str = "exports";
pub const API_KEY_ENV: &str = "YOUTUBE_API_KEY";

#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub api_key: Option<String>,
    pub api_base_url: Option<String>,
    pub max_comments: Option<usize>,
    pub max_videos: Option<usize>,
    pub page_delay_ms: Option<u64>,
    pub item_delay_ms: Option<u64>,
    pub http_timeout_secs: Option<u64>,
    pub output_dir: Option<PathBuf>,
    pub csv_date_format: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub max_comments: usize,
    pub max_videos: usize,
    pub page_delay: Duration,
    pub item_delay: Duration,
    pub http_timeout: Duration,
    pub output_dir: PathBuf,
    pub csv_date_format: String,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            max_comments: DEFAULT_MAX_COMMENTS,
            max_videos: DEFAULT_MAX_VIDEOS,
            page_delay: Duration::from_millis(DEFAULT_PAGE_DELAY_MS),
            item_delay: Duration::from_millis(DEFAULT_ITEM_DELAY_MS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            csv_date_format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            let value = value_raw.trim().trim_matches('"');
            match key.trim() {
                "YOUTUBE_API_KEY" => cfg.api_key = non_empty(value),
                "API_BASE_URL" => cfg.api_base_url = non_empty(value),
                "MAX_COMMENTS" => cfg.max_comments = Some(parse_value(key, value, path)?),
                "MAX_VIDEOS" => cfg.max_videos = Some(parse_value(key, value, path)?),
                "PAGE_DELAY_MS" => cfg.page_delay_ms = Some(parse_value(key, value, path)?),
                "ITEM_DELAY_MS" => cfg.item_delay_ms = Some(parse_value(key, value, path)?),
                "HTTP_TIMEOUT_SECS" => {
                    cfg.http_timeout_secs = Some(parse_value(key, value, path)?)
                }
                "OUTPUT_DIR" => cfg.output_dir = non_empty(value).map(PathBuf::from),
                "CSV_DATE_FORMAT" => {
                    if !is_valid_date_format(value) {
                        bail!(
                            "CSV_DATE_FORMAT {:?} in {} is not a valid strftime pattern",
                            value,
                            path.display()
                        );
                    }
                    cfg.csv_date_format = non_empty(value);
                }
                _ => {}
            }
        }
    }
    Ok(Some(cfg))
}

/// Reads the env file when present and falls back to defaults otherwise. The
/// `YOUTUBE_API_KEY` environment variable wins over the file.
pub fn load_settings_from(path: impl AsRef<Path>) -> Result<HarvestSettings> {
    let settings = settings_from_file(path.as_ref())?;
    Ok(apply_env_overrides(settings, |name| std::env::var(name).ok()))
}

fn settings_from_file(path: &Path) -> Result<HarvestSettings> {
    let defaults = HarvestSettings::default();
    let Some(cfg) = read_env_config(path)? else {
        return Ok(defaults);
    };
    Ok(HarvestSettings {
        api_key: cfg.api_key,
        api_base_url: cfg.api_base_url.unwrap_or(defaults.api_base_url),
        max_comments: cfg.max_comments.unwrap_or(defaults.max_comments).max(1),
        max_videos: cfg.max_videos.unwrap_or(defaults.max_videos).max(1),
        page_delay: cfg
            .page_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.page_delay),
        item_delay: cfg
            .item_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.item_delay),
        http_timeout: cfg
            .http_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.http_timeout),
        output_dir: cfg.output_dir.unwrap_or(defaults.output_dir),
        csv_date_format: cfg.csv_date_format.unwrap_or(defaults.csv_date_format),
    })
}

fn apply_env_overrides<F>(mut settings: HarvestSettings, lookup: F) -> HarvestSettings
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = lookup(API_KEY_ENV).as_deref().and_then(non_empty) {
        settings.api_key = Some(key);
    }
    settings
}

fn parse_value<T>(key: &str, value: &str, path: &Path) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Parsing {} from {}", key.trim(), path.display()))
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn read_env_config_extracts_limits() {
        let cfg = make_config("MAX_COMMENTS=\"250\"\nMAX_VIDEOS=\"40\"\nPAGE_DELAY_MS=\"0\"\n");
        let parsed = read_env_config(cfg.path()).unwrap().unwrap();
        assert_eq!(parsed.max_comments, Some(250));
        assert_eq!(parsed.max_videos, Some(40));
        assert_eq!(parsed.page_delay_ms, Some(0));
    }

    #[test]
    fn read_env_config_rejects_bad_numbers() {
        let cfg = make_config("MAX_COMMENTS=\"lots\"\n");
        let err = read_env_config(cfg.path()).unwrap_err();
        assert!(err.to_string().contains("MAX_COMMENTS"));
    }

    #[test]
    fn read_env_config_rejects_bad_date_format() {
        let cfg = make_config("CSV_DATE_FORMAT=\"%Q\"\n");
        assert!(read_env_config(cfg.path()).is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_from_file(&dir.path().join("absent-env")).unwrap();
        assert_eq!(settings.max_comments, DEFAULT_MAX_COMMENTS);
        assert_eq!(settings.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(settings.output_dir, PathBuf::from(DEFAULT_OUTPUT_DIR));
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn settings_clamp_zero_caps() {
        let cfg = make_config("MAX_COMMENTS=\"0\"\nMAX_VIDEOS=\"0\"\n");
        let settings = settings_from_file(cfg.path()).unwrap();
        assert_eq!(settings.max_comments, 1);
        assert_eq!(settings.max_videos, 1);
    }

    #[test]
    fn file_values_replace_defaults() {
        let cfg = make_config(
            "# harvest config\nYOUTUBE_API_KEY=\"from-file\"\nOUTPUT_DIR=\"/tmp/out\"\nITEM_DELAY_MS=\"50\"\nCSV_DATE_FORMAT=\"%Y-%m-%d\"\n",
        );
        let settings = settings_from_file(cfg.path()).unwrap();
        assert_eq!(settings.api_key.as_deref(), Some("from-file"));
        assert_eq!(settings.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(settings.item_delay, Duration::from_millis(50));
        assert_eq!(settings.csv_date_format, "%Y-%m-%d");
    }

    #[test]
    fn environment_key_overrides_file() {
        let cfg = make_config("YOUTUBE_API_KEY=\"from-file\"\n");
        let settings = settings_from_file(cfg.path()).unwrap();
        let settings = apply_env_overrides(settings, |name| {
            (name == API_KEY_ENV).then(|| "from-env".to_string())
        });
        assert_eq!(settings.api_key.as_deref(), Some("from-env"));
    }

    #[test]
    fn blank_environment_key_is_ignored() {
        let cfg = make_config("YOUTUBE_API_KEY=\"from-file\"\n");
        let settings = settings_from_file(cfg.path()).unwrap();
        let settings = apply_env_overrides(settings, |_| Some("   ".to_string()));
        assert_eq!(settings.api_key.as_deref(), Some("from-file"));
    }
}
