//! File configuration loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use ytdl_queue::PausePolicy;
use ytdl_queue::config::{MAX_CONCURRENCY, MIN_CONCURRENCY};

/// Flat `key = value` file configuration. Every field is optional; CLI flags
/// given explicitly win over file values.
#[derive(Debug, Clone, Default)]
pub(crate) struct FileConfig {
    pub(crate) output_dir: Option<PathBuf>,
    pub(crate) archive_file: Option<PathBuf>,
    pub(crate) state_db: Option<PathBuf>,
    pub(crate) concurrency: Option<u8>,
    /// Total attempts per item, including the first.
    pub(crate) max_retries: Option<u8>,
    pub(crate) retry_base_delay_ms: Option<u64>,
    pub(crate) retry_max_delay_ms: Option<u64>,
    pub(crate) attempt_timeout_secs: Option<u64>,
    pub(crate) pause_policy: Option<PausePolicy>,
    /// Start paused when the previous run ended paused.
    pub(crate) restore_paused: Option<bool>,
    pub(crate) cookies_file: Option<PathBuf>,
    /// Passed through to `yt-dlp --limit-rate`.
    pub(crate) rate_limit: Option<String>,
    /// MP3 bitrate in kbps.
    pub(crate) audio_quality: Option<u32>,
    pub(crate) max_filesize: Option<u64>,
    pub(crate) write_thumbnail: Option<bool>,
    pub(crate) write_info_json: Option<bool>,
    pub(crate) embed_thumbnail: Option<bool>,
    pub(crate) embed_chapters: Option<bool>,
    pub(crate) yt_dlp_path: Option<PathBuf>,
    pub(crate) verbosity: Option<VerbositySetting>,
}

impl FileConfig {
    /// Validates config values against the CLI ranges.
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(concurrency) = self.concurrency
            && !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&usize::from(concurrency))
        {
            bail!(
                "Invalid config value for `concurrency`: {concurrency}. Expected range: {MIN_CONCURRENCY}..={MAX_CONCURRENCY}"
            );
        }

        if let Some(max_retries) = self.max_retries
            && !(1..=10).contains(&max_retries)
        {
            bail!("Invalid config value for `max_retries`: {max_retries}. Expected range: 1..=10");
        }

        validate_range_u64("retry_base_delay_ms", self.retry_base_delay_ms, 0, 600_000)?;
        validate_range_u64("retry_max_delay_ms", self.retry_max_delay_ms, 0, 3_600_000)?;
        validate_range_u64("attempt_timeout_secs", self.attempt_timeout_secs, 1, 86_400)?;
        validate_range_u64(
            "audio_quality",
            self.audio_quality.map(u64::from),
            32,
            320,
        )?;
        validate_range_u64("max_filesize", self.max_filesize, 1, u64::MAX)?;

        if let (Some(base), Some(max)) = (self.retry_base_delay_ms, self.retry_max_delay_ms)
            && base > max
        {
            bail!(
                "Invalid config: `retry_base_delay_ms` ({base}) is greater than `retry_max_delay_ms` ({max})"
            );
        }

        Ok(())
    }
}

fn validate_range_u64(field: &str, value: Option<u64>, min: u64, max: u64) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(min..=max).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: {min}..={max}");
    }
    Ok(())
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub(crate) struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub(crate) path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub(crate) config: Option<FileConfig>,
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/ytdl-queue/config.toml`
/// 2. `$HOME/.config/ytdl-queue/config.toml`
#[must_use]
pub(crate) fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("ytdl-queue")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("ytdl-queue")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from `explicit` when given (it must exist), otherwise from
/// the default path if a file is present there.
pub(crate) fn load_file_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = read_config_file(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: Some(config),
        });
    }

    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path_ref) if path_ref.exists() => Some(read_config_file(path_ref)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

fn read_config_file(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let line_no = line_index + 1;

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "output_dir" => {
                cfg.output_dir = Some(parse_path(value).with_context(invalid)?);
            }
            "archive_file" => {
                cfg.archive_file = Some(parse_path(value).with_context(invalid)?);
            }
            "state_db" => {
                cfg.state_db = Some(parse_path(value).with_context(invalid)?);
            }
            "cookies_file" => {
                cfg.cookies_file = Some(parse_path(value).with_context(invalid)?);
            }
            "yt_dlp_path" => {
                cfg.yt_dlp_path = Some(parse_path(value).with_context(invalid)?);
            }
            "rate_limit" => {
                cfg.rate_limit = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "concurrency" => {
                cfg.concurrency = Some(parse_integer_u8(value).with_context(invalid)?);
            }
            "max_retries" => {
                cfg.max_retries = Some(parse_integer_u8(value).with_context(invalid)?);
            }
            "retry_base_delay_ms" => {
                cfg.retry_base_delay_ms = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "retry_max_delay_ms" => {
                cfg.retry_max_delay_ms = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "attempt_timeout_secs" => {
                cfg.attempt_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "restore_paused" => {
                cfg.restore_paused = Some(parse_boolean(value).with_context(invalid)?);
            }
            "audio_quality" => {
                let kbps = parse_integer_u64(value).with_context(invalid)?;
                cfg.audio_quality = Some(
                    u32::try_from(kbps)
                        .map_err(|_| anyhow::anyhow!("Integer value out of range for u32"))
                        .with_context(invalid)?,
                );
            }
            "max_filesize" => {
                cfg.max_filesize = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "write_thumbnail" => {
                cfg.write_thumbnail = Some(parse_boolean(value).with_context(invalid)?);
            }
            "write_info_json" => {
                cfg.write_info_json = Some(parse_boolean(value).with_context(invalid)?);
            }
            "embed_thumbnail" => {
                cfg.embed_thumbnail = Some(parse_boolean(value).with_context(invalid)?);
            }
            "embed_chapters" => {
                cfg.embed_chapters = Some(parse_boolean(value).with_context(invalid)?);
            }
            "pause_policy" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                let policy = parsed
                    .parse::<PausePolicy>()
                    .map_err(anyhow::Error::msg)
                    .with_context(invalid)?;
                cfg.pause_policy = Some(policy);
            }
            "verbosity" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(|| {
                    format!("Invalid `verbosity` value '{parsed}' on line {line_no}")
                })?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_path(raw_value: &str) -> Result<PathBuf> {
    let parsed = parse_string_literal(raw_value)?;
    if parsed.trim().is_empty() {
        bail!("Expected non-empty path");
    }
    Ok(PathBuf::from(parsed))
}

fn parse_integer_u8(raw_value: &str) -> Result<u8> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<u16>()?;
    u8::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u8"))
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str(
            r#"
concurrency = 4
verbosity = "verbose"
"#,
        )
        .expect("partial config should parse");
        assert_eq!(cfg.concurrency, Some(4));
        assert_eq!(cfg.verbosity, Some(VerbositySetting::Verbose));
        assert!(cfg.output_dir.is_none());
        assert!(cfg.pause_policy.is_none());
    }

    #[test]
    fn test_parse_config_all_fields() {
        let cfg = parse_config_str(
            r#"
output_dir = "/media/videos"
archive_file = "/media/archive.txt"
state_db = "/media/state.db"
concurrency = 3
max_retries = 5
retry_base_delay_ms = 500
retry_max_delay_ms = 30000
attempt_timeout_secs = 600
pause_policy = "interrupt"
restore_paused = true
cookies_file = "/home/me/cookies.txt"
rate_limit = "2M"
yt_dlp_path = "/usr/local/bin/yt-dlp"
audio_quality = 256
max_filesize = 104857600
write_thumbnail = true
write_info_json = false
embed_thumbnail = true
embed_chapters = false
verbosity = "quiet"
"#,
        )
        .expect("full config should parse");
        assert_eq!(cfg.output_dir, Some(PathBuf::from("/media/videos")));
        assert_eq!(cfg.archive_file, Some(PathBuf::from("/media/archive.txt")));
        assert_eq!(cfg.state_db, Some(PathBuf::from("/media/state.db")));
        assert_eq!(cfg.concurrency, Some(3));
        assert_eq!(cfg.max_retries, Some(5));
        assert_eq!(cfg.retry_base_delay_ms, Some(500));
        assert_eq!(cfg.retry_max_delay_ms, Some(30_000));
        assert_eq!(cfg.attempt_timeout_secs, Some(600));
        assert_eq!(cfg.pause_policy, Some(PausePolicy::Interrupt));
        assert_eq!(cfg.restore_paused, Some(true));
        assert_eq!(cfg.cookies_file, Some(PathBuf::from("/home/me/cookies.txt")));
        assert_eq!(cfg.rate_limit.as_deref(), Some("2M"));
        assert_eq!(cfg.yt_dlp_path, Some(PathBuf::from("/usr/local/bin/yt-dlp")));
        assert_eq!(cfg.audio_quality, Some(256));
        assert_eq!(cfg.max_filesize, Some(104_857_600));
        assert_eq!(cfg.write_thumbnail, Some(true));
        assert_eq!(cfg.write_info_json, Some(false));
        assert_eq!(cfg.embed_thumbnail, Some(true));
        assert_eq!(cfg.embed_chapters, Some(false));
        assert_eq!(cfg.verbosity, Some(VerbositySetting::Quiet));
    }

    #[test]
    fn test_parse_config_rejects_invalid_concurrency() {
        let err = parse_config_str("concurrency = 0").expect_err("invalid concurrency expected");
        assert!(err.to_string().contains("concurrency"));

        let err = parse_config_str("concurrency = 17").expect_err("invalid concurrency expected");
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_max_retries() {
        let err = parse_config_str("max_retries = 11").expect_err("invalid max_retries expected");
        assert!(err.to_string().contains("max_retries"));
    }

    #[test]
    fn test_parse_config_rejects_base_delay_above_max_delay() {
        let err = parse_config_str("retry_base_delay_ms = 5000\nretry_max_delay_ms = 1000")
            .expect_err("inverted delays expected");
        assert!(err.to_string().contains("retry_base_delay_ms"));
    }

    #[test]
    fn test_parse_config_rejects_zero_attempt_timeout() {
        let err = parse_config_str("attempt_timeout_secs = 0").expect_err("zero timeout expected");
        assert!(err.to_string().contains("attempt_timeout_secs"));
    }

    #[test]
    fn test_parse_config_rejects_out_of_range_media_options() {
        let err = parse_config_str("audio_quality = 400").expect_err("bitrate too high expected");
        assert!(err.to_string().contains("audio_quality"));

        let err = parse_config_str("max_filesize = 0").expect_err("zero size expected");
        assert!(err.to_string().contains("max_filesize"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_pause_policy() {
        let err = parse_config_str(r#"pause_policy = "stop""#).expect_err("bad policy expected");
        assert!(err.to_string().contains("pause_policy"));
    }

    #[test]
    fn test_parse_config_rejects_numeric_values_with_trailing_tokens() {
        let err = parse_config_str("concurrency = 4 trailing")
            .expect_err("expected trailing token error");
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_parse_config_rejects_unquoted_path() {
        let err = parse_config_str("output_dir = /tmp/out").expect_err("unquoted path expected");
        assert!(err.to_string().contains("output_dir"));
    }

    #[test]
    fn test_parse_config_supports_inline_comments() {
        let cfg = parse_config_str(
            r#"
concurrency = 4 # workers
rate_limit = "500K#fast" # hash inside quotes is kept
"#,
        )
        .expect("config with comments should parse");
        assert_eq!(cfg.concurrency, Some(4));
        assert_eq!(cfg.rate_limit.as_deref(), Some("500K#fast"));
    }

    #[test]
    fn test_parse_config_rejects_missing_equals() {
        let err = parse_config_str("concurrency 4").expect_err("syntax error expected");
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_boolean() {
        let err = parse_config_str("restore_paused = yes").expect_err("invalid boolean expected");
        assert!(err.to_string().contains("restore_paused"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_keys() {
        let err = parse_config_str("unknown_key = 123").expect_err("unknown key error expected");
        assert!(err.to_string().contains("Unknown configuration key"));
        assert!(err.to_string().contains("unknown_key"));
    }

    #[test]
    fn test_load_file_config_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "concurrency = 5\n").unwrap();

        let loaded = load_file_config(Some(&path)).unwrap();
        assert_eq!(loaded.path.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.config.unwrap().concurrency, Some(5));
    }

    #[test]
    fn test_load_file_config_explicit_missing_path_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_file_config(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
