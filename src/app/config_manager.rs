//! Configuration lifecycle: load file config, merge CLI, resolve retry settings.

use std::path::PathBuf;

use anyhow::Result;

use crate::app::config_file::load_file_config;
use crate::app::config_runtime::{self, CliValueSources, RetrySettings};
use crate::cli::Args;

/// Effective settings for one run.
pub(crate) struct ResolvedConfig {
    pub(crate) args: Args,
    pub(crate) retry: RetrySettings,
    pub(crate) restore_paused: bool,
    /// Config file consulted, whether or not it existed.
    pub(crate) config_path: Option<PathBuf>,
}

/// Loads the file config (`--config` or the default path), merges CLI
/// overrides, and resolves the file-only settings.
pub(crate) fn resolve_config(args: &Args, cli_sources: &CliValueSources) -> Result<ResolvedConfig> {
    let loaded = load_file_config(args.config.as_deref())?;
    let file_config = loaded.config.as_ref();
    let merged = config_runtime::apply_config_defaults(args.clone(), cli_sources, file_config)?;
    let retry = config_runtime::resolve_retry_settings(file_config);
    let restore_paused = file_config
        .and_then(|cfg| cfg.restore_paused)
        .unwrap_or(false);

    Ok(ResolvedConfig {
        args: merged,
        retry,
        restore_paused,
        config_path: loaded.path,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::resolve_config;
    use crate::app::config_runtime::CliValueSources;
    use crate::cli::Args;
    use clap::Parser;
    use tempfile::TempDir;
    use ytdl_queue::DEFAULT_CONCURRENCY;

    /// With no config file (`XDG_CONFIG_HOME` pointing at an empty temp dir),
    /// `resolve_config` succeeds and returns defaults.
    #[test]
    fn test_resolve_config_no_config_file_returns_defaults() {
        let temp = TempDir::new().unwrap();
        let prev = std::env::var_os("XDG_CONFIG_HOME");
        // SAFETY: test isolates env change and restores on drop.
        unsafe {
            std::env::set_var("XDG_CONFIG_HOME", temp.path());
        }
        let _restore = RestoreEnv::new("XDG_CONFIG_HOME", prev);

        let args = Args::try_parse_from(["ytdl-queue"]).unwrap();
        let resolved = resolve_config(&args, &CliValueSources::default()).unwrap();

        assert_eq!(resolved.args.concurrency, DEFAULT_CONCURRENCY as u8);
        assert!(resolved.args.output_dir.is_none());
        assert!(!resolved.restore_paused);
        assert_eq!(
            resolved.config_path,
            Some(temp.path().join("ytdl-queue").join("config.toml"))
        );
    }

    #[test]
    fn test_resolve_config_explicit_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.toml");
        std::fs::write(
            &path,
            "concurrency = 5\nrestore_paused = true\nretry_base_delay_ms = 100\n",
        )
        .unwrap();

        let args =
            Args::try_parse_from(["ytdl-queue", "--config", path.to_str().unwrap()]).unwrap();
        let resolved = resolve_config(&args, &CliValueSources::default()).unwrap();

        assert_eq!(resolved.args.concurrency, 5);
        assert!(resolved.restore_paused);
        assert_eq!(resolved.retry.base_delay, Duration::from_millis(100));
        assert_eq!(resolved.config_path, Some(path));
    }

    #[test]
    fn test_resolve_config_invalid_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.toml");
        std::fs::write(&path, "concurrency = 99\n").unwrap();

        let args =
            Args::try_parse_from(["ytdl-queue", "--config", path.to_str().unwrap()]).unwrap();
        let err = resolve_config(&args, &CliValueSources::default())
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("concurrency"));
    }

    /// Restores an env var to its previous value (or removes it) when dropped.
    struct RestoreEnv {
        key: &'static str,
        value: Option<std::ffi::OsString>,
    }
    impl RestoreEnv {
        fn new(key: &'static str, value: Option<std::ffi::OsString>) -> Self {
            Self { key, value }
        }
    }
    impl Drop for RestoreEnv {
        fn drop(&mut self) {
            // SAFETY: test restores env to prior state.
            match &self.value {
                Some(v) => unsafe { std::env::set_var(self.key, v) },
                None => unsafe { std::env::remove_var(self.key) },
            }
        }
    }
}
