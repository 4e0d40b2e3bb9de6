use std::time::Duration;

use anyhow::{Result, bail};
use clap::{ArgMatches, CommandFactory, FromArgMatches, parser::ValueSource};
use ytdl_queue::config::{MAX_CONCURRENCY, MIN_CONCURRENCY};
use ytdl_queue::download::{DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};

use crate::app::config_file::{FileConfig, VerbositySetting};
use crate::cli::Args;

/// Which defaulted flags were typed on the command line. Only these need
/// tracking; `Option` flags are explicit whenever they are `Some`.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CliValueSources {
    pub(crate) concurrency: bool,
    pub(crate) max_retries: bool,
    pub(crate) pause_policy: bool,
    pub(crate) verbose: bool,
    pub(crate) quiet: bool,
}

/// Backoff bounds; only configurable from the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetrySettings {
    pub(crate) base_delay: Duration,
    pub(crate) max_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

pub(crate) fn parse_cli_with_sources() -> (Args, CliValueSources) {
    let matches = Args::command().get_matches();
    let args = Args::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    let sources = sources_from_matches(&matches);
    (args, sources)
}

fn sources_from_matches(matches: &ArgMatches) -> CliValueSources {
    CliValueSources {
        concurrency: is_commandline_value(matches, "concurrency"),
        max_retries: is_commandline_value(matches, "max_retries"),
        pause_policy: is_commandline_value(matches, "pause_policy"),
        verbose: is_commandline_value(matches, "verbose"),
        quiet: is_commandline_value(matches, "quiet"),
    }
}

fn is_commandline_value(matches: &ArgMatches, id: &str) -> bool {
    matches.value_source(id) == Some(ValueSource::CommandLine)
}

pub(crate) fn apply_config_defaults(
    mut args: Args,
    cli_sources: &CliValueSources,
    file_config: Option<&FileConfig>,
) -> Result<Args> {
    if let Some(file_config) = file_config {
        fill_if_unset(&mut args.output_dir, file_config.output_dir.as_ref());
        fill_if_unset(&mut args.archive, file_config.archive_file.as_ref());
        fill_if_unset(&mut args.state_db, file_config.state_db.as_ref());
        fill_if_unset(&mut args.cookies, file_config.cookies_file.as_ref());
        fill_if_unset(&mut args.limit_rate, file_config.rate_limit.as_ref());
        fill_if_unset(&mut args.yt_dlp, file_config.yt_dlp_path.as_ref());
        fill_if_unset(&mut args.timeout, file_config.attempt_timeout_secs.as_ref());
        fill_if_unset(&mut args.audio_quality, file_config.audio_quality.as_ref());
        fill_if_unset(&mut args.max_filesize, file_config.max_filesize.as_ref());

        // a switch set in either place stays on
        args.write_thumbnail |= file_config.write_thumbnail.unwrap_or(false);
        args.write_info_json |= file_config.write_info_json.unwrap_or(false);
        args.embed_thumbnail |= file_config.embed_thumbnail.unwrap_or(false);
        args.no_embed_chapters |= file_config.embed_chapters == Some(false);

        if !cli_sources.concurrency
            && let Some(concurrency) = file_config.concurrency
        {
            args.concurrency = concurrency;
        }

        if !cli_sources.max_retries
            && let Some(max_retries) = file_config.max_retries
        {
            args.max_retries = max_retries;
        }

        if !cli_sources.pause_policy
            && let Some(policy) = file_config.pause_policy
        {
            args.pause_policy = policy;
        }

        if !cli_sources.verbose
            && !cli_sources.quiet
            && let Some(verbosity) = file_config.verbosity
        {
            apply_config_verbosity(&mut args, verbosity);
        }
    }

    if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&usize::from(args.concurrency)) {
        bail!(
            "Invalid effective concurrency value: {}. Expected range: {MIN_CONCURRENCY}..={MAX_CONCURRENCY}",
            args.concurrency
        );
    }

    Ok(args)
}

fn fill_if_unset<T: Clone>(slot: &mut Option<T>, fallback: Option<&T>) {
    if slot.is_none() {
        *slot = fallback.cloned();
    }
}

fn apply_config_verbosity(args: &mut Args, verbosity: VerbositySetting) {
    match verbosity {
        VerbositySetting::Default => {
            args.quiet = false;
            args.verbose = 0;
        }
        VerbositySetting::Verbose => {
            args.quiet = false;
            args.verbose = 1;
        }
        VerbositySetting::Quiet => {
            args.quiet = true;
            args.verbose = 0;
        }
        VerbositySetting::Debug => {
            args.quiet = false;
            args.verbose = 2;
        }
    }
}

pub(crate) fn resolve_retry_settings(file_config: Option<&FileConfig>) -> RetrySettings {
    let mut settings = RetrySettings::default();
    let Some(file_config) = file_config else {
        return settings;
    };
    if let Some(ms) = file_config.retry_base_delay_ms {
        settings.base_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = file_config.retry_max_delay_ms {
        settings.max_delay = Duration::from_millis(ms);
    }
    // a file that only lowers the cap must not leave the base above it
    if settings.base_delay > settings.max_delay {
        settings.base_delay = settings.max_delay;
    }
    settings
}

pub(crate) fn resolve_default_log_level(args: &Args) -> &'static str {
    if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

pub(crate) fn should_force_cli_log_level(cli_sources: &CliValueSources) -> bool {
    cli_sources.verbose || cli_sources.quiet
}
