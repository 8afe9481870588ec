//! Argument parsing and startup shared by the three binaries.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

use crate::error::OrchestratorError;
use crate::exit_codes;
use crate::io::config::{OrchestratorConfig, config_path, load_config};
use crate::io::log_store::default_codex_home;

/// `clap` value parser for positive, possibly fractional, seconds.
pub fn parse_seconds(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("'{raw}' is not a number of seconds"))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("'{raw}' must be greater than zero"));
    }
    Duration::try_from_secs_f64(secs).map_err(|err| format!("'{raw}': {err}"))
}

/// Explicit root, else the current directory.
pub fn root_or_cwd(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => env::current_dir().context("read current directory"),
    }
}

/// Load `--config`, or the default file under `root` when present.
pub fn load(root: &Path, explicit: Option<&Path>) -> Result<OrchestratorConfig> {
    let path = config_path(root, explicit);
    if explicit.is_some() && !path.exists() {
        return Err(anyhow::anyhow!("config: {} does not exist", path.display()));
    }
    debug!(path = %path.display(), "loading config");
    load_config(&path)
}

/// `--codex-home`, then the config file, then `$CODEX_HOME` or `~/.codex`.
pub fn codex_home(flag: Option<PathBuf>, config: &OrchestratorConfig) -> Result<PathBuf> {
    match flag.or_else(|| config.codex_home.clone()) {
        Some(home) => Ok(home),
        None => default_codex_home(),
    }
}

/// Floor applied to every sleep between polls.
pub fn min_sleep(config: &OrchestratorConfig) -> Duration {
    Duration::from_millis(config.heartbeat.min_sleep_ms)
}

/// Exit code for a failure after argument parsing.
///
/// Usage errors never get here: `Cli::parse` exits with [`exit_codes::USAGE`] itself.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(classified) = err.downcast_ref::<OrchestratorError>() {
        debug!(?classified, "classified failure");
    }
    exit_codes::FAILURE
}

/// Print the error chain to stderr and exit with its code.
pub fn exit_on_error(result: Result<()>) {
    if let Err(err) = result {
        eprintln!("{err:#}");
        std::process::exit(exit_code(&err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_accept_fractions_and_reject_nonsense() {
        assert_eq!(parse_seconds("2"), Ok(Duration::from_secs(2)));
        assert_eq!(parse_seconds("0.5"), Ok(Duration::from_millis(500)));
        assert!(parse_seconds("0").is_err());
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("soon").is_err());
        assert!(parse_seconds("inf").is_err());
    }

    #[test]
    fn codex_home_flag_beats_config() {
        let config = OrchestratorConfig {
            codex_home: Some(PathBuf::from("/from/config")),
            ..OrchestratorConfig::default()
        };
        assert_eq!(
            codex_home(Some(PathBuf::from("/from/flag")), &config).expect("home"),
            PathBuf::from("/from/flag")
        );
        assert_eq!(
            codex_home(None, &config).expect("home"),
            PathBuf::from("/from/config")
        );
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let missing = temp.path().join("nope.toml");
        assert!(load(temp.path(), Some(&missing)).is_err());
        assert_eq!(
            load(temp.path(), None).expect("defaults"),
            OrchestratorConfig::default()
        );
    }

    #[test]
    fn classified_errors_exit_with_failure() {
        let err: anyhow::Error = OrchestratorError::LineageCycle {
            ids: vec!["a".to_string(), "a".to_string()],
        }
        .into();
        assert_eq!(exit_code(&err), exit_codes::FAILURE);
        assert_eq!(exit_code(&anyhow::anyhow!("plain")), exit_codes::FAILURE);
    }
}
