//! Optional TOML configuration, `.session-orchestrator.toml` in the project root.
//!
//! Every key has a default, so a missing file is the normal case. Command-line
//! flags override whatever is loaded here.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::rules::RulePolicy;

pub const CONFIG_FILE_NAME: &str = ".session-orchestrator.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Log corpus location; falls back to `$CODEX_HOME` then `~/.codex`.
    pub codex_home: Option<PathBuf>,
    pub git: GitConfig,
    pub heartbeat: HeartbeatConfig,
    pub rules: RulePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    /// Deadline for a single git query.
    pub timeout_secs: u64,
    /// Stdout kept per git query; the rest is discarded.
    pub output_limit_bytes: usize,
    /// Remote consulted for the default branch.
    pub remote: String,
    /// Conventional base names tried in order by `auto`.
    pub base_candidates: Vec<String>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            output_limit_bytes: 1_000_000,
            remote: "origin".to_string(),
            base_candidates: vec![
                "main".to_string(),
                "master".to_string(),
                "trunk".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Consecutive degraded cycles tolerated before the loop gives up.
    pub failure_threshold: u32,
    /// Floor for any poll or follow interval.
    pub min_sleep_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            min_sleep_ms: 500,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.git.timeout_secs == 0 {
            return Err(anyhow!("git.timeout_secs must be > 0"));
        }
        if self.git.output_limit_bytes == 0 {
            return Err(anyhow!("git.output_limit_bytes must be > 0"));
        }
        if self.git.remote.trim().is_empty() {
            return Err(anyhow!("git.remote must not be empty"));
        }
        if self.git.base_candidates.is_empty() {
            return Err(anyhow!("git.base_candidates must not be empty"));
        }
        if self.git.base_candidates.iter().any(|c| c.trim().is_empty()) {
            return Err(anyhow!("git.base_candidates must not contain empty names"));
        }
        if self.heartbeat.failure_threshold == 0 {
            return Err(anyhow!("heartbeat.failure_threshold must be > 0"));
        }
        if self.rules.cherry_pick_behind == Some(0) {
            return Err(anyhow!("rules.cherry_pick_behind must be > 0"));
        }
        Ok(())
    }
}

/// Explicit `--config` path, else the default file under `root`.
pub fn config_path(root: &Path, explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => root.join(CONFIG_FILE_NAME),
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrchestratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        let cfg = OrchestratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, OrchestratorConfig::default());
        assert_eq!(cfg.heartbeat.failure_threshold, 3);
        assert!(!cfg.rules.allow_destructive);
        assert_eq!(cfg.rules.cherry_pick_behind, None);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            "[git]\nremote = \"upstream\"\n\n[rules]\ncherry_pick_behind = 20\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.git.remote, "upstream");
        assert_eq!(cfg.git.timeout_secs, 10);
        assert_eq!(cfg.rules.cherry_pick_behind, Some(20));
        assert_eq!(cfg.rules.cherry_pick_max_ahead, 3);
    }

    #[test]
    fn invalid_values_are_rejected_with_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bad.toml");
        fs::write(&path, "[heartbeat]\nfailure_threshold = 0\n").expect("write");
        let err = load_config(&path).expect_err("invalid");
        let msg = format!("{err:#}");
        assert!(msg.contains("bad.toml"), "{msg}");
        assert!(msg.contains("failure_threshold"), "{msg}");
    }

    #[test]
    fn empty_base_candidates_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bad.toml");
        fs::write(&path, "[git]\nbase_candidates = []\n").expect("write");
        let msg = format!("{:#}", load_config(&path).expect_err("invalid"));
        assert!(msg.contains("base_candidates must not be empty"), "{msg}");
    }

    #[test]
    fn explicit_path_wins() {
        let root = Path::new("/project");
        assert_eq!(
            config_path(root, None),
            PathBuf::from("/project/.session-orchestrator.toml")
        );
        assert_eq!(
            config_path(root, Some(Path::new("/etc/orch.toml"))),
            PathBuf::from("/etc/orch.toml")
        );
    }
}
