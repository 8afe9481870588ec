//! Base-branch resolution as an ordered list of strategies.
//!
//! `auto` detection is a heuristic, so each guess is its own strategy and can
//! be tested in isolation against a fake [`RefSource`].

use std::path::Path;

use anyhow::Result;
use tracing::{debug, warn};

use crate::core::topology::{BaseRef, BaseSelector};
use crate::error::OrchestratorError;

/// Read-only ref lookups needed to pick a base.
pub trait RefSource {
    /// True if `reference` names an existing commit.
    fn ref_exists(&self, reference: &str) -> Result<bool>;
    /// Short name the remote's `HEAD` points at, e.g. `origin/main`.
    fn remote_head(&self, remote: &str) -> Result<Option<String>>;
}

pub trait BaseStrategy {
    fn name(&self) -> &'static str;
    /// A usable ref, or `None` to fall through to the next strategy.
    fn resolve(&self, refs: &dyn RefSource) -> Result<Option<String>>;
}

/// The branch the remote's `HEAD` points at.
pub struct RemoteDefault {
    pub remote: String,
}

impl BaseStrategy for RemoteDefault {
    fn name(&self) -> &'static str {
        "remote-default"
    }

    fn resolve(&self, refs: &dyn RefSource) -> Result<Option<String>> {
        match refs.remote_head(&self.remote)? {
            Some(head) if refs.ref_exists(&head)? => Ok(Some(head)),
            _ => Ok(None),
        }
    }
}

/// First conventional name that exists as a local branch.
pub struct LocalCandidates {
    pub candidates: Vec<String>,
}

impl BaseStrategy for LocalCandidates {
    fn name(&self) -> &'static str {
        "local-candidate"
    }

    fn resolve(&self, refs: &dyn RefSource) -> Result<Option<String>> {
        for candidate in &self.candidates {
            if refs.ref_exists(&format!("refs/heads/{candidate}"))? {
                return Ok(Some(candidate.clone()));
            }
        }
        Ok(None)
    }
}

/// First conventional name that exists as a remote-tracking branch.
pub struct RemoteCandidates {
    pub remote: String,
    pub candidates: Vec<String>,
}

impl BaseStrategy for RemoteCandidates {
    fn name(&self) -> &'static str {
        "remote-candidate"
    }

    fn resolve(&self, refs: &dyn RefSource) -> Result<Option<String>> {
        for candidate in &self.candidates {
            let short = format!("{}/{candidate}", self.remote);
            if refs.ref_exists(&format!("refs/remotes/{short}"))? {
                return Ok(Some(short));
            }
        }
        Ok(None)
    }
}

/// Strategy order for `auto`: remote default, local names, remote names.
pub fn auto_strategies(remote: &str, candidates: &[String]) -> Vec<Box<dyn BaseStrategy>> {
    vec![
        Box::new(RemoteDefault {
            remote: remote.to_string(),
        }),
        Box::new(LocalCandidates {
            candidates: candidates.to_vec(),
        }),
        Box::new(RemoteCandidates {
            remote: remote.to_string(),
            candidates: candidates.to_vec(),
        }),
    ]
}

/// Resolve the base ref for `selector`.
///
/// A strategy whose lookup fails is logged and skipped; if nothing resolves the
/// result is [`OrchestratorError::NoBaseBranch`], never a silent guess.
pub fn resolve_base(
    refs: &dyn RefSource,
    selector: &BaseSelector,
    remote: &str,
    strategies: &[Box<dyn BaseStrategy>],
    repo: &Path,
) -> Result<BaseRef> {
    let no_base = || OrchestratorError::NoBaseBranch {
        repo: repo.to_path_buf(),
        requested: selector.as_str().to_string(),
    };

    match selector {
        BaseSelector::Named(name) => {
            let remote_name = format!("{remote}/{name}");
            for reference in [name.as_str(), remote_name.as_str()] {
                if refs.ref_exists(reference)? {
                    return Ok(base_ref(selector, reference, remote, "explicit"));
                }
            }
            Err(no_base().into())
        }
        BaseSelector::Auto => {
            for strategy in strategies {
                match strategy.resolve(refs) {
                    Ok(Some(reference)) => {
                        debug!(strategy = strategy.name(), %reference, "base branch resolved");
                        return Ok(base_ref(selector, &reference, remote, strategy.name()));
                    }
                    Ok(None) => debug!(strategy = strategy.name(), "strategy found no base"),
                    Err(err) => {
                        warn!(strategy = strategy.name(), err = %format!("{err:#}"), "strategy lookup failed");
                    }
                }
            }
            Err(no_base().into())
        }
    }
}

fn base_ref(selector: &BaseSelector, reference: &str, remote: &str, strategy: &str) -> BaseRef {
    let prefix = format!("{remote}/");
    let branch = reference
        .strip_prefix(&prefix)
        .unwrap_or(reference)
        .to_string();
    BaseRef {
        requested: selector.as_str().to_string(),
        reference: reference.to_string(),
        branch,
        strategy: strategy.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[derive(Default)]
    struct FakeRefs {
        refs: BTreeSet<String>,
        remote_head: Option<String>,
    }

    impl FakeRefs {
        fn with(refs: &[&str]) -> Self {
            Self {
                refs: refs.iter().map(|r| r.to_string()).collect(),
                remote_head: None,
            }
        }
    }

    impl RefSource for FakeRefs {
        fn ref_exists(&self, reference: &str) -> Result<bool> {
            Ok(self.refs.contains(reference))
        }

        fn remote_head(&self, _remote: &str) -> Result<Option<String>> {
            Ok(self.remote_head.clone())
        }
    }

    struct BrokenRefs;

    impl RefSource for BrokenRefs {
        fn ref_exists(&self, _reference: &str) -> Result<bool> {
            Err(anyhow::anyhow!("git rev-parse timed out"))
        }

        fn remote_head(&self, _remote: &str) -> Result<Option<String>> {
            Err(anyhow::anyhow!("git symbolic-ref timed out"))
        }
    }

    fn candidates() -> Vec<String> {
        vec!["main".to_string(), "master".to_string(), "trunk".to_string()]
    }

    fn resolve(refs: &dyn RefSource, selector: &BaseSelector) -> Result<BaseRef> {
        resolve_base(
            refs,
            selector,
            "origin",
            &auto_strategies("origin", &candidates()),
            Path::new("/repo"),
        )
    }

    #[test]
    fn remote_default_wins_over_local_candidates() {
        let mut refs = FakeRefs::with(&["origin/develop", "refs/heads/main"]);
        refs.remote_head = Some("origin/develop".to_string());

        let base = resolve(&refs, &BaseSelector::Auto).expect("resolve");
        assert_eq!(base.reference, "origin/develop");
        assert_eq!(base.branch, "develop");
        assert_eq!(base.strategy, "remote-default");
    }

    #[test]
    fn local_candidates_follow_configured_order() {
        let refs = FakeRefs::with(&["refs/heads/trunk", "refs/heads/master"]);
        let strategy = LocalCandidates {
            candidates: candidates(),
        };
        assert_eq!(
            strategy.resolve(&refs).expect("resolve"),
            Some("master".to_string())
        );
    }

    #[test]
    fn remote_candidates_return_remote_short_name() {
        let refs = FakeRefs::with(&["refs/remotes/origin/main"]);
        let base = resolve(&refs, &BaseSelector::Auto).expect("resolve");
        assert_eq!(base.reference, "origin/main");
        assert_eq!(base.branch, "main");
        assert_eq!(base.strategy, "remote-candidate");
    }

    #[test]
    fn auto_without_any_match_is_a_resolution_error() {
        let refs = FakeRefs::with(&["refs/heads/feature/x"]);
        let err = resolve(&refs, &BaseSelector::Auto).expect_err("no base");
        assert!(matches!(
            err.downcast_ref::<OrchestratorError>(),
            Some(OrchestratorError::NoBaseBranch { requested, .. }) if requested == "auto"
        ));
    }

    #[test]
    fn failing_lookups_fall_through_to_the_error() {
        let err = resolve(&BrokenRefs, &BaseSelector::Auto).expect_err("no base");
        assert!(err.downcast_ref::<OrchestratorError>().is_some());
    }

    #[test]
    fn explicit_name_falls_back_to_remote_tracking_ref() {
        let refs = FakeRefs::with(&["origin/release"]);
        let base = resolve(&refs, &BaseSelector::Named("release".to_string())).expect("resolve");
        assert_eq!(base.reference, "origin/release");
        assert_eq!(base.branch, "release");
        assert_eq!(base.strategy, "explicit");
    }

    #[test]
    fn explicit_name_that_does_not_exist_fails() {
        let refs = FakeRefs::with(&["refs/heads/main"]);
        let err = resolve(&refs, &BaseSelector::Named("nope".to_string())).expect_err("missing");
        assert!(err.to_string().contains("requested 'nope'"));
    }
}
