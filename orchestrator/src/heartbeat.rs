//! The unattended sampling loop.
//!
//! One cycle samples sessions and topology, diffs each against the sample
//! retained from the previous cycle, and hands one report to the sink. The
//! loop is single-threaded: a cycle finishes emitting before the next sleep.

use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::cancel::StopSignal;
use crate::clock::Clock;
use crate::core::delta::{
    DeltaEvent, SessionSample, TopologySample, diff_sessions, diff_topology,
};
use crate::core::rules::{RulePolicy, evaluate};
use crate::core::topology::BaseSelector;
use crate::core::types::{SessionKind, short_id};
use crate::error::OrchestratorError;
use crate::io::topology::TopologyAnalyzer;
use crate::monitor::SessionMonitor;

/// Sessions shown in a summary line.
const HOT_SESSIONS: usize = 5;

pub trait SessionSampler {
    fn sample_sessions(&mut self, now: DateTime<Utc>) -> Result<SessionSample>;
}

pub trait TopologySampler {
    fn sample_topology(&mut self, now: DateTime<Utc>) -> Result<TopologySample>;
}

/// Receives one report per cycle.
pub trait EventSink {
    fn emit(&mut self, report: &CycleReport) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Sampling,
    Diffing,
    Emitting,
    Sleeping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Sessions,
    Topology,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Sessions => "sessions",
            Side::Topology => "topology",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Degradation {
    pub side: Side,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HotSession {
    pub id: String,
    pub kind: SessionKind,
    pub branch: Option<String>,
}

impl HotSession {
    /// `<id8>:<p|s>:<branch>`
    pub fn compact(&self) -> String {
        format!(
            "{}:{}:{}",
            short_id(&self.id),
            self.kind.marker(),
            self.branch.as_deref().unwrap_or("")
        )
    }
}

/// Periodic status line, independent of whether anything changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeartbeatSummary {
    pub active: usize,
    pub primary: usize,
    pub subagent: usize,
    pub base: Option<String>,
    pub root_dirty: Option<bool>,
    pub dirty_worktrees: usize,
    pub diverged: usize,
    pub hot: Vec<HotSession>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub at: DateTime<Utc>,
    pub events: Vec<DeltaEvent>,
    pub degraded: Vec<Degradation>,
    /// Present only when the quiet window has elapsed.
    pub heartbeat: Option<HeartbeatSummary>,
}

impl CycleReport {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct HeartbeatOptions {
    pub poll_interval: Duration,
    /// Minimum spacing between summary lines; also caps the back-off.
    pub heartbeat_interval: Duration,
    pub once: bool,
    /// Consecutive degraded cycles that stop the loop.
    pub failure_threshold: u32,
    pub min_sleep: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatOutcome {
    pub cycles: u64,
    /// Whether the final cycle was degraded.
    pub degraded: bool,
}

pub struct Heartbeat<S, T, C> {
    sessions: S,
    topology: T,
    clock: C,
    opts: HeartbeatOptions,
    phase: Phase,
    cycle: u64,
    prev_sessions: Option<SessionSample>,
    prev_topology: Option<TopologySample>,
    failures: u32,
    last_error: Option<String>,
    fatal: Option<anyhow::Error>,
    last_summary: Option<DateTime<Utc>>,
}

impl<S, T, C> Heartbeat<S, T, C>
where
    S: SessionSampler,
    T: TopologySampler,
    C: Clock,
{
    pub fn new(sessions: S, topology: T, clock: C, opts: HeartbeatOptions) -> Self {
        Self {
            sessions,
            topology,
            clock,
            opts,
            phase: Phase::Idle,
            cycle: 0,
            prev_sessions: None,
            prev_topology: None,
            failures: 0,
            last_error: None,
            fatal: None,
            last_summary: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    /// Run cycles until stopped, `once` completes, or sampling keeps failing.
    pub fn run<K: EventSink>(&mut self, sink: &mut K, stop: &StopSignal) -> Result<HeartbeatOutcome> {
        let mut degraded = false;
        while !stop.is_stopped() {
            let started = Instant::now();
            let report = self.cycle();
            self.set_phase(Phase::Emitting);
            sink.emit(&report)?;
            degraded = report.is_degraded();

            if let Err(err) = self.check_health() {
                self.set_phase(Phase::Stopped);
                return Err(err);
            }
            if self.opts.once {
                break;
            }

            self.set_phase(Phase::Sleeping);
            if stop.wait(self.next_sleep(started.elapsed())) {
                break;
            }
        }
        self.set_phase(Phase::Stopped);
        Ok(HeartbeatOutcome {
            cycles: self.cycle,
            degraded,
        })
    }

    /// Sample both sides and diff each against its retained predecessor.
    ///
    /// A failing side keeps its previous sample, so the next successful cycle
    /// diffs against the last good state.
    #[instrument(skip_all, fields(cycle = self.cycle + 1))]
    pub fn cycle(&mut self) -> CycleReport {
        self.cycle += 1;
        self.set_phase(Phase::Sampling);
        let at = self.clock.now();
        let sessions = self.sessions.sample_sessions(at);
        let topology = self.topology.sample_topology(at);

        self.set_phase(Phase::Diffing);
        let mut events = Vec::new();
        let mut degraded = Vec::new();

        match sessions {
            Ok(next) => {
                if let Some(prev) = &self.prev_sessions {
                    events.extend(diff_sessions(prev, &next, at));
                }
                self.prev_sessions = Some(next);
            }
            Err(err) => degraded.push(self.degrade(Side::Sessions, err)),
        }
        match topology {
            Ok(next) => {
                if let Some(prev) = &self.prev_topology {
                    events.extend(diff_topology(prev, &next, at));
                }
                self.prev_topology = Some(next);
            }
            Err(err) => degraded.push(self.degrade(Side::Topology, err)),
        }

        if degraded.is_empty() {
            self.failures = 0;
        } else {
            self.failures += 1;
            warn!(
                failures = self.failures,
                threshold = self.opts.failure_threshold,
                "degraded cycle"
            );
        }

        let heartbeat = self.summary_due(at).then(|| {
            self.last_summary = Some(at);
            self.summarize()
        });
        debug!(events = events.len(), degraded = degraded.len(), "cycle diffed");

        CycleReport {
            cycle: self.cycle,
            at,
            events,
            degraded,
            heartbeat,
        }
    }

    /// Fails once a resolution error was seen or degraded cycles hit the threshold.
    pub fn check_health(&mut self) -> Result<()> {
        if let Some(err) = self.fatal.take() {
            return Err(err);
        }
        if self.failures >= self.opts.failure_threshold {
            return Err(OrchestratorError::SamplingFailed {
                failures: self.failures,
                threshold: self.opts.failure_threshold,
                last: self.last_error.clone().unwrap_or_default(),
            }
            .into());
        }
        Ok(())
    }

    /// Poll interval minus the time the cycle took, or the back-off after failures.
    pub fn next_sleep(&self, elapsed: Duration) -> Duration {
        let poll = self.opts.poll_interval;
        let sleep = if self.failures == 0 {
            poll.saturating_sub(elapsed)
        } else {
            let cap = self.opts.heartbeat_interval.max(poll);
            let factor = 1u32 << self.failures.min(16);
            poll.saturating_mul(factor).min(cap)
        };
        sleep.max(self.opts.min_sleep)
    }

    fn degrade(&mut self, side: Side, err: anyhow::Error) -> Degradation {
        let error = format!("{err:#}");
        warn!(side = side.as_str(), err = %error, "sampling failed");
        // Resolution errors will not heal by retrying.
        if matches!(
            err.downcast_ref::<OrchestratorError>(),
            Some(OrchestratorError::NoBaseBranch { .. } | OrchestratorError::MissingRoot { .. })
        ) && self.fatal.is_none()
        {
            self.fatal = Some(err);
        }
        self.last_error = Some(format!("{}: {error}", side.as_str()));
        Degradation { side, error }
    }

    fn summary_due(&self, at: DateTime<Utc>) -> bool {
        let window = TimeDelta::from_std(self.opts.heartbeat_interval).unwrap_or(TimeDelta::MAX);
        match self.last_summary {
            None => true,
            Some(last) => at.signed_duration_since(last) >= window,
        }
    }

    fn summarize(&self) -> HeartbeatSummary {
        let mut summary = HeartbeatSummary {
            active: 0,
            primary: 0,
            subagent: 0,
            base: None,
            root_dirty: None,
            dirty_worktrees: 0,
            diverged: 0,
            hot: Vec::new(),
        };
        if let Some(sample) = &self.prev_sessions {
            summary.primary = sample.count_active(SessionKind::Primary);
            summary.subagent = sample.count_active(SessionKind::Subagent);
            summary.active = summary.primary + summary.subagent;
            let mut active: Vec<_> = sample.active().collect();
            active.sort_by(|(a_id, a), (b_id, b)| {
                b.last_activity
                    .cmp(&a.last_activity)
                    .then_with(|| a_id.cmp(b_id))
            });
            summary.hot = active
                .into_iter()
                .take(HOT_SESSIONS)
                .map(|(id, state)| HotSession {
                    id: id.clone(),
                    kind: state.kind,
                    branch: state.git_branch.clone(),
                })
                .collect();
        }
        if let Some(sample) = &self.prev_topology {
            let snapshot = &sample.snapshot;
            summary.base = Some(snapshot.base.reference.clone());
            summary.root_dirty = snapshot.root_dirty();
            summary.dirty_worktrees = snapshot.worktrees().iter().filter(|w| w.is_dirty()).count();
            summary.diverged = snapshot.diverged_branches().len();
        }
        summary
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "heartbeat phase");
            if phase == Phase::Stopped {
                info!(cycles = self.cycle, "heartbeat stopped");
            }
            self.phase = phase;
        }
    }
}

/// Session side backed by the log corpus.
pub struct MonitorSampler {
    pub monitor: SessionMonitor,
    pub active_minutes: u32,
}

impl SessionSampler for MonitorSampler {
    fn sample_sessions(&mut self, now: DateTime<Utc>) -> Result<SessionSample> {
        self.monitor.refresh();
        self.monitor.sample(now, self.active_minutes)
    }
}

/// Topology side backed by git, with recommendations evaluated per sample.
pub struct RepoSampler {
    pub analyzer: TopologyAnalyzer,
    pub selector: BaseSelector,
    pub policy: RulePolicy,
}

impl TopologySampler for RepoSampler {
    fn sample_topology(&mut self, now: DateTime<Utc>) -> Result<TopologySample> {
        let snapshot = self.analyzer.analyze(&self.selector, now)?;
        let recommendations = evaluate(&snapshot, &self.policy);
        Ok(TopologySample {
            snapshot,
            recommendations,
        })
    }
}
