//! Unattended loop over sessions and repository topology.
//!
//! Prints one line per change as it happens and a periodic summary line,
//! until interrupted or until sampling keeps failing.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use tracing::info;

use orchestrator::cancel::install_ctrlc;
use orchestrator::cli::{self, parse_seconds};
use orchestrator::clock::SystemClock;
use orchestrator::core::rules::RulePolicy;
use orchestrator::core::topology::BaseSelector;
use orchestrator::heartbeat::{Heartbeat, HeartbeatOptions, MonitorSampler, RepoSampler};
use orchestrator::io::topology::TopologyAnalyzer;
use orchestrator::logging;
use orchestrator::monitor::SessionMonitor;
use orchestrator::render::{JsonSink, TextSink};

#[derive(Parser)]
#[command(
    name = "heartbeat-monitor",
    version,
    about = "Watch agent sessions and git topology, printing deltas and heartbeats"
)]
struct Cli {
    /// Project whose sessions are watched (default: current directory).
    #[arg(long)]
    project_root: Option<PathBuf>,
    /// Repository to inspect (default: the project root).
    #[arg(long)]
    repo_root: Option<PathBuf>,
    /// Log corpus location (default: $CODEX_HOME, then ~/.codex).
    #[arg(long)]
    codex_home: Option<PathBuf>,
    /// Base branch to compare against, or `auto`.
    #[arg(long, default_value = "auto")]
    main_branch: String,
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..))]
    active_minutes: u32,
    /// Seconds between samples.
    #[arg(long, default_value = "5", value_parser = parse_seconds)]
    poll_interval: Duration,
    /// Seconds between summary lines when nothing changes.
    #[arg(long, default_value = "20", value_parser = parse_seconds)]
    heartbeat_interval: Duration,
    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,
    /// Allow recommendations that discard work.
    #[arg(long)]
    allow_destructive: bool,
    /// Config file (default: .session-orchestrator.toml in the project root).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Emit one JSON object per cycle.
    #[arg(long)]
    json: bool,
}

fn main() {
    logging::init();
    cli::exit_on_error(run(Cli::parse()));
}

fn run(cli: Cli) -> Result<()> {
    let project_root = cli::root_or_cwd(cli.project_root)?;
    let repo_root = cli.repo_root.unwrap_or_else(|| project_root.clone());
    let config = cli::load(&project_root, cli.config.as_deref())?;
    let home = cli::codex_home(cli.codex_home, &config)?;

    let sessions = MonitorSampler {
        monitor: SessionMonitor::open(&project_root, home)?,
        active_minutes: cli.active_minutes,
    };
    let topology = RepoSampler {
        analyzer: TopologyAnalyzer::new(&repo_root, &config.git)?,
        selector: BaseSelector::parse(&cli.main_branch),
        policy: RulePolicy {
            allow_destructive: cli.allow_destructive || config.rules.allow_destructive,
            ..config.rules.clone()
        },
    };
    let min_sleep = cli::min_sleep(&config);
    let opts = HeartbeatOptions {
        poll_interval: cli.poll_interval.max(min_sleep),
        heartbeat_interval: cli.heartbeat_interval.max(Duration::from_secs(1)),
        once: cli.once,
        failure_threshold: config.heartbeat.failure_threshold,
        min_sleep,
    };
    let stop = install_ctrlc()?;
    info!(
        project = %project_root.display(),
        repo = %repo_root.display(),
        poll = ?opts.poll_interval,
        "heartbeat starting"
    );

    let mut heartbeat = Heartbeat::new(sessions, topology, SystemClock, opts);
    let outcome = if cli.json {
        heartbeat.run(&mut JsonSink::new(io::stdout().lock()), &stop)?
    } else {
        heartbeat.run(&mut TextSink::new(io::stdout().lock()), &stop)?
    };

    if cli.once && outcome.degraded {
        bail!("heartbeat: the single cycle was degraded; see the degraded lines above");
    }
    Ok(())
}
