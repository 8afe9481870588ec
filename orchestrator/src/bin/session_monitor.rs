//! Inventory, activity summary, and live follow of the coding-agent sessions
//! that worked inside one project.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use orchestrator::cancel::install_ctrlc;
use orchestrator::cli::{self, parse_seconds};
use orchestrator::clock::{Clock, SystemClock};
use orchestrator::logging;
use orchestrator::monitor::{FollowOptions, SessionMonitor};
use orchestrator::render;

#[derive(Parser)]
#[command(
    name = "session-monitor",
    version,
    about = "Inventory and follow coding-agent sessions for one project"
)]
struct Cli {
    /// Project whose sessions are listed (default: current directory).
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,
    /// Log corpus location (default: $CODEX_HOME, then ~/.codex).
    #[arg(long, global = true)]
    codex_home: Option<PathBuf>,
    /// Config file (default: .session-orchestrator.toml in the project root).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Emit JSON instead of tables.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Matched sessions, the active set, and the lineage forest.
    Inventory {
        #[arg(long, default_value_t = 20)]
        recent: usize,
        /// Sessions with activity in this window count as active.
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..))]
        active_minutes: u32,
    },
    /// Latest action of the most recently active sessions.
    Activity {
        #[arg(long, default_value_t = 10)]
        recent: usize,
    },
    /// Poll the corpus and print active-set changes until interrupted.
    Follow {
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..))]
        active_minutes: u32,
        /// Seconds between polls.
        #[arg(long, default_value = "2", value_parser = parse_seconds)]
        interval: Duration,
        /// Also print activity appended to active sessions.
        #[arg(long)]
        tail: bool,
        /// Replay every existing entry of a session when it becomes active (implies --tail).
        #[arg(long)]
        from_start: bool,
    },
}

fn main() {
    logging::init();
    cli::exit_on_error(run(Cli::parse()));
}

fn run(cli: Cli) -> Result<()> {
    let root = cli::root_or_cwd(cli.project_root)?;
    let config = cli::load(&root, cli.config.as_deref())?;
    let home = cli::codex_home(cli.codex_home, &config)?;
    let mut monitor = SessionMonitor::open(&root, home)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Command::Inventory {
            recent,
            active_minutes,
        } => {
            monitor.refresh();
            let inventory = monitor.inventory(SystemClock.now(), recent, active_minutes)?;
            if cli.json {
                render::json_pretty(&mut out, &inventory)
            } else {
                write!(out, "{}", render::inventory(&inventory)).context("write output")
            }
        }
        Command::Activity { recent } => {
            monitor.refresh();
            let summaries = monitor.activity(recent);
            if cli.json {
                render::json_pretty(&mut out, &summaries)
            } else {
                write!(out, "{}", render::activity(&summaries)).context("write output")
            }
        }
        Command::Follow {
            active_minutes,
            interval,
            tail,
            from_start,
        } => {
            let stop = install_ctrlc()?;
            let opts = FollowOptions {
                active_minutes,
                interval: interval.max(cli::min_sleep(&config)),
                tail,
                from_start,
            };
            info!(project = %monitor.project_root().display(), "following sessions");
            let json = cli.json;
            let ticks = monitor.follow(&opts, &stop, &SystemClock, |tick| {
                if json {
                    if tick.updates.is_empty() {
                        return Ok(());
                    }
                    render::json_line(&mut out, tick)
                } else {
                    write!(out, "{}", render::follow_tick(tick)).context("write output")?;
                    out.flush().context("flush output")
                }
            })?;
            info!(ticks, "follow finished");
            Ok(())
        }
    }
}
