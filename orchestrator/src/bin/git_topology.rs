//! One-shot branch and worktree report with coordination recommendations.
//!
//! Only read-only git queries are issued; every recommended command is
//! printed for an operator to run.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use orchestrator::cli;
use orchestrator::clock::{Clock, SystemClock};
use orchestrator::core::rules::{Recommendation, RulePolicy, evaluate};
use orchestrator::core::topology::{BaseSelector, TopologySnapshot};
use orchestrator::io::topology::TopologyAnalyzer;
use orchestrator::logging;
use orchestrator::render;

#[derive(Parser)]
#[command(
    name = "git-topology",
    version,
    about = "Report branch/worktree topology and recommend the next git actions"
)]
struct Cli {
    /// Repository to inspect (default: current directory).
    #[arg(long)]
    repo_root: Option<PathBuf>,
    /// Base branch to compare against, or `auto`.
    #[arg(long, default_value = "auto")]
    main_branch: String,
    /// Allow recommendations that discard work (worktree removal and the like).
    #[arg(long)]
    allow_destructive: bool,
    /// Config file (default: .session-orchestrator.toml in the repository root).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Emit JSON instead of text.
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    snapshot: &'a TopologySnapshot,
    recommendations: &'a [Recommendation],
}

fn main() {
    logging::init();
    cli::exit_on_error(run(Cli::parse()));
}

fn run(cli: Cli) -> Result<()> {
    let root = cli::root_or_cwd(cli.repo_root)?;
    let config = cli::load(&root, cli.config.as_deref())?;
    let analyzer = TopologyAnalyzer::new(&root, &config.git)?;
    let snapshot = analyzer.analyze(&BaseSelector::parse(&cli.main_branch), SystemClock.now())?;

    let policy = RulePolicy {
        allow_destructive: cli.allow_destructive || config.rules.allow_destructive,
        ..config.rules
    };
    let recommendations = evaluate(&snapshot, &policy);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if cli.json {
        render::json_pretty(
            &mut out,
            &Report {
                snapshot: &snapshot,
                recommendations: &recommendations,
            },
        )
    } else {
        write!(out, "{}", render::topology(&snapshot, &recommendations)).context("write output")
    }
}
