//! besouro - replay a recorded action log through the episode classifier
//!
//! Reads a JSON Lines action log, feeds every action to the classifier
//! stream and prints the episodes recognized at each passing test session.

use std::path::PathBuf;

use anyhow::{Context, Result};
use besouro_core::{Config, EpisodeClassifierStream, RuleEngine};
use clap::{Parser, ValueEnum};

#[derive(Parser)]
#[command(name = "besouro")]
#[command(about = "Classify development episodes from a recorded IDE action log")]
#[command(version)]
struct Args {
    /// Action log to replay (JSON Lines, one action per line)
    #[arg(required_unless_present = "list_rules")]
    log: Option<PathBuf>,

    /// Directory with actions.toml, episode.toml and classifier.toml
    /// (overrides the configured rules)
    #[arg(short, long)]
    rules: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Print the fact base of every classified window
    #[arg(long)]
    dump_facts: bool,

    /// List the loaded rules and queries without reading a log
    #[arg(long)]
    list_rules: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

/// Facts left in the engine after one window was classified.
struct Window {
    closed_by: usize,
    facts: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(dir) = &args.rules {
        config.rules.dir = Some(dir.clone());
    }

    let _log_guard =
        besouro_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let mut stream =
        EpisodeClassifierStream::from_config(&config).context("failed to load rule set")?;

    if args.list_rules {
        print_rules(stream.engine());
        return Ok(());
    }

    let Some(log_path) = args.log.as_deref() else {
        anyhow::bail!("an action log is required");
    };
    let log = besouro_core::ingest::read_action_log(log_path)
        .with_context(|| format!("failed to read action log {}", log_path.display()))?;
    for warning in &log.warnings {
        eprintln!("warning: {warning}");
    }

    let total = log.actions.len();
    let mut windows = Vec::new();
    for (i, action) in log.actions.into_iter().enumerate() {
        let closes_window = action.is_passing_session();
        stream
            .add_action(action)
            .with_context(|| format!("failed to classify action {} of {}", i + 1, total))?;

        if closes_window && args.dump_facts {
            windows.push(Window {
                closed_by: i + 1,
                facts: stream.engine().facts().iter().map(|f| f.to_string()).collect(),
            });
        }
    }

    tracing::info!(
        actions = total,
        episodes = stream.recognized_episodes().len(),
        pending = stream.actions().len(),
        "Replay complete"
    );

    match args.format {
        Format::Text => print_text(&stream, &windows, log.warnings.len()),
        Format::Json => print_json(&stream, &windows, &log.warnings)?,
    }

    Ok(())
}

fn print_rules(engine: &RuleEngine) {
    let rules = engine.rule_set();
    println!("Rule set {}", rules.fingerprint());
    println!("Rules:");
    for name in rules.rule_names() {
        println!("  - {}", name);
    }
    println!("Queries:");
    for name in rules.query_names() {
        println!("  - {}", name);
    }
}

fn print_text(stream: &EpisodeClassifierStream, windows: &[Window], warnings: usize) {
    for window in windows {
        println!("Facts after action {}:", window.closed_by);
        for fact in &window.facts {
            println!("  {}", fact);
        }
        println!();
    }

    for episode in stream.recognized_episodes() {
        println!(
            "{}  ({} actions, {}s)",
            episode,
            episode.action_count,
            episode.duration_secs()
        );
    }

    println!("\n---");
    println!(
        "{} episode(s) recognized, {} action(s) pending, {} warning(s)",
        stream.recognized_episodes().len(),
        stream.actions().len(),
        warnings
    );
}

fn print_json(stream: &EpisodeClassifierStream, windows: &[Window], warnings: &[String]) -> Result<()> {
    let mut output = serde_json::json!({
        "episodes": stream.recognized_episodes(),
        "pending_actions": stream.actions().len(),
        "warnings": warnings,
    });
    if !windows.is_empty() {
        output["windows"] = windows
            .iter()
            .map(|w| serde_json::json!({ "closed_by": w.closed_by, "facts": w.facts }))
            .collect();
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
