use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::info;

use rategate::config::{LoggingConfig, RateGateConfig};
use rategate::ratelimit::{Rate, RulesFile};
use rategate::tree::{is_rate_limited, NodeId, Tree};
use rategate::{RateGate, RequestSnapshot};

#[derive(Parser)]
#[command(name = "rategate", version, about = "Inspect and exercise rate limit rules")]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Rules file, overriding `rate_limiting.rules_path`
    #[arg(short, long, global = true)]
    rules: Option<PathBuf>,

    /// Log filter, overriding `logging.level`
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the merged property and element trees
    Tree,
    /// Evaluate a JSON request snapshot
    Check {
        /// Request snapshot file (JSON)
        #[arg(long)]
        request: PathBuf,

        /// Number of times to evaluate the request
        #[arg(long, default_value_t = 1)]
        repeat: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = RateGateConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    setup_logging(&config.logging, cli.log_level.as_deref());

    info!(version = env!("CARGO_PKG_VERSION"), "Starting rategate");

    let rules = match cli.rules.clone().or_else(|| config.rate_limiting.rules_path.clone().map(PathBuf::from)) {
        Some(path) => RulesFile::from_file(&path)
            .with_context(|| format!("Failed to load rules from {}", path.display()))?,
        None => bail!("No rules file given; pass --rules or set rate_limiting.rules_path"),
    };

    let gate = RateGate::builder()
        .settings(config.rate_limiting.clone())
        .rules(rules)
        .build()
        .context("Failed to build rate limit trees")?;

    match cli.command {
        Command::Tree => {
            let snapshot = gate.snapshot();
            print_tree(snapshot.properties.tree(), &snapshot.transferred);
            println!();
            print_tree(snapshot.elements.tree(), &snapshot.transferred);
        }
        Command::Check { request, repeat } => {
            let contents = std::fs::read_to_string(&request)
                .with_context(|| format!("Failed to read {}", request.display()))?;
            let snapshot: RequestSnapshot =
                serde_json::from_str(&contents).context("Failed to parse request snapshot")?;

            let factory = gate.limiter_factory();
            for attempt in 1..=repeat {
                let decision = factory.try_acquire(&snapshot)?;
                if decision.admitted {
                    println!("{:>4} admitted", attempt);
                } else {
                    let causes: Vec<String> = decision.exceeded.iter().map(|e| e.to_string()).collect();
                    println!("{:>4} denied: {}", attempt, causes.join(", "));
                }
            }
        }
    }

    Ok(())
}

/// Install the tracing subscriber. Logs go to stderr so command output stays clean.
fn setup_logging(config: &LoggingConfig, level_override: Option<&str>) {
    let level = level_override.unwrap_or(&config.level);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn print_tree(tree: &Tree, transferred: &BTreeSet<String>) {
    println!("{}", tree.root_name());
    for child in tree.children(tree.root()) {
        print_node(tree, *child, transferred, 1);
    }
}

fn print_node(tree: &Tree, id: NodeId, transferred: &BTreeSet<String>, depth: usize) {
    let name = tree.name(id);
    let mut line = format!("{}{}", "  ".repeat(depth), name);
    if let Some(config) = tree.config(id) {
        if config.rates.has_limits() {
            let limits: Vec<String> = config.rates.limits.iter().map(describe_rate).collect();
            line.push_str(&format!(" [{}]", limits.join(", ")));
        }
        if let Some(condition) = &config.rates.condition {
            line.push_str(&format!(" when {}", condition));
        }
        if let Some(routes) = config.source.routes() {
            let patterns: Vec<&str> = routes.iter().map(|r| r.pattern.as_str()).collect();
            if !patterns.is_empty() {
                line.push_str(&format!(" {}", patterns.join(" ")));
            }
        }
        if config.source.delegates_to_parent() {
            line.push_str(" -> parent");
        }
    }
    if transferred.contains(name) {
        line.push_str(" (from property)");
    }
    if is_rate_limited(tree, id, transferred) {
        line.push_str(" *");
    }
    println!("{}", line);

    for child in tree.children(id) {
        print_node(tree, *child, transferred, depth + 1);
    }
}

fn describe_rate(rate: &Rate) -> String {
    let mut text = format!("{}/{}", rate.permits, humantime::format_duration(rate.duration));
    if let Some(condition) = &rate.condition {
        text.push_str(&format!(" when {}", condition));
    }
    text
}
