//! CLI binary for generating and inspecting automotive attack trees.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use autotree_engine::{ChildGenerationPolicy, EventEmitter, ExpansionEvent, TreeExpander, Validator};
use autotree_llm::{LoggingMiddleware, UsageTrackingMiddleware};
use autotree_store::{SqliteTreeStore, TreeStore};
use autotree_types::{AttackNode, SURFACE_GOAL};

use config::Config;

const DEFAULT_GOAL: &str = "Throttle Control System Compromise";

#[derive(Parser)]
#[command(name = "autotree", version, about = "LLM-driven automotive attack-tree generator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// SQLite database path (overrides AUTOTREE_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the attack tree for a surface goal, or print the stored one
    Generate {
        /// Root attacker objective
        #[arg(default_value = DEFAULT_GOAL)]
        goal: String,

        /// Do not expand nodes at or beyond this level
        #[arg(long)]
        max_depth: Option<u32>,

        /// Regenerate even if a tree is already stored
        #[arg(long)]
        force: bool,

        /// JSON file with the node-type fan-out policy
        #[arg(long)]
        policy: Option<PathBuf>,

        /// Model name (overrides AUTOTREE_MODEL)
        #[arg(long)]
        model: Option<String>,

        /// Write the tree JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print a stored attack tree
    Show {
        #[arg(default_value = DEFAULT_GOAL)]
        goal: String,

        /// Write the tree JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List stored surface goals
    List,

    /// Run the validator on a single goal and print the rule report
    Check {
        /// Candidate goal text
        goal: String,

        /// Parent goal the candidate decomposes
        #[arg(long, default_value = DEFAULT_GOAL)]
        parent: String,

        /// Level of the candidate in the tree
        #[arg(long, default_value = "3", value_parser = clap::value_parser!(u32).range(1..))]
        level: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing; RUST_LOG wins over --verbose
    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env().with_db_path(cli.db);

    match cli.command {
        Commands::Generate {
            goal,
            max_depth,
            force,
            policy,
            model,
            output,
        } => {
            let config = config.with_model(model);
            cmd_generate(&config, &goal, max_depth, force, policy.as_deref(), output.as_deref())
                .await?;
        }
        Commands::Show { goal, output } => {
            cmd_show(&config, &goal, output.as_deref()).await?;
        }
        Commands::List => {
            cmd_list(&config).await?;
        }
        Commands::Check {
            goal,
            parent,
            level,
        } => {
            cmd_check(&goal, &parent, level)?;
        }
    }

    Ok(())
}

fn write_tree(tree: &AttackNode, output: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(tree)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            println!("Tree written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn cmd_generate(
    config: &Config,
    goal: &str,
    max_depth: Option<u32>,
    force: bool,
    policy_path: Option<&Path>,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    // Configuration problems stop us before touching the store or the network.
    let client = config.completion_client()?;
    let policy = match policy_path {
        Some(path) => ChildGenerationPolicy::load(path)?,
        None => ChildGenerationPolicy::default(),
    };
    let validator = Validator::default();

    let store = SqliteTreeStore::open(&config.db_path).await?;
    if !force {
        if let Some(stored) = store.get(goal).await? {
            validator.check_tree(&stored.tree)?;
            tracing::info!(
                goal = %goal,
                nodes = stored.tree.node_count(),
                updated_at = %stored.updated_at.to_rfc3339(),
                "Attack tree already exists, use --force to regenerate"
            );
            return write_tree(&stored.tree, output);
        }
    }

    let usage = UsageTrackingMiddleware::new();
    let client = client
        .with_middleware(LoggingMiddleware)
        .with_middleware(usage.clone());

    let events = EventEmitter::default();
    let mut rx = events.subscribe();
    let progress = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => report_progress(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Progress reporter fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let expander = TreeExpander::new(Arc::new(client), policy)
        .with_depth_limit(max_depth)
        .with_events(events);
    let result = expander.build_tree(goal).await;
    // Dropping the expander closes the event channel and ends the reporter.
    drop(expander);
    progress.await?;

    let tree = result?;
    validator.check_tree(&tree)?;

    store.put(goal, &tree).await?;
    eprintln!(
        "Generated {} nodes ({} LLM calls, {} input / {} output tokens)",
        tree.node_count(),
        usage.calls(),
        usage.total_input_tokens(),
        usage.total_output_tokens()
    );
    write_tree(&tree, output)
}

fn report_progress(event: &ExpansionEvent) {
    match event {
        ExpansionEvent::NodeExpanded {
            level,
            child_type,
            candidates,
            attached,
            ..
        } => {
            eprintln!("  [L{level}] {attached}/{candidates} {child_type} candidates attached");
        }
        ExpansionEvent::NodeAtomic {
            goal, base_score, ..
        } => {
            eprintln!("  atomic: {goal} (CVSS {base_score:.1})");
        }
        ExpansionEvent::DepthLimitReached { level, .. } => {
            eprintln!("  depth limit reached at level {level}");
        }
        ExpansionEvent::CandidateRejected {
            goal,
            validation_score,
            ..
        } => {
            tracing::debug!(goal = %goal, validation_score, "Candidate rejected");
        }
        ExpansionEvent::TreeStarted { .. } | ExpansionEvent::TreeCompleted { .. } => {}
    }
}

async fn cmd_show(config: &Config, goal: &str, output: Option<&Path>) -> anyhow::Result<()> {
    let store = SqliteTreeStore::open(&config.db_path).await?;
    match store.get(goal).await? {
        Some(stored) => {
            Validator::default().check_tree(&stored.tree)?;
            tracing::info!(
                goal = %goal,
                created_at = %stored.created_at.to_rfc3339(),
                updated_at = %stored.updated_at.to_rfc3339(),
                "Loaded attack tree"
            );
            write_tree(&stored.tree, output)
        }
        None => {
            println!("No attack tree stored for \"{goal}\"");
            Ok(())
        }
    }
}

async fn cmd_list(config: &Config) -> anyhow::Result<()> {
    let store = SqliteTreeStore::open(&config.db_path).await?;
    let goals = store.list_goals().await?;
    if goals.is_empty() {
        println!("No attack trees stored in {}", config.db_path.display());
    }
    for goal in goals {
        println!("{goal}");
    }
    Ok(())
}

/// Node type at `level` when walking the policy down from the root.
fn node_type_at(policy: &ChildGenerationPolicy, level: u32) -> String {
    let mut node_type = SURFACE_GOAL.to_string();
    for _ in 0..level {
        match policy.lookup(&node_type) {
            Some(spec) => node_type = spec.child_type.clone(),
            None => break,
        }
    }
    node_type
}

fn cmd_check(goal: &str, parent_goal: &str, level: u32) -> anyhow::Result<()> {
    let policy = ChildGenerationPolicy::default();
    let validator = Validator::default();

    let parent = AttackNode::new(
        parent_goal,
        level - 1,
        node_type_at(&policy, level - 1),
        None,
    );
    let candidate = AttackNode::child_of(&parent, goal, node_type_at(&policy, level));
    let report = validator.report(&candidate, &parent);
    let node = validator.validate(candidate, &parent)?;

    println!("Goal: {}", node.goal());
    println!("Parent: {}", parent.goal());
    println!("Level: {} ({})", node.level(), node.node_type());
    println!("\nApproval rules:");
    for outcome in &report.approval {
        println!("  [{}] {}", if outcome.passed { "PASS" } else { "FAIL" }, outcome.rule);
    }
    println!("\nAtomic boundary rules:");
    for outcome in &report.atomic {
        println!("  [{}] {}", if outcome.passed { "PASS" } else { "FAIL" }, outcome.rule);
    }
    println!(
        "\nScore: {}/{} ({})",
        node.validation_score(),
        validator.rules().approval_rule_count(),
        if node.approved() { "approved" } else { "rejected" }
    );
    match node.cvss() {
        Some(cvss) => println!(
            "Atomic: yes\nCVSS: {} base score {:.1}",
            cvss.vector_string(),
            cvss.base_score()
        ),
        None if node.level() < validator.min_atomic_level() => {
            println!("Atomic: no (levels below {} always expand)", validator.min_atomic_level())
        }
        None => println!("Atomic: no"),
    }
    Ok(())
}
