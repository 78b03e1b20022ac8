//! `cohort` command line: run a scripted team from a TOML file.

mod scripted;

use clap::{Parser, Subcommand};
use cohort_core::TracingSink;
use cohort_orchestrator::{RunOptions, TeamOutput};
use scripted::TeamFile;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cohort", about = "Cohort: manager-driven agent teams")]
struct Cli {
    /// Path to the team file
    #[arg(short, long, default_value = "team.toml")]
    team: PathBuf,

    /// Write logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the team on a task and print the final answer
    Run {
        /// The task given to the manager
        task: String,
        /// Calls allowed per rate-limit window (overrides the team file)
        #[arg(long)]
        rate_limit: Option<u32>,
        /// Log full prompts and replies at debug level
        #[arg(short, long)]
        verbose: bool,
        /// Print the full output with metadata as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate the team file and print the roster
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let file = TeamFile::load(&cli.team).await.map_err(|e| {
        anyhow::anyhow!("Failed to load team file '{}': {}", cli.team.display(), e)
    })?;

    match cli.command {
        Commands::Run {
            task,
            rate_limit,
            verbose,
            json,
        } => {
            let team = file.build_team()?.with_sink(Arc::new(TracingSink));
            let mut options = RunOptions::default();
            if let Some(limit) = rate_limit {
                options = options.with_rate_limit(limit);
            }
            if verbose {
                options = options.verbose();
            }

            info!(manager = %team.manager_name(), members = ?team.member_names(), "Running team");
            let output = team.run(&task, options).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                print_summary(&output);
            }
        }
        Commands::Check => {
            let team = file.build_team()?;
            let config = team.config();
            println!("Team file '{}' is valid.", cli.team.display());
            println!("Manager: {}", team.manager_name());
            println!("Members:");
            for member in &file.members {
                let tools = if member.has_tools { " (tools)" } else { "" };
                println!("  {}{}", member.name, tools);
            }
            println!("Max iterations: {}", config.max_iterations);
            match &config.rate_limit {
                Some(rate) => println!(
                    "Rate limit: {} per {:?}",
                    rate.requests_per_interval,
                    rate.interval.as_duration()
                ),
                None => println!("Rate limit: none"),
            }
        }
    }

    Ok(())
}

fn print_summary(output: &TeamOutput) {
    let meta = &output.metadata;
    println!("{}\n", output.output);
    println!(
        "Run {}: {} iteration(s), stopped by {:?}{}",
        meta.run_id,
        meta.iterations,
        meta.completion,
        if meta.converged { "" } else { " (not converged)" }
    );
    println!(
        "Tasks: {} total, {} completed, {} failed, {} canceled, {} unfinished",
        meta.counts.total,
        meta.counts.completed,
        meta.counts.failed,
        meta.counts.canceled,
        meta.counts.pending + meta.counts.in_progress
    );
    for task in &meta.tasks {
        println!("  {} [{}] {}", task.id, task.agent_name, task.status);
    }
    println!(
        "Tokens: {} in / {} out, {} ms",
        meta.token_usage.input_tokens, meta.token_usage.output_tokens, meta.duration_ms
    );
}
