use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kontur_core::KonturConfig;
use kontur_guardian::{GuardianOrgan, PolicyEngine};
use kontur_memory::{InMemorySimilarity, MemoryOrgan, MemoryStore};
use kontur_os::ScriptBackend;
use kontur_reasoning::{providers, GenerationParams, Orchestrator, TaskOrgan};
use kontur_runtime::{Organ, OrganRuntime};
use serde_json::Value;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "kontur", author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "KONTUR_CONFIG", default_value = "kontur.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an organ on stdin/stdout until end-of-input or SHUTDOWN
    Organ {
        #[arg(value_enum)]
        kind: OrganKind,
    },
    /// Run one goal to completion and print the outcome
    Task {
        #[arg(required = true, num_args = 1..)]
        goal: Vec<String>,
    },
    /// Audit a single operation and print the result
    Audit {
        operation: String,
        /// Operation arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OrganKind {
    Guardian,
    Memory,
    Task,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Stdout belongs to the packet stream; diagnostics go to stderr only.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args.config)?;

    match args.command {
        Command::Organ { kind } => match kind {
            OrganKind::Guardian => {
                serve(GuardianOrgan::new(config.guardian.clone()), &config).await
            }
            OrganKind::Memory => {
                let store = MemoryStore::open(config.memory.clone())?;
                serve(MemoryOrgan::new(store), &config).await
            }
            OrganKind::Task => {
                let orchestrator = build_orchestrator(&config).await?;
                serve(TaskOrgan::new(orchestrator), &config).await
            }
        },
        Command::Task { goal } => {
            let goal = goal.join(" ");
            let mut orchestrator = build_orchestrator(&config).await?;
            let outcome = orchestrator.run(&goal).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.is_success() {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Audit { operation, args } => {
            let args: Value =
                serde_json::from_str(&args).context("--args must be valid JSON")?;
            let mut engine = PolicyEngine::new(config.guardian.clone());
            let result = engine.audit(&operation, &args);
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}

/// An explicitly present file must parse; a missing one means defaults.
fn load_config(path: &Path) -> Result<KonturConfig> {
    if path.exists() {
        KonturConfig::load(path)
    } else {
        Ok(KonturConfig::load_or_default(path))
    }
}

async fn serve<O: Organ>(organ: O, config: &KonturConfig) -> Result<()> {
    info!("Starting organ {}", organ.urn());
    let mut runtime = OrganRuntime::new(organ, config.runtime.clone());
    let summary = runtime.run_stdio().await?;
    info!(
        "Processed {} packets ({} handled, {} faults, {} malformed, {} heartbeats)",
        summary.packets,
        summary.handled,
        summary.faults,
        summary.decode_errors,
        summary.heartbeats
    );
    Ok(())
}

async fn build_orchestrator(config: &KonturConfig) -> Result<Orchestrator> {
    let generator = providers::from_config(&config.llm)?;
    info!(
        "Orchestrator using {} generator, {} backend",
        generator.name(),
        config.automation.program
    );
    let memory = MemoryStore::open(config.memory.clone())?;
    let orchestrator = Orchestrator::new(
        config.orchestrator.clone(),
        generator,
        Arc::new(InMemorySimilarity::new()),
        Arc::new(ScriptBackend::new(&config.automation)),
        memory,
    )
    .with_params(GenerationParams::from(&config.llm));

    let indexed = orchestrator.seed_similarity().await;
    if indexed > 0 {
        info!("Indexed {} remembered solutions", indexed);
    }
    Ok(orchestrator)
}
