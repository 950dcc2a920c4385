use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use crate::config::RuntimeConfig;
use crate::errors::ExecutionError;
use crate::init::{init_logging, InitBuilder};
use crate::pipeline::{compile_pipeline, MemoryTraceSink, Pipeline, RenderContext};
use crate::types::JsonValue;

#[derive(Parser)]
#[command(name = "modrt")]
#[command(about = "modrt - run and validate brick pipelines", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides MODRT_CONFIG_PATH)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a pipeline with the built-in bricks and print its output
    Run {
        /// Pipeline file (JSON array of brick invocations)
        pipeline: PathBuf,

        /// JSON file bound as `@input`
        #[arg(short = 'i', long = "input")]
        input: Option<PathBuf>,

        /// JSON file bound as `@options`
        #[arg(long = "options")]
        options: Option<PathBuf>,

        /// Mod the run belongs to; enables `mod` state and `@mod`
        #[arg(long = "mod-id")]
        mod_id: Option<String>,

        /// Component the run belongs to; enables `private` state
        #[arg(long = "component-id")]
        component_id: Option<String>,

        /// Run renderer bricks instead of interrupting
        #[arg(long = "not-headless")]
        not_headless: bool,

        /// Print trace records to stderr after the run
        #[arg(long)]
        trace: bool,
    },

    /// Compile a pipeline and print it with instance ids assigned
    Validate {
        /// Pipeline file (JSON array of brick invocations)
        pipeline: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Load eagerly so config errors show before any command output
    let config = RuntimeConfig::builder()
        .config_path(cli.config.as_ref().map(PathBuf::from))
        .build()?;

    match cli.command {
        Commands::Run {
            pipeline,
            input,
            options,
            mod_id,
            component_id,
            not_headless,
            trace,
        } => {
            // A second subscriber is harmless; only the first wins
            init_logging(&config).ok();

            let pipeline = load_pipeline(&pipeline)?;
            let mut context = RenderContext::new();
            if let Some(path) = input {
                context = context.with_input(read_json(&path)?);
            }
            if let Some(path) = options {
                context = context.with_options(read_json(&path)?);
            }

            let sink = Arc::new(MemoryTraceSink::new());
            let mut builder = InitBuilder::new().trace_sink(sink.clone());
            if let Some(path) = &cli.config {
                builder = builder.config_path(path.clone());
            }
            if not_headless {
                builder = builder.headless(false);
            }
            let app = builder.init().await?;

            let mut run_options = app.run_options();
            if let Some(mod_id) = mod_id {
                run_options = run_options.with_mod(mod_id);
            }
            if let Some(component_id) = component_id {
                run_options = run_options.with_component(component_id);
            }

            let result = app.executor.run(&pipeline, context, &run_options).await;

            if trace {
                for record in sink.records().await {
                    eprintln!("{}", serde_json::to_string(&record)?);
                }
            }

            println!("{}", serde_json::to_string_pretty(&render_result(result)?)?);
        }

        Commands::Validate { pipeline } => {
            let mut pipeline = load_pipeline(&pipeline)?;
            compile_pipeline(&mut pipeline)?;
            println!("{}", serde_json::to_string_pretty(&pipeline)?);
            eprintln!("✓ {} top-level step(s) valid", pipeline.len());
        }

        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

/// Headless interrupts are a successful outcome at the CLI: the panel payload
/// is printed instead of an output.
fn render_result(result: Result<crate::pipeline::PipelineOutput, ExecutionError>) -> Result<JsonValue> {
    match result {
        Ok(output) => Ok(json!({ "output": output.output })),
        Err(ExecutionError::Headless(interrupt)) => Ok(json!({ "headless": interrupt })),
        Err(err) => Err(err.into()),
    }
}

fn read_json(path: &Path) -> Result<JsonValue> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn load_pipeline(path: &Path) -> Result<Pipeline> {
    let value = read_json(path)?;
    serde_json::from_value(value).with_context(|| format!("{} is not a pipeline", path.display()))
}
