//! Warehouse Agent CLI.
//!
//! Usage:
//!   warehouse-agent chat                       Interactive conversation
//!   warehouse-agent ask "<question>"           One question, one answer
//!   warehouse-agent serve --backend <kind>     Host a tool set on stdin/stdout
//!   warehouse-agent tools [--probe]            Show advertised tools and routes
//!   warehouse-agent init                       Write a default config file
//!   warehouse-agent import-csv <file> --table <t> [--truncate]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use warehouse_agent::agent::{system_prompt, Orchestrator, TurnError};
use warehouse_agent::backend;
use warehouse_agent::config::{self, AppConfig, BackendKind};
use warehouse_agent::inference::InferenceClient;
use warehouse_agent::router::ToolRouter;
use warehouse_agent::tools::{tool_definitions, ToolCatalog};
use warehouse_agent::warehouse::{import, SqliteWarehouse};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "warehouse-agent")]
#[command(version)]
#[command(about = "Conversational tool-calling agent over a data warehouse")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the home directory (defaults to ~/.warehouse-agent).
    #[arg(long, global = true)]
    home: Option<String>,

    /// Config file (defaults to <home>/warehouse-agent.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (debug, info, warn, error); overrides the config file.
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start an interactive conversation.
    Chat,

    /// Ask one question and print the answer.
    Ask {
        question: String,
    },

    /// Host a backend tool set over stdin/stdout.
    Serve {
        #[arg(long, value_enum)]
        backend: BackendKind,
    },

    /// List the advertised tools and their routes.
    Tools {
        /// Start every backend and check it hosts its routed tools.
        #[arg(long)]
        probe: bool,
    },

    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Bulk-load a CSV file into an existing warehouse table.
    ImportCsv {
        file: PathBuf,

        #[arg(long)]
        table: String,

        /// Delete existing rows first.
        #[arg(long)]
        truncate: bool,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let home_dir = match &cli.home {
        Some(home) => PathBuf::from(shellexpand::tilde(home).into_owned()),
        None => config::default_home_dir(),
    };
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| home_dir.join(config::CONFIG_FILE));

    // `init` must work even when the existing file no longer parses.
    let cfg = match cli.command {
        Commands::Init { .. } => AppConfig::default(),
        _ => config::load_config(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?,
    };

    // Logs go to stderr: a backend's stdout carries protocol frames only.
    let level = cli.log_level.clone().unwrap_or_else(|| cfg.log_level.clone());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat => cmd_chat(&cfg, &config_path).await,
        Commands::Ask { question } => cmd_ask(&cfg, &config_path, &question).await,
        Commands::Serve { backend } => cmd_serve(&cfg, backend).await,
        Commands::Tools { probe } => cmd_tools(&cfg, &config_path, probe).await,
        Commands::Init { force } => cmd_init(&config_path, force),
        Commands::ImportCsv {
            file,
            table,
            truncate,
        } => cmd_import(&cfg, &file, &table, truncate),
    }
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

async fn cmd_chat(cfg: &AppConfig, config_path: &Path) -> Result<()> {
    let (mut orchestrator, router) = bootstrap(cfg, config_path)?;

    println!(
        "{} Warehouse assistant ready. Type {} or press Ctrl-D to leave; Ctrl-C cancels a running turn.",
        ">>>".green().bold(),
        "exit".bold()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", "❯".cyan().bold());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "exit" | "quit") {
            break;
        }

        match run_turn(&mut orchestrator, input).await {
            Ok(answer) => println!("{} {}", "Assistant →".green().bold(), answer.trim()),
            Err(e) if e.is_fatal() => {
                router.shutdown().await;
                return Err(e).context("Tool routing is misconfigured");
            }
            Err(TurnError::Cancelled) => println!("{}", "(cancelled)".dimmed()),
            Err(e) => eprintln!("{} {} (ask again to retry)", "Error:".red().bold(), e),
        }
    }

    router.shutdown().await;
    info!("Chat ended");
    Ok(())
}

async fn cmd_ask(cfg: &AppConfig, config_path: &Path, question: &str) -> Result<()> {
    let (mut orchestrator, router) = bootstrap(cfg, config_path)?;
    let result = run_turn(&mut orchestrator, question).await;
    router.shutdown().await;

    let answer = result.context("Could not answer the question")?;
    println!("{}", answer.trim());
    Ok(())
}

async fn cmd_serve(cfg: &AppConfig, kind: BackendKind) -> Result<()> {
    let toolset = backend::build_toolset(kind, cfg)?;

    backend::serve(tokio::io::stdin(), tokio::io::stdout(), toolset)
        .await
        .context("Backend channel failed")?;
    Ok(())
}

async fn cmd_tools(cfg: &AppConfig, config_path: &Path, probe: bool) -> Result<()> {
    let tools = tool_definitions();
    let router = ToolRouter::from_config(cfg, &tools, Some(config_path.to_path_buf()))?;

    println!();
    println!("{}", "=== Advertised Tools ===".bold());
    println!();
    for d in &tools {
        let backend = router.backend_for(&d.name).unwrap_or("-");
        println!("  {:<28} {}", d.name.bold(), backend.cyan());
        println!("    {}", d.description.dimmed());
    }
    println!();

    if probe {
        let verified = router.verify().await;
        router.shutdown().await;
        verified.context("Backend probe failed")?;
        println!("{} every backend hosts its routed tools", "OK".green().bold());
    }
    Ok(())
}

fn cmd_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        println!(
            "Config already exists at {} (use --force to overwrite).",
            config_path.display()
        );
        return Ok(());
    }

    config::save_config(&AppConfig::default(), config_path)?;
    println!("{} Wrote {}", ">>>".green().bold(), config_path.display());
    Ok(())
}

fn cmd_import(cfg: &AppConfig, file: &Path, table: &str, truncate: bool) -> Result<()> {
    let db_path = cfg.resolved_db_path();
    let db = SqliteWarehouse::open_writable(Path::new(&db_path))
        .with_context(|| format!("Failed to open warehouse at {db_path}"))?;

    let rows = import::import_csv(&db, file, table, truncate)
        .with_context(|| format!("Failed to import {}", file.display()))?;
    println!("{} Imported {} rows into {}", ">>>".green().bold(), rows, table);
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Wire the model, router, and orchestrator together.
fn bootstrap(cfg: &AppConfig, config_path: &Path) -> Result<(Orchestrator, Arc<ToolRouter>)> {
    let catalog = ToolCatalog::new(tool_definitions())?;
    let router = Arc::new(ToolRouter::from_config(
        cfg,
        catalog.descriptors(),
        Some(config_path.to_path_buf()),
    )?);
    let model = Arc::new(InferenceClient::new(&cfg.model));
    let prompt = system_prompt::build_system_prompt(cfg)?;

    let orchestrator = Orchestrator::new(
        model,
        router.clone(),
        catalog,
        prompt,
        cfg.orchestrator.clone(),
    );
    Ok((orchestrator, router))
}

/// One turn, cancellable with Ctrl-C.
async fn run_turn(orchestrator: &mut Orchestrator, input: &str) -> Result<String, TurnError> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => cancel.cancel(),
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
        })
    };

    let result = orchestrator.run_turn(input, &cancel).await;
    watcher.abort();
    result
}
