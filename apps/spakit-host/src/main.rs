use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use spakit::{Core, ReadyState, StartOptions};
use spakit_bootstrap::{register_config_service, AppConfig, CliArgs};

use std::path::{Path, PathBuf};
use std::sync::Arc;

mod modules;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Spakit host - runs the bundled modules on a spakit Core
#[derive(Parser)]
#[command(name = "spakit-host")]
#[command(about = "Spakit host - runs the bundled modules on a spakit Core")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the host
    Run,
    /// Validate configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (APP__*) -> 4) CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    let base_dir = match cli.config.as_deref().and_then(Path::parent) {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().context("cannot resolve working directory")?,
    };
    let logging_config = config.logging.clone().unwrap_or_default();
    spakit_bootstrap::init_logging(&logging_config, &base_dir);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_host(config).await,
        Commands::Check => check_config(config),
    }
}

/// Core with version, document state and extensions taken from `config`.
fn build_core(config: &AppConfig) -> Result<Core> {
    let mut builder = Core::builder();
    if let Some(version) = &config.core.version {
        builder = builder.with_version(version.clone());
    }
    let core = builder
        .with_document(spakit::HostDocument::new(config.core.initial_ready_state))
        .build();

    let extensions = config
        .core
        .extensions
        .iter()
        .map(|name| {
            spakit::extensions::builtin(name)
                .with_context(|| format!("unknown extension '{name}'"))
        })
        .collect::<Result<Vec<_>>>()?;
    core.use_extensions(extensions)?;
    modules::register_all(&core)?;
    Ok(core)
}

/// Instances to start, in module id order. Fails on entries naming unknown modules.
fn autostart_plan(core: &Core, config: &AppConfig) -> Result<Vec<(String, StartOptions)>> {
    let known = core.modules();
    let mut plan = Vec::new();
    for (id, entry) in config.module_entries()? {
        if !known.contains(&id) {
            anyhow::bail!("configuration names unknown module '{id}'");
        }
        if entry.autostart {
            plan.extend(entry.start_options().into_iter().map(|o| (id.clone(), o)));
        }
    }
    Ok(plan)
}

async fn run_host(config: AppConfig) -> Result<()> {
    config.validate()?;
    let core = build_core(&config)?;
    let plan = autostart_plan(&core, &config)?;
    register_config_service(core.services(), Arc::new(config))?;

    core.init()?;
    for (id, options) in plan {
        core.start_module(&id, options)?;
    }

    // everything configured has been started
    core.document().set_ready_state(ReadyState::Complete);
    core.ready().await?;
    tracing::info!(
        version = core.version(),
        running = ?core.running_modules(),
        "spakit host ready"
    );

    spakit_bootstrap::wait_for_shutdown().await?;
    core.stop_all_modules();
    tracing::info!("spakit host stopped");
    Ok(())
}

fn check_config(config: AppConfig) -> Result<()> {
    tracing::info!("Checking configuration…");
    config.validate()?;
    let core = build_core(&config)?;
    let plan = autostart_plan(&core, &config)?;
    println!("Configuration is valid ({} instance(s) to autostart)", plan.len());
    println!("{}", config.to_yaml()?);
    Ok(())
}
