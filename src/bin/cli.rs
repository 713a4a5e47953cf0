//! Cutover CLI - Main entry point for CLI binary
//!
//! Meant to be run periodically by a scheduler (systemd timer, cron).

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use cutover_lib::engine::{
    cli::{Cli, Commands, OutputFormat},
    config::UpdaterConfig,
    updater::{UpdateOptions, UpdateOutcome, UpdateState, Updater},
};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = run_cli(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    let mut config = UpdaterConfig::discover(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(root) = cli.install_root {
        config.install_root = root;
        config.validate()?;
    }
    let json = cli.format == OutputFormat::Json;

    match cli.command {
        Commands::Check => {
            cmd_update(&config, UpdateOptions { check_only: true, force: false }, json)?;
        }
        Commands::Update { force } => {
            cmd_update(&config, UpdateOptions { check_only: false, force }, json)?;
        }
        Commands::Status => {
            cmd_status(&config, json)?;
        }
        Commands::Versions => {
            cmd_versions(&config, json)?;
        }
    }

    Ok(())
}

fn cmd_update(config: &UpdaterConfig, options: UpdateOptions, json: bool) -> Result<()> {
    let updater = Updater::from_config(config)?;
    let outcome = updater.run(&options)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    match outcome {
        UpdateOutcome::NoUpdateAvailable => {
            println!("{} No usable update descriptor published", "•".yellow());
        }
        UpdateOutcome::UpToDate { version } => {
            println!("{} Already latest: {}", "✓".green(), version.bold());
        }
        UpdateOutcome::UpdateAvailable { installed, available } => {
            println!(
                "{} Update available: {} -> {}",
                "↑".cyan(),
                display_version(&installed),
                available.bold()
            );
        }
        UpdateOutcome::Updated { from, to, reported } => {
            println!("{} Updated {} -> {}", "✓".green(), display_version(&from), to.bold());
            if reported != to {
                println!("   {} binary reports {}", "warning:".yellow(), display_version(&reported));
            }
        }
    }

    Ok(())
}

fn cmd_status(config: &UpdaterConfig, json: bool) -> Result<()> {
    let updater = Updater::from_config(config)?;
    let current = updater.pointer().resolve()?;
    let installed = updater.installed_version();
    let state = UpdateState::load(&config.state_path())?;

    if json {
        println!("{}", serde_json::json!({
            "install_root": config.install_root.display().to_string(),
            "service": config.service_name,
            "current": current.as_ref().map(|p| p.display().to_string()),
            "installed_version": installed,
            "last_attempt": state,
        }));
        return Ok(());
    }

    println!("{}", "Cutover Status".bold());
    println!("   Install root: {}", config.install_root.display());
    println!("   Service:      {}", config.service_name);
    match &current {
        Some(path) => println!("   Current:      {}", path.display()),
        None => println!("   Current:      {}", "(unresolved)".red()),
    }
    println!("   Installed:    {}", display_version(&installed));
    println!("\n   Last attempt: {}", state.update_status);
    if let Some(target) = &state.target_version {
        println!("   Target:       {}", target);
    }
    if let Some(at) = state.last_check {
        println!("   Checked:      {}", at.to_rfc3339());
    }
    if let Some(at) = state.last_success {
        println!("   Succeeded:    {}", at.to_rfc3339());
    }

    Ok(())
}

fn cmd_versions(config: &UpdaterConfig, json: bool) -> Result<()> {
    let updater = Updater::from_config(config)?;
    let versions = updater.store().list_versions()?;
    let current = updater.pointer().resolve()?;

    if json {
        let entries: Vec<_> = versions
            .iter()
            .map(|a| serde_json::json!({
                "version": a.version,
                "path": a.path.display().to_string(),
                "active": current.as_ref() == Some(&a.path),
            }))
            .collect();
        println!("{}", serde_json::json!({ "versions": entries }));
        return Ok(());
    }

    println!("{}", "Installed Versions:".bold());
    if versions.is_empty() {
        println!("   (none)");
    }
    for artifact in &versions {
        if current.as_ref() == Some(&artifact.path) {
            println!("   {} {} {}", "*".green(), artifact.version.bold(), "(current)".green());
        } else {
            println!("     {}", artifact.version);
        }
    }

    Ok(())
}

fn display_version(version: &str) -> String {
    if version.is_empty() {
        "(unknown)".dimmed().to_string()
    } else {
        version.to_string()
    }
}
