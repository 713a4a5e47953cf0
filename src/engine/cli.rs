//! Cutover CLI Module
//! Command-line interface for update operations

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cutover")]
#[command(author = "Cutover Team")]
#[command(version)]
#[command(about = "Atomic self-updater for locally installed services", long_about = None)]
pub struct Cli {
    /// Config file (defaults to $CUTOVER_CONFIG, then the user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the install root from the config
    #[arg(long, global = true)]
    pub install_root: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check whether a newer version is published, without installing
    Check,

    /// Download, verify and switch to the published version
    Update {
        /// Reinstall even if the installed version already matches
        #[arg(long)]
        force: bool,
    },

    /// Show the installed version, current pointer and last attempt
    Status,

    /// List installed versions
    Versions,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_update_force() {
        let cli = Cli::parse_from(["cutover", "--format", "json", "update", "--force"]);
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Update { force: true }));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["cutover", "check", "--install-root", "/srv/app"]);
        assert_eq!(cli.install_root, Some(PathBuf::from("/srv/app")));
        assert!(matches!(cli.command, Commands::Check));
    }
}
