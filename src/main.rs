use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use n8n_mcp::config::{EXAMPLE_CONFIG_PATH, Settings, SystemEnv, VERSION};
use n8n_mcp::mcp::N8nMcpServer;
use n8n_mcp::{N8nClient, logging};

/// n8n-mcp - MCP server for managing n8n workflows
///
/// Settings are read from a JSON config file (config/config.json,
/// ./config.json, ~/.n8n-mcp/config.json or /etc/n8n-mcp/config.json), or
/// with --env from N8N_BASE_URL, N8N_API_KEY and related variables.
/// A .env file in the working directory is loaded first.
///
/// Examples:
///   n8n-mcp init-config      # Write config/config.example.json
///   n8n-mcp --env health     # Check the API using environment settings
///   n8n-mcp -c my.json       # Serve MCP over stdio
#[derive(Parser, Debug)]
#[command(author, version = VERSION, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file to load
    #[arg(
        long = "config",
        short = 'c',
        value_name = "PATH",
        global = true,
        conflicts_with = "env"
    )]
    pub config: Option<PathBuf>,

    /// Read settings from environment variables instead of a file
    #[arg(long = "env", global = true)]
    pub env: bool,

    /// Log at debug level
    #[arg(long = "debug", short = 'd', global = true)]
    pub debug: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Serve the workflow tools over stdio (default)
    Serve,

    /// Check that the n8n API is reachable; exits non-zero if not
    Health,

    /// Write an example config file
    InitConfig(InitConfigArgs),
}

#[derive(clap::Args, Debug)]
pub struct InitConfigArgs {
    /// Where to write the example config
    #[arg(long = "output", short = 'o', value_name = "PATH", default_value = EXAMPLE_CONFIG_PATH)]
    pub output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    // a missing .env file is fine
    let _ = dotenvy::dotenv();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::InitConfig(args) => init_config(&args.output),
        Commands::Health => {
            let settings = load_settings(cli.config.as_deref(), cli.env)?;
            health(&settings, cli.debug).await
        }
        Commands::Serve => {
            let settings = load_settings(cli.config.as_deref(), cli.env)?;
            serve(&settings, cli.debug).await
        }
    }
}

fn load_settings(config: Option<&Path>, from_env: bool) -> Result<Settings> {
    if from_env {
        Settings::load_from_env(&SystemEnv).context("Failed to load settings from environment")
    } else {
        Settings::load_from_file(config)
    }
}

async fn serve(settings: &Settings, debug: bool) -> Result<ExitCode> {
    logging::init(&settings.logging, debug)?;
    settings.validate()?;

    info!(
        "{} v{} starting",
        settings.mcp.server_name, settings.mcp.version
    );
    N8nMcpServer::new(settings)?.run_stdio().await?;
    Ok(ExitCode::SUCCESS)
}

async fn health(settings: &Settings, debug: bool) -> Result<ExitCode> {
    logging::init(&settings.logging, debug)?;
    settings.validate()?;

    let client = N8nClient::new(settings.client_config())?;
    if client.health_check().await? {
        println!("healthy");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("unhealthy");
        Ok(ExitCode::FAILURE)
    }
}

fn init_config(output: &Path) -> Result<ExitCode> {
    Settings::example().save_to_file(output)?;
    println!("{}", output.display());
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_defaults_to_serve() {
        let cli = Cli::try_parse_from(["n8n-mcp"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, None);
        assert!(!cli.env);
        assert!(!cli.debug);
    }

    #[test]
    fn test_cli_health_with_global_flags() {
        let cli = Cli::try_parse_from(["n8n-mcp", "health", "--env", "--debug"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Health)));
        assert!(cli.env);
        assert!(cli.debug);
    }

    #[test]
    fn test_cli_config_path() {
        let cli = Cli::try_parse_from(["n8n-mcp", "-c", "/etc/n8n.json", "serve"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Serve)));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/n8n.json")));
    }

    #[test]
    fn test_cli_config_conflicts_with_env() {
        let result = Cli::try_parse_from(["n8n-mcp", "--config", "a.json", "--env"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_init_config_output() {
        let cli = Cli::try_parse_from(["n8n-mcp", "init-config"]).unwrap();
        match cli.command {
            Some(Commands::InitConfig(args)) => {
                assert_eq!(args.output, PathBuf::from(EXAMPLE_CONFIG_PATH));
            }
            _ => panic!("Expected InitConfig command"),
        }

        let cli = Cli::try_parse_from(["n8n-mcp", "init-config", "-o", "/tmp/c.json"]).unwrap();
        match cli.command {
            Some(Commands::InitConfig(args)) => {
                assert_eq!(args.output, PathBuf::from("/tmp/c.json"));
            }
            _ => panic!("Expected InitConfig command"),
        }
    }

    #[test]
    fn test_cli_unknown_subcommand_fails() {
        assert!(Cli::try_parse_from(["n8n-mcp", "execute"]).is_err());
    }
}
