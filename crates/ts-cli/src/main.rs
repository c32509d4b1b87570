//! tenant-sweep CLI
//!
//! Command-line interface for Microsoft 365 tenant permission sweeps and
//! directory lifecycle runs.

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

mod commands;
mod config;
mod prompt;
mod validator;

use commands::{
    run_group, run_health, run_lookup, run_offboard, run_scan, run_sites, GroupArgs, LookupArgs,
    OffboardArgs, RunContext, RunOutcome, ScanArgs,
};
use config::AppConfig;
use ts_core::MembershipAction;
use ts_observability::{AuditEventType, AuditResult, LoggingConfig};
use ts_policy::KillSwitch;
use validator::ConfigValidator;

#[derive(Parser)]
#[command(name = "tenant-sweep")]
#[command(author = "Tenant Sweep Team")]
#[command(version)]
#[command(about = "Find and remove a user's access across a Microsoft 365 tenant", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Output format (text, json)
    #[arg(long, default_value = "text", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid output format: {}", s)),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Scan sites for a user's permissions and optionally remove them
    Scan(ScanArgs),

    /// Resolve a list of names to user principal names
    LookupUpn(LookupArgs),

    /// Disable a user, revoke sessions and remove group memberships
    Offboard(OffboardArgs),

    /// Add or remove users in a group
    Group {
        #[command(subcommand)]
        action: GroupCommands,
    },

    /// List tenant sites
    Sites {
        /// Include OneDrive personal sites
        #[arg(long)]
        include_onedrive: bool,
    },

    /// Check connectivity to Graph and SharePoint
    Health,

    /// Validate configuration
    Validate,

    /// Show current configuration
    Config {
        /// Show secrets (redacted by default)
        #[arg(long)]
        show_secrets: bool,
    },
}

#[derive(Subcommand)]
enum GroupCommands {
    /// Add users to a group
    Add(GroupArgs),

    /// Remove users from a group
    Remove(GroupArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = match AppConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) if cli.config.is_some() => {
            eprintln!("{}: {:#}", "Configuration file error".red().bold(), e);
            return ExitCode::from(1);
        }
        Err(_) => AppConfig::default(),
    };
    config.apply_env_overrides();

    let mut logging = LoggingConfig::for_verbosity(
        cli.verbose,
        cli.format == OutputFormat::Json || config.logging.json_format,
    );
    if cli.verbose == 0 {
        if let Some(level) = config.logging.level.as_deref().and_then(|l| l.parse().ok()) {
            logging.level = level;
        }
    }
    ts_observability::init_logging_with_config(logging);
    info!(config = %config_path.display(), "Configuration loaded");

    match run(cli, config, config_path).await {
        Ok(RunOutcome::Clean) => ExitCode::SUCCESS,
        Ok(RunOutcome::ItemFailures) => ExitCode::from(2),
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli, config: AppConfig, config_path: PathBuf) -> Result<RunOutcome> {
    match cli.command {
        Commands::Validate => return cmd_validate(&config, &config_path),
        Commands::Config { show_secrets } => return cmd_config(&config, show_secrets, cli.format),
        _ => {}
    }

    let validation = ConfigValidator::validate(&config);
    if validation.has_errors() {
        validation.print();
        anyhow::bail!("Configuration is invalid; run `tenant-sweep validate` for details");
    }

    let kill_switch = Arc::new(KillSwitch::new());
    let ctx = RunContext::new(config, cli.format, kill_switch.clone());
    spawn_interrupt_handler(kill_switch, ctx.audit.clone(), ctx.actor.clone());

    match cli.command {
        Commands::Scan(args) => run_scan(&ctx, args).await,
        Commands::LookupUpn(args) => run_lookup(&ctx, args).await,
        Commands::Offboard(args) => run_offboard(&ctx, args).await,
        Commands::Group { action } => match action {
            GroupCommands::Add(args) => run_group(&ctx, args, MembershipAction::Add).await,
            GroupCommands::Remove(args) => run_group(&ctx, args, MembershipAction::Remove).await,
        },
        Commands::Sites { include_onedrive } => run_sites(&ctx, include_onedrive).await,
        Commands::Health => run_health(&ctx).await,
        Commands::Validate | Commands::Config { .. } => Ok(RunOutcome::Clean),
    }
}

/// First Ctrl-C trips the kill switch so in-flight work drains; the second exits.
fn spawn_interrupt_handler(
    kill_switch: Arc<KillSwitch>,
    audit: ts_observability::AuditLog,
    actor: String,
) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!(
            "\n{}",
            "Interrupted: finishing in-flight work, press Ctrl-C again to exit".yellow()
        );
        if let Err(e) = kill_switch.activate(&actor, "interrupted from terminal").await {
            warn!(error = %e, "Kill switch activation failed");
        }
        audit
            .log_event(
                AuditEventType::CancellationRequested,
                &actor,
                "Run interrupted from terminal",
                AuditResult::Success,
            )
            .await;

        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Aborted".red());
            std::process::exit(130);
        }
    });
}

fn default_config_path() -> PathBuf {
    if let Some(dirs) = directories::ProjectDirs::from("com", "tenant-sweep", "tenant-sweep") {
        dirs.config_dir().join("config.yaml")
    } else {
        PathBuf::from("config/tenant-sweep.yaml")
    }
}

fn cmd_validate(config: &AppConfig, config_path: &std::path::Path) -> Result<RunOutcome> {
    eprintln!(
        "Validating configuration: {}",
        config_path.display().to_string().cyan()
    );
    if !config_path.exists() {
        eprintln!(
            "  {} no config file, using defaults and environment",
            "⚠".yellow()
        );
    }

    let validation_result = ConfigValidator::validate(config);
    validation_result.print();

    eprintln!();
    eprintln!("{}", "Configuration Summary".bold());
    eprintln!("─────────────────────");
    eprintln!("  Tenant: {}", config.tenant.tenant_id);
    eprintln!("  SharePoint: {}", config.tenant.tenant_name);
    eprintln!("  Concurrency: {}", config.scan.concurrency);
    eprintln!("  Batch size: {}", config.scan.batch_size);
    eprintln!("  Output: {}", config.output.directory.display());

    eprintln!();
    if validation_result.has_errors() {
        anyhow::bail!("Configuration validation failed. Fix the errors above.");
    } else if validation_result.has_warnings() {
        eprintln!(
            "{}",
            "Configuration is valid with warnings. Review the warnings above."
                .yellow()
                .bold()
        );
    } else {
        eprintln!("{}", "Configuration is valid.".green().bold());
    }
    Ok(RunOutcome::Clean)
}

fn cmd_config(config: &AppConfig, show_secrets: bool, format: OutputFormat) -> Result<RunOutcome> {
    let display_config = if show_secrets {
        config.clone()
    } else {
        config.redact_secrets()
    };

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&display_config)?);
    } else {
        print!("{}", serde_yaml::to_string(&display_config)?);
    }
    Ok(RunOutcome::Clean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scan_command() {
        let cli = Cli::parse_from([
            "tenant-sweep",
            "-vv",
            "--format",
            "json",
            "scan",
            "jdoe@contoso.com",
            "--stop-after",
            "3",
            "--fail-loud",
        ]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Scan(args) => {
                assert_eq!(args.user, "jdoe@contoso.com");
                assert_eq!(args.stop_after, Some(3));
                assert!(args.fail_loud);
            }
            _ => panic!("expected scan"),
        }
    }

    #[test]
    fn test_parse_group_remove() {
        let cli = Cli::parse_from([
            "tenant-sweep",
            "group",
            "remove",
            "grp-1",
            "--users",
            "a@contoso.com,b@contoso.com",
            "--mode",
            "dry-run",
        ]);
        match cli.command {
            Commands::Group {
                action: GroupCommands::Remove(args),
            } => {
                assert_eq!(args.users.len(), 2);
                assert_eq!(args.mode, ts_policy::RunMode::DryRun);
            }
            _ => panic!("expected group remove"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["tenant-sweep", "health", "--format", "json", "-v"]);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.verbose, 1);
    }
}
