#![allow(clippy::useless_format)]

use clap::{Parser, Subcommand};
use colored::Colorize;
use playbooks_core::{applied_migrations, open_pool, CliErrorDisplay, LoggingConfig, PlaybookError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;

use commands::{
    cmd_import, cmd_list, cmd_show, cmd_update, handle_metrics_command, CommandContext,
    MetricsCommand,
};
use config::{load_config, mask_password};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "playbooks")]
#[command(version = VERSION)]
#[command(about = "Inspect and update playbooks with field-level authorization")]
#[command(long_about = r#"
Playbooks are reusable incident-response templates: broadcast channels,
webhooks, a default owner and a small set of tracked metrics.

Every update is diffed against the stored playbook, validated, and then
authorized field by field for the acting user. Use 'playbooks init' to run
database migrations, or pass --demo to work against a seeded in-memory store.
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(long, global = true, help = "Path to a configuration file")]
    config: Option<PathBuf>,

    #[arg(
        short,
        long,
        global = true,
        env = "PLAYBOOKS_USER",
        default_value = "cli",
        help = "User id to act as"
    )]
    user: String,

    #[arg(
        short,
        long = "capability",
        global = true,
        help = "Capability granted to the acting user (repeatable): admin, manage, broadcast, view"
    )]
    capabilities: Vec<String>,

    #[arg(
        short,
        long,
        global = true,
        default_value = "text",
        help = "Output format (text, json)"
    )]
    format: String,

    #[arg(long, global = true, help = "Use a seeded in-memory store instead of Postgres")]
    demo: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Initialize the database and run migrations")]
    Init,

    #[command(about = "Show a playbook with its metrics")]
    Show {
        #[arg(help = "Playbook id")]
        id: String,
    },

    #[command(about = "List playbooks ordered by title")]
    List,

    #[command(about = "Apply a sparse update from a JSON or YAML file")]
    Update {
        #[arg(help = "Playbook id")]
        id: String,

        #[arg(long, help = "Update document (.json, .yaml, .yml, or - for stdin JSON)")]
        file: PathBuf,
    },

    #[command(about = "Create a playbook from a JSON or YAML file")]
    Import {
        #[arg(long, help = "Playbook document (.json, .yaml, .yml)")]
        file: PathBuf,
    },

    #[command(about = "Add, update or delete playbook metrics")]
    Metrics {
        #[command(subcommand)]
        action: MetricsCommand,
    },

    #[command(about = "Show version information")]
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = load_config(cli.config.as_deref())
        .map(|c| c.logging)
        .unwrap_or_default();
    init_logging(cli.verbose, &logging);

    match run(cli).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<PlaybookError>() {
                Some(err) => eprint!("{}: {}", "Error".red().bold(), CliErrorDisplay::new(err)),
                None => eprintln!("{}: {:#}", "Error".red().bold(), e),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        logging.env_filter()
    };

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Init => cmd_init(cli.config.as_deref()).await,
        Commands::Version => cmd_version(),
        command => {
            let ctx = CommandContext::build(
                cli.config.as_deref(),
                &cli.user,
                &cli.capabilities,
                &cli.format,
                cli.demo,
            )
            .await?;

            match command {
                Commands::Show { id } => cmd_show(&ctx, &id).await,
                Commands::List => cmd_list(&ctx).await,
                Commands::Update { id, file } => cmd_update(&ctx, &id, &file).await,
                Commands::Import { file } => cmd_import(&ctx, &file).await,
                Commands::Metrics { action } => handle_metrics_command(&ctx, action).await,
                Commands::Init | Commands::Version => Ok(()),
            }
        }
    }
}

async fn cmd_init(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    println!("{}", "Initializing playbooks database...".cyan().bold());
    println!();

    let config = load_config(config_path)?;
    println!(
        "  {} Database URL: {}",
        "→".blue(),
        mask_password(&config.database.url)
    );

    println!("  {} Connecting and running migrations...", "→".blue());
    let pool = open_pool(&config.database, true).await?;
    let applied = applied_migrations(&pool).await?;
    println!("  {} Schema migrations applied: {}", "→".blue(), applied);

    pool.close().await;

    println!();
    println!(
        "{} {}",
        "✓".green().bold(),
        "Database initialized successfully!".green()
    );

    Ok(())
}

fn cmd_version() -> anyhow::Result<()> {
    println!("playbooks {}", VERSION);
    Ok(())
}
