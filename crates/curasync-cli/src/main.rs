//! curasync CLI tool.

use clap::{Parser, Subcommand, ValueEnum};
use curasync_upload::UploadMode;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::upload::UploadArgs;

#[derive(Parser)]
#[command(name = "curasync")]
#[command(about = "Sync curated ephys assets to S3 and Code Ocean", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, env = "CURASYNC_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload curation assets and register them with Code Ocean
    Upload {
        #[command(subcommand)]
        command: UploadCommands,
    },
    /// Run or inspect the sync workflow
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },
}

#[derive(Subcommand)]
enum UploadCommands {
    /// Curation files added or modified by the last commit
    New(UploadArgs),
    /// Every curation file in the repository
    All(UploadArgs),
    /// Whole ecephys folders added by the last commit
    Folders(UploadArgs),
}

#[derive(Subcommand)]
enum WorkflowCommands {
    /// Run the workflow for a push event
    Run {
        /// Workflow file; the built-in workflow is used when omitted
        #[arg(long)]
        config: Option<PathBuf>,
        /// Push event payload
        #[arg(long, env = "GITHUB_EVENT_PATH")]
        event: Option<PathBuf>,
        /// Directory holding the repository checkout
        #[arg(long, default_value = ".")]
        workspace: PathBuf,
        /// Run even if the event does not match the workflow's triggers
        #[arg(long)]
        force: bool,
    },
    /// Validate a workflow file
    Validate {
        /// Path to the workflow file
        path: PathBuf,
    },
    /// Print a workflow's steps
    Show {
        /// Workflow file; the built-in workflow is shown when omitted
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Upload { command } => {
            let (mode, args) = match command {
                UploadCommands::New(args) => (UploadMode::New, args),
                UploadCommands::All(args) => (UploadMode::All, args),
                UploadCommands::Folders(args) => (UploadMode::Folders, args),
            };
            commands::upload::run(mode, args).await?;
        }
        Commands::Workflow { command } => match command {
            WorkflowCommands::Run {
                config,
                event,
                workspace,
                force,
            } => {
                commands::workflow::run(config, event, workspace, force).await?;
            }
            WorkflowCommands::Validate { path } => {
                commands::workflow::validate(&path)?;
            }
            WorkflowCommands::Show { config } => {
                commands::workflow::show(config)?;
            }
        },
    }

    Ok(())
}
