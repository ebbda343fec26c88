use std::{env, path::PathBuf, process::exit, time::Duration};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use repossessed::{
    commands::{self, DumpOptions},
    config::{ClientConfig, Scheme, DOCKER_USER_AGENT},
    layer::LayerSelection,
    registry::RegistryClient,
};
use tracing_subscriber::EnvFilter;

/// Docker container registry enumeration.
#[derive(Debug, Parser)]
#[command(name = "repossessed", version, about)]
struct Cli {
    /// Log debug output (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// User agent sent with every request
    #[arg(long, global = true, env = "REPOSSESSED_USER_AGENT", default_value = DOCKER_USER_AGENT)]
    user_agent: String,

    /// Fetch manifests and blobs over HTTPS without certificate checks
    #[arg(long, global = true)]
    tls: bool,

    /// Connect timeout in seconds for manifest and blob requests
    #[arg(long, global = true, default_value_t = 10)]
    connect_timeout: u64,

    /// Read timeout in seconds for manifest and blob requests
    #[arg(long, global = true, default_value_t = 60)]
    read_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Enumerate host details
    #[command(name = "enum")]
    Enumerate(EnumArgs),
    /// Dump repository and search extracted files
    Dump(DumpArgs),
    /// Clone an entire registry
    Clone(CloneArgs),
}

#[derive(Debug, Args)]
struct EnumArgs {
    /// Registry host, optionally with a port
    #[arg(short = 'H', long)]
    host: String,

    /// Only show repos and tags containing this text
    #[arg(short, long)]
    search: Option<String>,
}

#[derive(Debug, Args)]
struct DumpArgs {
    #[arg(short = 'H', long)]
    host: String,

    #[arg(short, long)]
    repo: String,

    #[arg(short, long)]
    tag: String,

    /// Single layer to download, 99 for the last one
    #[arg(short, long)]
    index: Option<usize>,

    /// Number of leading layers to download, 99 for everything but the last
    #[arg(long)]
    first: Option<usize>,

    /// Command to run on the extraction folder
    #[arg(long)]
    run_on_folder: Option<String>,

    /// Find secrets and passwords in common locations
    #[arg(short = 's', long)]
    find_secrets: bool,
}

#[derive(Debug, Args)]
struct CloneArgs {
    #[arg(short = 'H', long)]
    host: String,

    /// Directory that receives one folder per repository and tag
    #[arg(short = 'O', long)]
    output: PathBuf,
}

impl Cli {
    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            user_agent: self.user_agent.clone(),
            transfer_scheme: if self.tls { Scheme::Https } else { Scheme::Http },
            transfer_connect_timeout: Duration::from_secs(self.connect_timeout),
            transfer_read_timeout: Duration::from_secs(self.read_timeout),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.client_config();

    match cli.command {
        Command::Enumerate(args) => {
            let client = RegistryClient::new(&args.host, &config)?;
            let program = env::args().next().unwrap_or_else(|| "repossessed".to_string());
            commands::enumerate(&client, args.search.as_deref(), &program).await;
        }
        Command::Dump(args) => {
            let client = RegistryClient::new(&args.host, &config)?;
            let options = DumpOptions {
                repo: args.repo,
                tag: args.tag,
                selection: LayerSelection::from_args(args.index, args.first),
                run_on_folder: args.run_on_folder,
                find_secrets: args.find_secrets,
            };

            commands::dump(&client, &options)
                .await
                .with_context(|| format!("Cannot dump {}:{}", options.repo, options.tag))?;
        }
        Command::Clone(args) => {
            let client = RegistryClient::new(&args.host, &config)?;
            let summary = commands::clone_registry(&client, &args.output)
                .await
                .with_context(|| format!("Cannot clone {} into {}", args.host, args.output.display()))?;

            if !summary.failed.is_empty() {
                tracing::warn!(
                    cloned = summary.cloned.len(),
                    failed = summary.failed.len(),
                    "Some tags could not be cloned"
                );
                exit(1);
            }
        }
    }

    Ok(())
}
