use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use watchtower::{
    agent::Agent,
    config::{Config, read_config_file},
    storage::StorageError,
};

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Local monitoring agent with embedded storage and alerting")]
struct Args {
    /// Config file (JSON); built-in defaults are used without one
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Log everything down to TRACE
    #[arg(short, long)]
    verbose: bool,
}

fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };
    let filter = filter::Targets::new().with_targets(vec![
        ("watchtower", level),
        ("watchtower_agent", level),
        ("tower_http", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = match &args.file {
        Some(path) => read_config_file(path)?,
        None => {
            let mut config = Config::default();
            config.apply_env_overrides()?;
            config.validate()?;
            config
        }
    };

    let mut agent = Agent::new(config).await?;
    agent.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("received interrupt");

    agent.shutdown().await
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(StorageError::SchemaMismatch(detail)) = e.downcast_ref::<StorageError>() {
                error!("database schema does not match this build: {}", detail);
                return ExitCode::from(2);
            }
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
