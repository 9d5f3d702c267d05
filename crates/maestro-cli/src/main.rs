// maestro command-line entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use maestro_core::config::Settings;
use maestro_worker::{Runtime, Worker};

const HEADER: &str = r#"
   __  ___  ___    ____  ___  ____  ___   ___
  /  |/  / / _ |  / __/ / _/ / __/ / _ \ / _ \
 / /|_/ / / __ | / _/  _\ \  / /   / , _// // /
/_/  /_/ /_/ |_|/___/ /___/ /_/   /_/|_| \___/
"#;

#[derive(Parser)]
#[command(name = "maestro", version, about = "Distributed workflow orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Spawn concurrent workers attached to the job queue
    Worker {
        /// Number of concurrent worker processes
        #[arg(long, short, default_value_t = 4)]
        processes: usize,
    },
    /// Deploy the HTTP API server
    Server,
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv_loaded = dotenvy::dotenv().is_ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "maestro=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if !dotenv_loaded {
        tracing::debug!("no .env found in current directory, reading settings from environment");
    }

    println!("{HEADER}");
    println!(" ver. {}\n", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    match cli.command {
        Command::Worker { processes } => {
            let runtime = Runtime::connect(settings).await?;
            Worker::new(runtime).run(processes).await?;
        }
        Command::Server => {
            let runtime = Runtime::connect(settings).await?;
            maestro_api::serve(runtime).await?;
        }
    }

    Ok(())
}
