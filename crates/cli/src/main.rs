use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "whatgpt")]
#[command(about = "AI auto-responder for a messaging account", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: WHATGPT_CONFIG_PATH or ~/.whatgpt/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Connect to the messaging bridge and answer incoming images and texts until interrupted.
    Run {
        /// Config file path (default: WHATGPT_CONFIG_PATH or ~/.whatgpt/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Bridge WebSocket URL (default: WHATGPT_BRIDGE_URL or bridge.url from config)
        #[arg(long, short, value_name = "URL")]
        bridge: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("whatgpt {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run { config, bridge }) => {
            if let Err(e) = run_bot(config, bridge).await {
                log::error!("run failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(whatgpt::config::default_config_path);
    let dir = whatgpt::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_bot(config_path: Option<PathBuf>, bridge: Option<String>) -> anyhow::Result<()> {
    let (config, path) = whatgpt::config::load_config(config_path)?;
    log::info!("using config {}", path.display());
    whatgpt::bot::run(config, bridge).await
}
