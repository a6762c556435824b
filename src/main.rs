use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing::debug;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use listreply::commands;
use listreply::config::CredentialArgs;

#[derive(Parser, Debug)]
#[command(
    name = "listreply",
    version,
    about = "Reply to new tweets in Twitter lists",
    long_about = "Polls Twitter lists and sends generated replies to new original tweets, \
                  capped per author per day"
)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    credentials: CredentialArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run continuously over one or more lists with a shared daily quota
    Daemon(commands::daemon::DaemonCommand),

    /// Monitor a single list
    Watch(commands::watch::WatchCommand),

    /// Check that lists are readable and preview their latest tweets
    CheckLists {
        /// List IDs or URLs to check
        #[arg(short, long = "list", required = true, action = clap::ArgAction::Append)]
        lists: Vec<String>,
    },

    /// Generate a reply for some text without publishing it
    TestReply {
        /// Tweet text to reply to
        #[arg(required = true)]
        text: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let args = Cli::parse();

    // Initialize logging
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if args.verbose {
        debug!("Verbose mode enabled");
    }

    match args.command {
        Commands::Daemon(cmd) => cmd.execute(&args.credentials).await?,
        Commands::Watch(cmd) => cmd.execute(&args.credentials).await?,
        Commands::CheckLists { lists } => {
            commands::check_lists::execute(&lists, &args.credentials).await?
        }
        Commands::TestReply { text } => {
            commands::test_reply::execute(&text, &args.credentials).await?
        }
    }

    Ok(())
}
