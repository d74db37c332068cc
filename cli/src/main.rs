use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod util;

#[derive(Parser)]
#[command(name = "walkworthy", version, about = "WalkWorthy operator CLI: run scans and inspect pending encouragements")]
struct Cli {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scan for a user and print the outcome
    Scan {
        /// User subject (the id the app sends as x-user-sub)
        #[arg(long)]
        user: String,
    },
    /// Scan several users in turn. Without --user every linked user is scanned.
    Batch {
        /// User subject, repeatable
        #[arg(long = "user")]
        users: Vec<String>,
    },
    /// Show the encouragement the device would receive next
    Next {
        #[arg(long)]
        user: String,
    },
    /// Mark an encouragement as delivered
    Ack {
        #[arg(long)]
        user: String,
        /// Encouragement id
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // stdout carries command output, logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "walkworthy_scan=info,walkworthy=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let pool = util::connect(&cli.database_url).await;

    let code = match cli.command {
        Commands::Scan { user } => commands::scan::single(&pool, &user).await,
        Commands::Batch { users } => commands::scan::batch(&pool, &users).await,
        Commands::Next { user } => commands::encouragement::next(&pool, &user).await,
        Commands::Ack { user, id } => commands::encouragement::ack(&pool, &user, &id).await,
    };

    pool.close().await;
    std::process::exit(code);
}
