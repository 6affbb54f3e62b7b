use crate::demo::{run_demo, run_ingest, DemoArgs, IngestArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use listing_hub::error::AppError;
use listing_hub::workflows::listings::UserId;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Listing Hub",
    about = "Run the listing hub service or exercise its workflows from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Walk one listing through draft, review, and moderation
    Demo(DemoArgs),
    /// Normalize local image files into the configured media store
    Ingest(IngestArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// CSV catalog to import as published items before serving
    #[arg(long, requires = "seed_operator")]
    pub(crate) seed_csv: Option<PathBuf>,
    /// User id recorded as the creator of seeded items
    #[arg(long, value_parser = UserId::parse)]
    pub(crate) seed_operator: Option<UserId>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args),
        Command::Ingest(args) => run_ingest(args),
    }
}
