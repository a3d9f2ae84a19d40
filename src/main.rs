//! podmirror CLI - local TTL mirror of a podcast catalog

use clap::Parser;

use podmirror::cli::{self, CacheCommands, Cli, Commands, GlobalOptions, SignalCommands};
use podmirror::error::Result;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Err(err) = run(cli).await {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

/// `info` by default, `debug` with --debug; RUST_LOG wins over both
fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .target(env_logger::Target::Stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let opts = GlobalOptions::from_cli(&cli);

    match cli.command {
        Commands::Status => cli::status::run(&opts),
        Commands::Resolve { external_id, kind } => {
            cli::entity::resolve(&opts, &external_id, kind).await
        }
        Commands::Search {
            query,
            genre,
            sort,
            page,
        } => cli::search::run(&opts, &query, genre, sort, &page).await,
        Commands::Record { external_id } => cli::entity::record(&opts, &external_id),
        Commands::Sweep => cli::sweep::sweep(&opts).await,
        Commands::Maintain { every } => cli::sweep::maintain(&opts, every).await,
        Commands::Signal(cmd) => match cmd {
            SignalCommands::Show => cli::signal::show(&opts),
            SignalCommands::Bump => cli::signal::bump(&opts),
        },
        Commands::Cache(cmd) => match cmd {
            CacheCommands::Clear => cli::cache::clear(&opts),
            CacheCommands::Purge => cli::cache::purge(&opts),
            CacheCommands::Path => cli::cache::path(&opts),
        },
    }
}
