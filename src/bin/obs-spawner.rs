//! Per-host spawner daemon for observation controllers

use clap::Parser;
use obsctl::{ProcessLauncher, SearchPathLocator, ServiceAddress, SpawnerConfig, SpawnerServer};
use slog::Drain;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "obs-spawner", version, about = "Launches controllers on request of their parents")]
struct Args {
    /// Address to listen on (tcp://host:port or unix:///path)
    #[arg(long, default_value = "tcp://0.0.0.0:24001")]
    listen: String,

    /// Directory searched for controller programs; repeatable, defaults to PATH
    #[arg(long = "search-path")]
    search_paths: Vec<PathBuf>,

    /// Seconds a launched controller has to announce itself
    #[arg(long, default_value_t = 20)]
    announce_timeout: u64,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let level = if args.verbose {
        slog::Level::Debug
    } else {
        slog::Level::Info
    };
    let drain = slog::LevelFilter::new(drain, level).fuse();
    let logger = slog::Logger::root(drain, slog::o!("service" => "obs-spawner"));
    let _guard = slog_scope::set_global_logger(logger);

    let address: ServiceAddress = args.listen.parse()?;
    let mut config =
        SpawnerConfig::default().with_announce_timeout(Duration::from_secs(args.announce_timeout));
    for path in args.search_paths {
        config = config.with_search_path(path);
    }
    let locator = SearchPathLocator::new(config.search_paths.clone());

    let server = SpawnerServer::bind(&address, config, locator, ProcessLauncher).await?;
    slog::info!(slog_scope::logger(), "spawner ready"; "address" => %server.local_address());
    server.run().await;
    Ok(())
}
