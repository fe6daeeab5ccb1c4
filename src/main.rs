// src/main.rs
use std::path::PathBuf;
use std::process;

use clap::Parser;

use mazurka::config::ServerConfig;
use mazurka::logging::init_logging;
use mazurka::server::Server;

#[derive(Parser)]
#[command(name = "mazurka")]
#[command(about = "Zero-copy HTTP/1.1 static file server")]
#[command(version)]
struct Cli {
    /// Port to listen on
    port: u16,
    /// Directory served as the document root
    #[arg(long)]
    root: Option<PathBuf>,
    /// Worker threads (defaults to the number of CPU cores)
    #[arg(long)]
    workers: Option<usize>,
    /// JSON configuration file; flags given here override its values
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match ServerConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("{}", e);
                process::exit(1);
            }
        },
        None => ServerConfig::default(),
    };
    config.port = cli.port;
    if let Some(root) = cli.root {
        config.document_root = root;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }

    let server = match Server::bind(config) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("{}", e);
            process::exit(1);
        }
    };
    if let Err(e) = server.serve() {
        tracing::error!("{}", e);
        process::exit(1);
    }
}
