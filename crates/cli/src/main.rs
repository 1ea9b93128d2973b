//! peercache command-line client.

mod api_client;

use anyhow::{Context, Result};
use api_client::ApiClient;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Annotated example node configuration.
const EXAMPLE_CONFIG: &str = include_str!("../../../config/server.example.toml");

#[derive(Parser)]
#[command(name = "peercache")]
#[command(version, about = "Client for peercache nodes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file, stored under the MD5 of its contents
    Upload {
        /// File to upload
        path: PathBuf,
        /// Node address (host:port or URL)
        #[arg(long, env = "PEERCACHE_SERVER", default_value = "127.0.0.1:1789")]
        server: String,
    },
    /// Download a cached file
    Download {
        /// Name of the cached file
        filename: String,
        /// Node address (host:port or URL)
        #[arg(long, env = "PEERCACHE_SERVER", default_value = "127.0.0.1:1789")]
        server: String,
        /// Write to this path instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the peer status of a node
    Status {
        /// Node address (host:port or URL)
        #[arg(long, env = "PEERCACHE_SERVER", default_value = "127.0.0.1:1789")]
        server: String,
    },
    /// Print an example node configuration
    ExampleConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so downloads can stream to stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli { command } = Cli::parse();

    match command {
        Commands::Upload { path, server } => {
            let client = ApiClient::new(&server)?;
            let filename = client
                .upload_file(&path)
                .await
                .with_context(|| format!("failed to upload {}", path.display()))?;
            tracing::info!(filename = %filename, "Upload complete");
            println!("{filename}");
        }
        Commands::Download {
            filename,
            server,
            output,
        } => {
            let client = ApiClient::new(&server)?;
            let written = match output {
                Some(path) => {
                    let mut file = tokio::fs::File::create(&path)
                        .await
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    let result = client.download_to(&filename, &mut file).await;
                    if result.is_err() {
                        drop(file);
                        let _ = tokio::fs::remove_file(&path).await;
                    }
                    result?
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    client.download_to(&filename, &mut stdout).await?
                }
            };
            tracing::info!(filename = %filename, bytes = written, "Download complete");
        }
        Commands::Status { server } => {
            let client = ApiClient::new(&server)?;
            let status = client.peer_status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::ExampleConfig => {
            print!("{EXAMPLE_CONFIG}");
        }
    }

    Ok(())
}
