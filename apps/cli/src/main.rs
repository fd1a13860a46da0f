//! Courier CLI - HTTP requests from the command line
//!
//! Issues one request through a Courier session and reports the outcome,
//! with progress bars for request and response bodies.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use courier_core::HttpMethod;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Courier - HTTP client
#[derive(Parser)]
#[command(name = "courier")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Session configuration file (JSON)
    #[arg(long, env = "COURIER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human", global = true)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a GET request
    Get(RequestArgs),

    /// Send a HEAD request
    Head(RequestArgs),

    /// Send a POST request
    Post(BodyArgs),

    /// Send a PUT request
    Put(BodyArgs),

    /// Send a DELETE request
    Delete(RequestArgs),
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Request URL
    url: String,

    /// Extra header, as `name:value`
    #[arg(short = 'H', long = "header", value_name = "NAME:VALUE")]
    headers: Vec<String>,

    /// Save the response body to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// Deliver 4xx/5xx responses as successes
    #[arg(long)]
    passthrough: bool,

    /// Answer authentication challenges with `user:password`
    #[arg(long, value_name = "USER:PASSWORD")]
    user: Option<String>,
}

#[derive(Args, Debug)]
pub struct BodyArgs {
    #[command(flatten)]
    request: RequestArgs,

    /// Request body
    #[arg(short, long, conflicts_with = "data_file")]
    data: Option<String>,

    /// Read the request body from a file
    #[arg(long)]
    data_file: Option<PathBuf>,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Get(args) => {
            commands::send(config, HttpMethod::Get, args, None, cli.format).await?
        }

        Commands::Head(args) => {
            commands::send(config, HttpMethod::Head, args, None, cli.format).await?
        }

        Commands::Post(args) => {
            let body = commands::read_body(args.data, args.data_file).await?;
            commands::send(config, HttpMethod::Post, args.request, body, cli.format).await?
        }

        Commands::Put(args) => {
            let body = commands::read_body(args.data, args.data_file).await?;
            commands::send(config, HttpMethod::Put, args.request, body, cli.format).await?
        }

        Commands::Delete(args) => {
            commands::send(config, HttpMethod::Delete, args, None, cli.format).await?
        }
    }

    Ok(())
}
