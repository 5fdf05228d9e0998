//! CLI commands implementation.

mod drive;
mod serve;

use clap::{Args, Parser, Subcommand};

use crate::server::DEFAULT_QUOTA_HEADER;

#[derive(Parser)]
#[command(name = "qbench")]
#[command(about = "Paired HTTP load generator and quota-enforcing test server")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Generate load against one or more target URLs
    Drive(DriveArgs),
    /// Serve synthetic content and enforce quotas
    Serve(ServeArgs),
}

#[derive(Args)]
pub struct DriveArgs {
    /// Target URL, repeatable; each pass walks the pool in order
    #[arg(short, long = "url", value_name = "URL", required = true)]
    pub urls: Vec<String>,

    /// Number of parallel workers (out of range falls back to 1)
    #[arg(short, long, default_value_t = 1)]
    pub parallel: i64,

    /// Passes over the URL pool per worker; 0 means until interrupted
    #[arg(short, long, default_value_t = 0)]
    pub limit: i64,

    /// Pause between passes, in milliseconds
    #[arg(short = 'z', long, value_name = "MSEC", default_value_t = 0)]
    pub pause: i64,

    /// Reuse connections instead of closing after each request
    #[arg(short = 'A', long)]
    pub keepalive: bool,

    /// Body-size exponent to request (bytes = 2^N); negative draws a
    /// fresh value per request
    #[arg(short = 'B', long, value_name = "N", allow_negative_numbers = true)]
    pub bsize: Option<i32>,

    /// Delay exponent to request (milliseconds = 2^N); negative draws a
    /// fresh value per request
    #[arg(short = 'D', long, value_name = "N", allow_negative_numbers = true)]
    pub delay: Option<i32>,

    /// Extra request header as NAME:VALUE, repeatable
    #[arg(short = 'H', long = "header", value_name = "NAME:VALUE")]
    pub headers: Vec<String>,

    /// HTTP proxy as HOST[:PORT], no scheme
    #[arg(short = 'P', long, value_name = "HOST[:PORT]")]
    pub proxy: Option<String>,

    /// Quota name to charge, or @FILE with one name per line, repeatable;
    /// one name is drawn per request
    #[arg(short = 'Q', long = "quota", value_name = "NAME|@FILE")]
    pub quotas: Vec<String>,

    /// Also send the chosen quota name under this header
    #[arg(short = 'S', long, value_name = "HEADER")]
    pub quota_selector: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub print_config: bool,
}

#[derive(Args)]
pub struct ServeArgs {
    /// Address to bind to: PORT, HOST, or HOST:PORT
    #[arg(default_value = "127.0.0.1:3030")]
    pub bind: String,

    /// Quota as NAME:DENOM/DIVISOR[:POENA[:FLAGS]], or @FILE with one per
    /// line, repeatable
    #[arg(short = 'Q', long = "quota", value_name = "SPEC|@FILE")]
    pub quotas: Vec<String>,

    /// Request header that names the quota to charge
    #[arg(long, env = "QUOTABENCH_QUOTA_HEADER", default_value = DEFAULT_QUOTA_HEADER)]
    pub quota_header: String,

    /// Omit quota usage from the periodic report
    #[arg(long)]
    pub suppress_quotas: bool,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Drive(args) => drive::cmd_drive(args).await,
        Commands::Serve(args) => serve::cmd_serve(args).await,
    }
}
