use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Trident protocol gateway
#[derive(Debug, Parser)]
#[command(
    name = "trident",
    about = "OpenAI, Anthropic and Gemini endpoints in front of the Gemini v1internal API"
)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "trident.toml", env = "TRIDENT_CONFIG")]
    pub config: PathBuf,

    /// Override the listen address
    #[arg(long, env = "TRIDENT_LISTEN")]
    pub listen: Option<SocketAddr>,
}
