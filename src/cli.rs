use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cargohold",
    version,
    about = "Content-addressed OCI distribution registry",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the registry HTTP server
    Serve {
        #[arg(short, long, help = "Path to a JSON config file")]
        config: Option<PathBuf>,

        #[arg(long, help = "Listen address, overrides the config file")]
        host: Option<String>,

        #[arg(long, help = "Listen port, overrides the config file")]
        port: Option<u16>,

        #[arg(long, help = "Storage base directory, overrides the config file")]
        base_dir: Option<PathBuf>,
    },
}
