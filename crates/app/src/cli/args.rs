pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "keyward")]
#[command(about = "Holds your keypair and asks before anything is signed")]
pub struct Args {
    /// Path to the keyward config directory (defaults to ~/.keyward)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
