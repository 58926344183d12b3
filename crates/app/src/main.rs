// CLI modules
mod cli;

// Host process: config directory, logging, transport, prompt, ledger
mod console;
mod ledger;
mod process;
mod state;
mod transport;

use clap::{Parser, Subcommand};
use cli::{args::Args, op::Op, Init, Serve, Version};

command_enum! {
    (Init, Init),
    (Serve, Serve),
    (Version, Version),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let ctx = cli::op::OpContext::new(args.config_path);

    match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
