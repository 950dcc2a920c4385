//! modrt
//!
//! Runs and validates brick pipelines from the command line against the
//! built-in bricks and an in-memory mod variable store.

use mod_runtime::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
