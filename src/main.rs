mod blobs;
mod cli;
mod config;
mod cursors;
mod database;
mod documents;
mod drives;
mod error;
mod events;
mod filter;
mod graph;
mod quickxor;
mod runs;
mod schema;
mod store;
mod sync;
mod utils;

use std::time::Instant;

use clap::Parser;
use flexi_logger::Logger;
use log::{error, info};

use cli::Cli;

fn main() {
    let args = Cli::parse();

    setup_logging(args.verbose());

    let start = Instant::now();
    info!("spmirror starting");

    match args.dispatch() {
        Ok(()) => {
            info!("spmirror completed successfully in {:.2?}", start.elapsed());
        }
        Err(err) => {
            error!("spmirror exited with error in {:.2?}", start.elapsed());
            error!("{err:?}");
            eprintln!("Error: {err}");
            std::process::exit(err.exit_code());
        }
    }
}

fn setup_logging(verbose: bool) {
    let spec = if verbose {
        "spmirror=debug"
    } else {
        "spmirror=info"
    };

    Logger::try_with_str(spec)
        .expect("log spec is valid")
        .log_to_stderr()
        .start()
        .expect("logger initializes");
}
