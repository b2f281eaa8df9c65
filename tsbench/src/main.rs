//! Entrypoint of the tsbench binary
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr,
    clippy::future_not_send
)]

use dotenvy::dotenv;
use tsbench_clap_blocks::tokio::TokioIoConfig;
use trogging::{
    TroggingGuard,
    cli::{LoggingConfig, LoggingConfigBuilderExt},
    tracing_subscriber::{Registry, prelude::*},
};

mod commands {
    pub(crate) mod common;
    pub(crate) mod gen_csv;
    pub(crate) mod query;
    pub(crate) mod write;
}

enum ReturnCode {
    Failure = 1,
}

#[derive(Debug, clap::Parser)]
#[clap(
    name = "tsbench",
    about = "Write and query benchmarks for time-series databases",
    long_about = r#"Write and query benchmarks for time-series databases

Examples:
    # Write 10000 records per client with 7 clients into TDengine, 3 rounds
    tsbench write --target tdengine -T 7 -n 10000 -r 1000 --retry 3

    # Spread the records over 70 tables
    tsbench write --target clickhouse -T 7 -n 700000 -t 70 --mode multi

    # Run the query probes against the table written above
    tsbench query --target clickhouse -T 7 --table d0

    # Pre-generate the CSV file for MatrixOne loadFile writes
    tsbench gen-csv -r 1000 -o ../data
"#
)]
struct Config {
    #[clap(flatten)]
    runtime_config: TokioIoConfig,

    #[clap(flatten)]
    logging_config: LoggingConfig,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, clap::Parser)]
enum Command {
    /// Time concurrent writes of generated records
    Write(commands::write::Config),

    /// Time the read query probes against a loaded table
    Query(commands::query::Config),

    /// Write generated records to a CSV file for bulk loading
    GenCsv(commands::gen_csv::Config),
}

fn main() -> Result<(), std::io::Error> {
    // load all environment variables from .env before doing anything
    load_dotenv();

    let config: Config = clap::Parser::parse();

    let tokio_runtime = config.runtime_config.builder()?.build()?;

    tokio_runtime.block_on(async move {
        fn handle_init_logs(r: Result<TroggingGuard, trogging::Error>) -> TroggingGuard {
            match r {
                Ok(guard) => guard,
                Err(e) => {
                    eprintln!("Initializing logs failed: {e}");
                    std::process::exit(ReturnCode::Failure as _);
                }
            }
        }

        let _tracing_guard = handle_init_logs(init_logs_and_tracing(&config.logging_config));

        let res = match config.command {
            None => {
                println!("command required, -h/--help for help");
                Ok(())
            }
            Some(Command::Write(config)) => commands::write::command(config)
                .await
                .map_err(|e| ("Write", e)),
            Some(Command::Query(config)) => commands::query::command(config)
                .await
                .map_err(|e| ("Query", e)),
            Some(Command::GenCsv(config)) => {
                commands::gen_csv::command(config).map_err(|e| ("Gen-csv", e))
            }
        };
        if let Err((name, e)) = res {
            eprintln!("{name} command failed: {e:#}");
            std::process::exit(ReturnCode::Failure as _)
        }
    });

    Ok(())
}

/// Export the variables of a `.env` file, if there is one, so the `TSBENCH_*` flags can be set
/// from it. Variables already set in the environment win.
fn load_dotenv() {
    if let Err(e) = dotenv() {
        if matches!(&e, dotenvy::Error::Io(err) if err.kind() == std::io::ErrorKind::NotFound) {
            return;
        }
        eprintln!("Failed to load .env file: {e}");
        std::process::exit(ReturnCode::Failure as _);
    }
}

fn init_logs_and_tracing(config: &LoggingConfig) -> Result<TroggingGuard, trogging::Error> {
    let log_layer = trogging::Builder::new()
        .with_default_log_filter("info")
        .with_logging_config(config)
        .build()?;

    let subscriber = Registry::default().with(log_layer);
    trogging::install_global(subscriber)
}
