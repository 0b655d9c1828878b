mod config;
mod database;
mod dataset;
mod experiments;
mod insert;
mod metrics;
mod provision;
mod query;
mod schedule;
mod templates;

use crate::{
    config::{BenchConfig, ConfigErrors},
    database::postgresql::PostgresConnection,
    experiments::{report, Bench, BenchError},
    metrics::push::PushGateway,
    templates::QueryRegistry,
};
use clap::{
    error::{ContextKind, ErrorKind},
    Parser, Subcommand,
};
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "colbench",
    version,
    about = "Compare how PostgreSQL column encodings of the same JSON records insert and query"
)]
struct Cli {
    /// YAML configuration, built-in defaults are used without it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed for the variant order, overrides the configured seed
    #[arg(long)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Time batched inserts of the dataset into every variant
    Insert {
        /// Comma-separated table variants, e.g. json,jsonb
        #[arg(value_delimiter = ',', required = true)]
        variants: Vec<String>,
    },
    /// Load every variant once, then time one named query against them
    Query {
        name: String,
        #[arg(value_delimiter = ',', required = true)]
        variants: Vec<String>,
    },
    /// Report the stored size of ever larger aggregated JSON values
    Sizelimit,
    /// Seed oversized documents and derive typed columns from them
    Toast,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            if error.kind() == ErrorKind::InvalidSubcommand {
                if let Some(command) = error.get(ContextKind::InvalidSubcommand) {
                    error!("{command} is an invalid command");
                }
            }

            error.exit()
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{}", report(&error));

            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), BenchError> {
    let mut config = BenchConfig::load(cli.config.as_deref())?;
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    if config.preflight_checks() {
        return Err(ConfigErrors::Invalid.into());
    }

    let connection = PostgresConnection::connect(&BenchConfig::connection_string()?)?;
    let registry = QueryRegistry::builtin()?;
    let publisher = PushGateway::new(&config.gateway)?;
    let mut bench = Bench::new(connection, publisher, config, registry)?;

    let outcome = match &cli.command {
        Command::Insert { variants } => bench.insert(variants),
        Command::Query { name, variants } => bench.query(name, variants),
        Command::Sizelimit => bench.sizelimit(),
        Command::Toast => bench.toast(),
    };

    // close the session whether or not the experiment succeeded
    let closed = bench
        .into_connection()
        .close()
        .map_err(|source| BenchError::Statement {
            context: "close the connection",
            source,
        });
    outcome?;
    closed?;

    info!(command = ?cli.command, "Experiment finished");

    Ok(())
}
