mod insert;
mod query;
mod sizelimit;
mod toast;


use crate::{
    config::{BenchConfig, ConfigErrors, DashboardConfig},
    database::{util::table_size_query, Connection, ConnectionError},
    dataset::DatasetError,
    insert::{BatchInserter, InsertError},
    metrics::{
        labels,
        push::{MetricsPushError, Publish},
        MetricsError, Registry, Summary, DEFAULT_QUANTILES,
    },
    provision::{ProvisionError, Provisioner},
    query::QueryError,
    schedule::Scheduler,
    templates::{QueryLookupError, QueryRegistry, RegistryError, UnknownQueryError},
};
use std::{collections::BTreeMap, error::Error as StdError, fmt, num::NonZeroUsize};
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Phases every experiment moves through, reported with the error that ended a run
pub enum Stage {
    Loading,
    Provisioning,
    Executing,
    Aggregating,
    Publishing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Loading => "loading",
            Self::Provisioning => "provisioning",
            Self::Executing => "executing",
            Self::Aggregating => "aggregating",
            Self::Publishing => "publishing",
        })
    }
}

#[derive(Debug, Error)]
pub enum BenchError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error("Failed to connect to the database")]
    Connect(#[from] ConnectionError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    UnknownQuery(#[from] UnknownQueryError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error(transparent)]
    Insert(#[from] InsertError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
    #[error(transparent)]
    MetricsPush(#[from] MetricsPushError),
    #[error("Failed to get size of table {table}")]
    TableSize {
        table: String,
        #[source]
        source: ConnectionError,
    },
    #[error("Failed to {context}")]
    Statement {
        context: &'static str,
        #[source]
        source: ConnectionError,
    },
    #[error("Failed to encode record #{index}")]
    Encode {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("None of the selected variants supports query '{0}'")]
    NoVariants(String),
    #[error("Fail on iteration #{round} ({variant})")]
    Iteration {
        round: usize,
        variant: String,
        #[source]
        source: Box<BenchError>,
    },
    #[error("Failed while {stage}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<BenchError>,
    },
}

impl From<QueryLookupError> for BenchError {
    fn from(error: QueryLookupError) -> Self {
        match error {
            QueryLookupError::UnknownQuery(error) => Self::UnknownQuery(error),
            QueryLookupError::Registry(error) => Self::Registry(error),
        }
    }
}

impl BenchError {
    fn in_iteration<E: Into<BenchError>>(round: usize, variant: &str, error: E) -> Self {
        Self::Iteration {
            round,
            variant: variant.to_owned(),
            source: Box::new(error.into()),
        }
    }

    /// the error that started the chain, skipping stage and iteration context
    #[cfg(test)]
    pub fn root(&self) -> &BenchError {
        match self {
            Self::Stage { source, .. } | Self::Iteration { source, .. } => source.root(),
            other => other,
        }
    }
}

trait StageExt<T> {
    /// attach the stage the run was in when this failed
    fn during(self, stage: Stage) -> Result<T, BenchError>;
}

impl<T, E: Into<BenchError>> StageExt<T> for Result<T, E> {
    fn during(self, stage: Stage) -> Result<T, BenchError> {
        self.map_err(|error| BenchError::Stage {
            stage,
            source: Box::new(error.into()),
        })
    }
}

/// Render `error` and all of its sources on a single line
pub fn report(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();

    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    message
}

/// Runs the experiments against one connection, publishing to one receiver.
///
/// Everything runs on the calling thread, one statement at a time.
pub struct Bench<C: Connection, P: Publish> {
    pub connection: C,
    pub publisher: P,
    config: BenchConfig,
    registry: QueryRegistry,
    scheduler: Scheduler,
    provisioner: Provisioner,
    inserter: BatchInserter,
}

impl<C: Connection, P: Publish> Bench<C, P> {
    pub fn new(
        connection: C,
        publisher: P,
        config: BenchConfig,
        registry: QueryRegistry,
    ) -> Result<Self, BenchError> {
        let batch_size = NonZeroUsize::new(config.batch_size).ok_or_else(|| {
            error!("batch_size must be at least 1");

            ConfigErrors::Invalid
        })?;

        Ok(Self {
            connection,
            publisher,
            scheduler: Scheduler::new(config.seed),
            provisioner: Provisioner::new(config.table_prefix.clone()),
            inserter: BatchInserter::new(batch_size),
            config,
            registry,
        })
    }

    pub fn into_connection(self) -> C {
        self.connection
    }

    /// one `query{table}` latency summary per variant
    fn latency_summaries(
        &self,
        metrics: &mut Registry,
        variants: &[String],
    ) -> Result<BTreeMap<String, Summary>, BenchError> {
        variants
            .iter()
            .map(|variant| -> Result<_, BenchError> {
                let table = self.provisioner.table_name(variant);
                let summary = metrics.summary(
                    "query",
                    "Count of executed queries",
                    labels([("table", table.as_str())]),
                    &DEFAULT_QUANTILES,
                )?;

                Ok((variant.clone(), summary))
            })
            .collect()
    }

    /// set one `table_size{table}` gauge per variant
    fn record_table_sizes(
        &mut self,
        metrics: &mut Registry,
        help: &str,
        variants: &[String],
    ) -> Result<(), BenchError> {
        for variant in variants {
            let table = self.provisioner.table_name(variant);
            let size = table_size(&mut self.connection, &table)?;

            debug!(table = %table, size = size, "Read table size");
            metrics
                .gauge("table_size", help, labels([("table", table.as_str())]))?
                .set(size as f64);
        }

        Ok(())
    }

    /// push `metrics` under the run timestamp (and query name) and point at the dashboard
    fn publish(
        &self,
        metrics: Registry,
        query: Option<&str>,
        variants: &[String],
    ) -> Result<(), BenchError> {
        let run_ts = run_timestamp();
        let job = metrics.job().to_owned();
        let mut grouping = Vec::with_capacity(2);

        if let Some(query) = query {
            grouping.push(("q_name", query));
        }
        grouping.push(("run_ts", run_ts.as_str()));

        metrics.push(&self.publisher, &grouping)?;

        if let Some(dashboard) = &self.config.dashboard {
            let tables = variants
                .iter()
                .map(|variant| self.provisioner.table_name(variant))
                .collect::<Vec<_>>();

            info!(
                "metrics are available on: {}",
                dashboard_url(dashboard, &job, &run_ts, query, &tables)
            );
        }

        Ok(())
    }
}

fn table_size<C: Connection>(connection: &mut C, table: &str) -> Result<i64, BenchError> {
    connection
        .query_i64(&table_size_query(table))
        .map_err(|source| BenchError::TableSize {
            table: table.to_owned(),
            source,
        })
}

/// label value identifying a run, local time with second precision
fn run_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn dashboard_url(
    dashboard: &DashboardConfig,
    job: &str,
    run_ts: &str,
    query: Option<&str>,
    tables: &[String],
) -> String {
    let base = dashboard.url.to_string();
    let id = if query.is_some() {
        &dashboard.query
    } else {
        &dashboard.insert
    };
    let mut url = format!(
        "{}/d/{id}?orgId=1&var-job={job}",
        base.trim_end_matches('/')
    );

    if let Some(query) = query {
        url.push_str(&format!("&var-q_name={query}"));
    }
    url.push_str(&format!("&var-run_ts={run_ts}"));
    for table in tables {
        url.push_str(&format!("&var-table={table}"));
    }

    url
}
