use crate::{
    database::{Connection, ConnectionError},
    templates::TABLE_SITE,
};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
#[error("Failed to query {table}; query: {query}")]
pub struct QueryError {
    pub table: String,
    pub query: String,
    #[source]
    pub source: ConnectionError,
}

#[derive(Debug)]
/// A rendered query, parsed and planned by the server ahead of any timing
pub struct PreparedQuery<S> {
    pub table: String,
    pub query: String,
    statement: S,
}

/// substitute the physical table name into a trusted template
pub fn render(template: &str, table: &str) -> String {
    template.replacen(TABLE_SITE, table, 1)
}

/// Render `template` for `table` and prepare it once, so timed runs only pay for execution
pub fn prepare_query<C: Connection>(
    connection: &mut C,
    table: &str,
    template: &str,
) -> Result<PreparedQuery<C::Statement>, QueryError> {
    let query = render(template, table);

    match connection.prepare(&query) {
        Ok(statement) => {
            debug!(table = table, query = %query, "Prepared query");

            Ok(PreparedQuery {
                table: table.to_owned(),
                query,
                statement,
            })
        }
        Err(source) => Err(QueryError {
            table: table.to_owned(),
            query,
            source,
        }),
    }
}

/// Execute a prepared query and return the time until the last row was read
pub fn run_query<C: Connection>(
    connection: &mut C,
    prepared: &PreparedQuery<C::Statement>,
) -> Result<Duration, QueryError> {
    let begin = Instant::now();
    let rows = connection
        .drain(&prepared.statement)
        .map_err(|source| QueryError {
            table: prepared.table.clone(),
            query: prepared.query.clone(),
            source,
        })?;
    let elapsed = begin.elapsed();

    debug!(table = %prepared.table, rows = rows, elapsed = ?elapsed, "Drained query");

    Ok(elapsed)
}
