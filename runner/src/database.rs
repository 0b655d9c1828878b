pub mod postgresql;
pub mod util;

#[cfg(test)]
pub mod mock;

use serde_json::value::RawValue;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("PostgreSQL error")]
    Postgres(#[from] postgres::Error),
    #[error("Connection is closed")]
    Closed,
}

/// Everything the benchmark asks of a database session.
///
/// All calls are blocking and issued one at a time, every statement runs as its own implicit
/// transaction.
pub trait Connection {
    type Statement;

    /// run one or more statements that neither take parameters nor return rows
    fn batch_execute(&mut self, statement: &str) -> Result<(), ConnectionError>;

    fn prepare(&mut self, statement: &str) -> Result<Self::Statement, ConnectionError>;

    /// execute a prepared statement, binding every payload to one positional parameter
    fn execute(
        &mut self,
        statement: &Self::Statement,
        params: &[&RawValue],
    ) -> Result<u64, ConnectionError>;

    /// Execute a prepared query and materialize every column of every row it returns.
    ///
    /// Drivers may hand out rows lazily, so a query is only fully paid for once its result set
    /// has been consumed. Returns the number of rows read.
    fn drain(&mut self, statement: &Self::Statement) -> Result<u64, ConnectionError>;

    /// read the first column of the single row returned by `query`
    fn query_i64(&mut self, query: &str) -> Result<i64, ConnectionError>;

    fn query_text(&mut self, query: &str) -> Result<String, ConnectionError>;
}
