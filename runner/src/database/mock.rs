use super::{Connection, ConnectionError};
use serde_json::value::RawValue;

#[derive(Debug, Default)]
/// In-memory stand-in that records what would have been sent to the server
pub struct MockConnection {
    /// every statement text in the order it was issued, executions of prepared statements
    /// included
    pub statements: Vec<String>,
    /// (statement, number of bound parameters) for every prepared execution
    pub executions: Vec<(String, usize)>,
    /// fail the n-th prepared execution (zero based)
    pub fail_execution: Option<usize>,
    /// every successfully prepared statement text
    pub prepared: Vec<String>,
    /// fail every statement sent for execution that contains this fragment
    pub fail_matching: Option<String>,
    /// fail preparing every statement that contains this fragment
    pub fail_prepare: Option<String>,
    pub rows: u64,
    pub relation_size: i64,
}

impl MockConnection {
    pub fn new() -> Self {
        Self {
            rows: 3,
            relation_size: 8192,
            ..Self::default()
        }
    }

    fn check(&mut self, statement: &str) -> Result<(), ConnectionError> {
        self.statements.push(statement.to_owned());

        match &self.fail_matching {
            Some(fragment) if statement.contains(fragment.as_str()) => Err(ConnectionError::Closed),
            _ => Ok(()),
        }
    }

    pub fn count_matching(&self, fragment: &str) -> usize {
        self.statements
            .iter()
            .filter(|statement| statement.contains(fragment))
            .count()
    }
}

impl Connection for MockConnection {
    type Statement = String;

    fn batch_execute(&mut self, statement: &str) -> Result<(), ConnectionError> {
        self.check(statement)
    }

    fn prepare(&mut self, statement: &str) -> Result<String, ConnectionError> {
        match &self.fail_prepare {
            Some(fragment) if statement.contains(fragment.as_str()) => Err(ConnectionError::Closed),
            _ => {
                self.prepared.push(statement.to_owned());

                Ok(statement.to_owned())
            }
        }
    }

    fn execute(&mut self, statement: &String, params: &[&RawValue]) -> Result<u64, ConnectionError> {
        let attempt = self.executions.len();

        self.statements.push(statement.clone());
        self.executions.push((statement.clone(), params.len()));

        if self.fail_execution == Some(attempt) {
            Err(ConnectionError::Closed)
        } else {
            Ok(params.len() as u64)
        }
    }

    fn drain(&mut self, statement: &String) -> Result<u64, ConnectionError> {
        self.check(statement)?;

        Ok(self.rows)
    }

    fn query_i64(&mut self, query: &str) -> Result<i64, ConnectionError> {
        self.check(query)?;

        Ok(self.relation_size)
    }

    fn query_text(&mut self, query: &str) -> Result<String, ConnectionError> {
        self.check(query)?;

        Ok(format!("{} kB", self.relation_size / 1024))
    }
}
