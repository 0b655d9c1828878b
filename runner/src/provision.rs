use crate::database::{Connection, ConnectionError};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_TABLE_PREFIX: &str = "tbl_";

#[derive(Debug, Error)]
#[error("Failed to truncate table '{table}'")]
pub struct ProvisionError {
    pub table: String,
    #[source]
    pub source: ConnectionError,
}

#[derive(Debug, Clone)]
/// Maps variants onto their physical tables and empties them before a run
pub struct Provisioner {
    prefix: String,
}

impl Provisioner {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn table_name(&self, variant: &str) -> String {
        format!("{}{variant}", self.prefix)
    }

    /// empty the table backing `variant` and return its name
    pub fn prepare<C: Connection>(
        &self,
        connection: &mut C,
        variant: &str,
    ) -> Result<String, ProvisionError> {
        let table = self.table_name(variant);

        self.truncate(connection, &table)?;

        Ok(table)
    }

    pub fn truncate<C: Connection>(
        &self,
        connection: &mut C,
        table: &str,
    ) -> Result<(), ProvisionError> {
        connection
            .batch_execute(&format!("TRUNCATE {table}"))
            .map_err(|source| ProvisionError {
                table: table.to_owned(),
                source,
            })?;

        info!(table = table, "Truncated table");

        Ok(())
    }
}

impl Default for Provisioner {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_PREFIX)
    }
}
