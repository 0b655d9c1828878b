use super::{Bench, BenchError, Stage, StageExt};
use crate::{database::Connection, dataset::Dataset, metrics::push::Publish};
use itertools::Itertools;
use std::{iter, time::Instant};
use tracing::{info, instrument};

/// variant whose rows are aggregated
const SOURCE_VARIANT: &str = "json";
const TARGET_VARIANT: &str = "size_limit_json";

impl<C: Connection, P: Publish> Bench<C, P> {
    /// Aggregate growing amounts of rows into a single JSON value and report its size.
    #[instrument(skip(self), level = "info")]
    pub fn sizelimit(&mut self) -> Result<(), BenchError> {
        let dataset = Dataset::load(&self.config.dataset).during(Stage::Loading)?;
        let origin = self
            .provisioner
            .prepare(&mut self.connection, SOURCE_VARIANT)
            .during(Stage::Provisioning)?;
        self.inserter
            .insert_all(&mut self.connection, &origin, &dataset.raw, None)
            .during(Stage::Provisioning)?;
        drop(dataset);

        let target = self.provisioner.table_name(TARGET_VARIANT);
        let limits = self.config.sizelimit.clone();

        for chunks in limits.from..=limits.to {
            self.provisioner
                .truncate(&mut self.connection, &target)
                .during(Stage::Provisioning)?;

            let selects = iter::repeat(format!(
                "(SELECT data FROM {origin} LIMIT {})",
                limits.rows_per_chunk
            ))
            .take(chunks)
            .join(" UNION ALL ");

            let begin = Instant::now();
            self.connection
                .batch_execute(&format!(
                    "INSERT INTO {target} SELECT json_agg(data) FROM ({selects})_"
                ))
                .map_err(|source| BenchError::Statement {
                    context: "run aggregated insert",
                    source,
                })
                .during(Stage::Executing)?;
            let elapsed = begin.elapsed();

            let column_size = self
                .connection
                .query_i64(&format!("SELECT COALESCE(pg_column_size(data), 0)::bigint FROM {target}"))
                .map_err(|source| BenchError::Statement {
                    context: "get column size",
                    source,
                })
                .during(Stage::Aggregating)?;
            let size = self
                .connection
                .query_text(&format!(
                    "SELECT pg_size_pretty(pg_total_relation_size('{target}'))"
                ))
                .map_err(|source| BenchError::Statement {
                    context: "get table size",
                    source,
                })
                .during(Stage::Aggregating)?;

            info!(
                chunks = chunks,
                rows = chunks * limits.rows_per_chunk,
                duration = ?elapsed,
                size = %size,
                column_size = column_size,
                "Stored aggregated value"
            );
        }

        Ok(())
    }
}
