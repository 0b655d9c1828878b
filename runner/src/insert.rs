use crate::{
    database::{util::values_placeholders, Connection, ConnectionError},
    dataset::RawRecord,
    metrics::Summary,
};
use itertools::Itertools;
use std::{
    num::NonZeroUsize,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 250;

#[derive(Debug, Error)]
pub enum InsertError {
    #[error("Failed to prepare insert into {table}")]
    Prepare {
        table: String,
        #[source]
        source: ConnectionError,
    },
    #[error("Failed to insert records from {start}:{end} into {table}")]
    Batch {
        table: String,
        start: usize,
        end: usize,
        #[source]
        source: ConnectionError,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Timings of every batch executed for one table
pub struct InsertStats {
    pub count: usize,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl InsertStats {
    /// account for one executed batch, the first one seeds both min and max
    pub fn record(&mut self, elapsed: Duration) {
        if self.count == 0 {
            self.min = elapsed;
            self.max = elapsed;
        } else {
            self.min = self.min.min(elapsed);
            self.max = self.max.max(elapsed);
        }

        self.total += elapsed;
        self.count += 1;
    }

    /// mean batch duration, `None` if no batch ran
    pub fn average(&self) -> Option<Duration> {
        u32::try_from(self.count)
            .ok()
            .filter(|count| *count > 0)
            .map(|count| self.total / count)
    }
}

#[derive(Debug, Clone, Copy)]
/// Inserts records in fixed size multi-row statements.
///
/// Only full batches are written: of `n` records exactly `batch * (n / batch)` end up in the
/// table, the trailing `n % batch` are dropped.
pub struct BatchInserter {
    batch_size: NonZeroUsize,
}

impl BatchInserter {
    pub fn new(batch_size: NonZeroUsize) -> Self {
        Self { batch_size }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.get()
    }

    /// Insert `records` into `table`, observing every batch duration in seconds on `sink`
    pub fn insert_all<C: Connection>(
        &self,
        connection: &mut C,
        table: &str,
        records: &[RawRecord],
        sink: Option<&Summary>,
    ) -> Result<InsertStats, InsertError> {
        let size = self.batch_size.get();
        let mut stats = InsertStats::default();
        let batches = records.chunks_exact(size);
        let dropped = batches.remainder().len();

        if batches.len() == 0 {
            warn!(
                table = table,
                records = records.len(),
                batch_size = size,
                "Not enough records for a single batch, nothing inserted"
            );

            return Ok(stats);
        }

        let statement = connection
            .prepare(&format!(
                "INSERT INTO {table}(data) VALUES {}",
                values_placeholders(size)
            ))
            .map_err(|source| InsertError::Prepare {
                table: table.to_owned(),
                source,
            })?;

        for (index, batch) in batches.enumerate() {
            let start = index * size;
            let params = batch.iter().map(|record| &**record).collect_vec();

            let begin = Instant::now();
            connection
                .execute(&statement, &params)
                .map_err(|source| InsertError::Batch {
                    table: table.to_owned(),
                    start,
                    end: start + size,
                    source,
                })?;
            let elapsed = begin.elapsed();

            if let Some(summary) = sink {
                summary.observe(elapsed);
            }
            stats.record(elapsed);

            debug!(table = table, start = start, elapsed = ?elapsed, "Inserted batch");
        }

        if dropped > 0 {
            debug!(table = table, dropped = dropped, "Skipped trailing partial batch");
        }

        info!(
            table = table,
            count = stats.count,
            total = ?stats.total,
            min = ?stats.min,
            avg = ?stats.average().unwrap_or_default(),
            max = ?stats.max,
            "Finished insert"
        );

        Ok(stats)
    }
}
