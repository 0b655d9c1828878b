use super::{Bench, BenchError, Stage, StageExt};
use crate::{
    database::Connection,
    dataset::{Dataset, ParsedRecord, RawRecord},
    metrics::push::Publish,
};
use serde_json::Value;
use std::{iter, time::Instant};
use tracing::{debug, info, instrument};

/// fields the derived columns are computed from
const REQUIRED_FIELDS: [&str; 3] = ["title", "year", "score"];
/// length of the `additional` array, slot 0 stays empty
const ADDITIONAL_SLOTS: usize = 10;
/// records at the end of the dataset that are never seeded
const TAIL: usize = 20;

impl<C: Connection, P: Publish> Bench<C, P> {
    /// Seed oversized documents, then derive typed columns from them in one statement.
    #[instrument(skip(self), level = "info")]
    pub fn toast(&mut self) -> Result<(), BenchError> {
        let dataset = Dataset::load(&self.config.dataset).during(Stage::Loading)?;
        dataset
            .require_fields(&REQUIRED_FIELDS)
            .during(Stage::Loading)?;
        dataset
            .require_len(ADDITIONAL_SLOTS)
            .during(Stage::Loading)?;

        let seed = self.provisioner.table_name("test_toast_seed");
        let toast = self.provisioner.table_name("test_toast");
        for table in [&seed, &toast] {
            self.provisioner
                .truncate(&mut self.connection, table)
                .during(Stage::Provisioning)?;
        }

        let statement = self
            .connection
            .prepare(&format!("INSERT INTO {seed}(data) VALUES ($1)"))
            .map_err(|source| BenchError::Statement {
                context: "prepare seed insert",
                source,
            })
            .during(Stage::Executing)?;

        let last = dataset.len().saturating_sub(TAIL);
        let begin = Instant::now();

        for index in 0..=last {
            let payload = with_additional(&dataset.parsed, index)
                .map_err(|source| BenchError::Encode { index, source })
                .during(Stage::Executing)?;

            self.connection
                .execute(&statement, &[&*payload])
                .map_err(|source| BenchError::Statement {
                    context: "run seed insert",
                    source,
                })
                .during(Stage::Executing)?;

            debug!(index = index, "Seeded record");
        }

        info!(table = %seed, records = last + 1, duration = ?begin.elapsed(), "Seeded table");

        let begin = Instant::now();
        self.connection
            .batch_execute(&format!(
                "INSERT INTO {toast}(title, year, score, data)
                 SELECT data->>'title'
                      , CAST(data->>'year' AS INT)
                      , CAST(data->>'score' AS FLOAT)
                      , data
                 FROM {seed}"
            ))
            .map_err(|source| BenchError::Statement {
                context: "run derived insert",
                source,
            })
            .during(Stage::Executing)?;

        info!(table = %toast, duration = ?begin.elapsed(), "Derived typed columns");

        Ok(())
    }
}

/// Record `index` with the following nine records embedded under `additional`.
///
/// Callers guarantee `index + ADDITIONAL_SLOTS <= records.len()`.
fn with_additional(records: &[ParsedRecord], index: usize) -> Result<RawRecord, serde_json::Error> {
    let mut record = records[index].clone();
    let additional = iter::once(Value::Null)
        .chain(
            records[index + 1..index + ADDITIONAL_SLOTS]
                .iter()
                .cloned()
                .map(Value::Object),
        )
        .collect();

    record.insert("additional".to_owned(), Value::Array(additional));

    serde_json::value::to_raw_value(&record)
}
