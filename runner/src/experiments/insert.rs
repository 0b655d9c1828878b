use super::{Bench, BenchError, Stage, StageExt};
use crate::{
    database::Connection,
    dataset::Dataset,
    metrics::{push::Publish, unix_time, Labels, Registry},
};
use tracing::{debug, info, instrument};

impl<C: Connection, P: Publish> Bench<C, P> {
    /// Insert the whole dataset into every variant's table, once per round.
    ///
    /// Every round truncates the table again, batch latencies accumulate per table over all
    /// rounds.
    #[instrument(skip(self), level = "info")]
    pub fn insert(&mut self, variants: &[String]) -> Result<(), BenchError> {
        let variants = self.registry.select(variants).during(Stage::Loading)?;
        let dataset = Dataset::load(&self.config.dataset).during(Stage::Loading)?;
        let iterations = self.config.iterations.insert;

        let mut metrics = Registry::new("insert");
        metrics
            .gauge("iterations", "Number of iterations per type", Labels::new())
            .during(Stage::Loading)?
            .set(iterations as f64);
        metrics
            .gauge("batch_size", "Size of the batch", Labels::new())
            .during(Stage::Loading)?
            .set(self.inserter.batch_size() as f64);
        let summaries = self
            .latency_summaries(&mut metrics, &variants)
            .during(Stage::Loading)?;

        for (round, order) in self.scheduler.rounds(&variants, iterations).enumerate() {
            debug!(round = round, order = ?order, "Starting round");

            for variant in order {
                let table = self
                    .provisioner
                    .prepare(&mut self.connection, &variant)
                    .map_err(|error| BenchError::in_iteration(round, &variant, error))
                    .during(Stage::Provisioning)?;

                self.inserter
                    .insert_all(
                        &mut self.connection,
                        &table,
                        &dataset.raw,
                        summaries.get(&variant),
                    )
                    .map_err(|error| BenchError::in_iteration(round, &variant, error))
                    .during(Stage::Executing)?;
            }
        }

        info!(rounds = iterations, "Finished all rounds");

        self.record_table_sizes(&mut metrics, "Table size after inserting data", &variants)
            .during(Stage::Aggregating)?;
        metrics
            .gauge("finished_at", "Time that the run finished at", Labels::new())
            .during(Stage::Aggregating)?
            .set(unix_time());

        self.publish(metrics, None, &variants)
            .during(Stage::Publishing)
    }
}
