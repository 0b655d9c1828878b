use super::{Bench, BenchError, Stage, StageExt};
use crate::{
    database::Connection,
    dataset::Dataset,
    metrics::{push::Publish, unix_time, Labels, Registry},
    query::{prepare_query, run_query},
    templates::Template,
};
use itertools::Itertools;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
/// a variant the query runs against, resolved up front
struct Target {
    variant: String,
    table: String,
    template: &'static str,
}

impl<C: Connection, P: Publish> Bench<C, P> {
    /// Load every selected variant once, then time the named query against each of them.
    #[instrument(skip(self), level = "info")]
    pub fn query(&mut self, name: &str, variants: &[String]) -> Result<(), BenchError> {
        let targets = self.plan_query(name, variants).during(Stage::Loading)?;
        let variants = targets
            .iter()
            .map(|target| target.variant.clone())
            .collect_vec();
        let dataset = Dataset::load(&self.config.dataset).during(Stage::Loading)?;

        for target in &targets {
            self.provisioner
                .prepare(&mut self.connection, &target.variant)
                .during(Stage::Provisioning)?;
            self.inserter
                .insert_all(&mut self.connection, &target.table, &dataset.raw, None)
                .during(Stage::Provisioning)?;
        }
        drop(dataset);

        let prepared = targets
            .iter()
            .map(|target| prepare_query(&mut self.connection, &target.table, target.template))
            .collect::<Result<Vec<_>, _>>()
            .during(Stage::Provisioning)?;
        let indexes = (0..targets.len()).collect_vec();

        let iterations = self.config.iterations.query;
        let mut metrics = Registry::new("query");
        metrics
            .gauge("iterations", "Number of iterations per type", Labels::new())
            .during(Stage::Loading)?
            .set(iterations as f64);
        let summaries = self
            .latency_summaries(&mut metrics, &variants)
            .during(Stage::Loading)?;

        for (round, order) in self.scheduler.rounds(&indexes, iterations).enumerate() {
            for index in order {
                let target = &targets[index];
                let elapsed = run_query(&mut self.connection, &prepared[index])
                    .map_err(|error| BenchError::in_iteration(round, &target.variant, error))
                    .during(Stage::Executing)?;

                if let Some(summary) = summaries.get(&target.variant) {
                    summary.observe(elapsed);
                }

                info!(query = name, table = %target.table, duration = ?elapsed, "Finished query");
            }
        }

        info!(rounds = iterations, "Finished all rounds");

        self.record_table_sizes(&mut metrics, "Table size after loading data", &variants)
            .during(Stage::Aggregating)?;
        metrics
            .gauge("finished_at", "Time that the run finished at", Labels::new())
            .during(Stage::Aggregating)?
            .set(unix_time());

        self.publish(metrics, Some(name), &variants)
            .during(Stage::Publishing)
    }

    /// Resolve variants and templates without touching the database.
    ///
    /// Variants marked unsupported for `name` are skipped.
    fn plan_query(&self, name: &str, variants: &[String]) -> Result<Vec<Target>, BenchError> {
        let mut targets = Vec::new();

        for variant in self.registry.select(variants)? {
            match self.registry.template(&variant, name)? {
                Template::Sql(template) => targets.push(Target {
                    table: self.provisioner.table_name(&variant),
                    variant,
                    template,
                }),
                Template::Unsupported => {
                    warn!(variant = %variant, query = name, "Query is not supported by variant, skipping")
                }
            }
        }

        if targets.is_empty() {
            Err(BenchError::NoVariants(name.to_owned()))
        } else {
            Ok(targets)
        }
    }
}
