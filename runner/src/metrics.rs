pub mod push;

use self::push::{MetricsPushError, Publish};
use hdrhistogram::{CreationError, Histogram};
use parking_lot::Mutex;
use prometheus::{
    core::{Collector, Desc},
    proto::{self, MetricFamily, MetricType},
    Encoder, Opts, TextEncoder,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, info};

pub use prometheus::Gauge;

/// constant labels attached to a single series
pub type Labels = BTreeMap<String, String>;

/// quantiles every latency summary reports
pub const DEFAULT_QUANTILES: [f64; 3] = [0.5, 0.9, 0.99];

/// longest latency a summary resolves, slower observations are clamped
const MAX_LATENCY: Duration = Duration::from_secs(600);
/// relative resolution of 0.1% over the whole range
const SIGNIFICANT_FIGURES: u8 = 3;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to register metric")]
    Register(#[from] prometheus::Error),
    #[error("Failed to create latency histogram")]
    Histogram(#[from] CreationError),
}

/// build a label set from borrowed pairs
pub fn labels<'a, I: IntoIterator<Item = (&'a str, &'a str)>>(pairs: I) -> Labels {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_owned(), value.to_owned()))
        .collect()
}

/// current unix time in seconds, millisecond precision
pub fn unix_time() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[derive(Debug)]
struct SummaryState {
    /// latencies in nanoseconds
    histogram: Histogram<u64>,
    /// exact sum in seconds, unaffected by bucketing
    sum: f64,
}

#[derive(Debug, Clone)]
/// Latency summary exported as a Prometheus `summary`, quantiles in seconds.
///
/// Observations are never forgotten, quantiles cover everything seen since creation. Clones
/// share the same histogram.
pub struct Summary {
    desc: Arc<Desc>,
    quantiles: Arc<[f64]>,
    state: Arc<Mutex<SummaryState>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummarySnapshot {
    /// (quantile, estimate in seconds), NaN while nothing was observed
    pub quantiles: Vec<(f64, f64)>,
    pub sum: f64,
    pub count: u64,
}

impl Summary {
    fn new(
        name: &str,
        help: &str,
        labels: &Labels,
        quantiles: &[f64],
    ) -> Result<Self, MetricsError> {
        let desc = Desc::new(
            name.to_owned(),
            help.to_owned(),
            Vec::new(),
            const_labels(labels),
        )?;
        let histogram =
            Histogram::new_with_max(MAX_LATENCY.as_nanos() as u64, SIGNIFICANT_FIGURES)?;

        Ok(Self {
            desc: Arc::new(desc),
            quantiles: quantiles.into(),
            state: Arc::new(Mutex::new(SummaryState { histogram, sum: 0.0 })),
        })
    }

    pub fn observe(&self, elapsed: Duration) {
        let mut state = self.state.lock();

        state
            .histogram
            .saturating_record(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX));
        state.sum += elapsed.as_secs_f64();
    }

    pub fn snapshot(&self) -> SummarySnapshot {
        let state = self.state.lock();
        let quantiles = self
            .quantiles
            .iter()
            .map(|&quantile| {
                let estimate = if state.histogram.is_empty() {
                    f64::NAN
                } else {
                    state.histogram.value_at_quantile(quantile) as f64 / 1e9
                };

                (quantile, estimate)
            })
            .collect();

        SummarySnapshot {
            quantiles,
            sum: state.sum,
            count: state.histogram.len(),
        }
    }
}

impl Collector for Summary {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let snapshot = self.snapshot();

        let mut summary = proto::Summary::default();
        summary.set_sample_count(snapshot.count);
        summary.set_sample_sum(snapshot.sum);
        for (quantile, estimate) in snapshot.quantiles {
            let mut entry = proto::Quantile::default();
            entry.set_quantile(quantile);
            entry.set_value(estimate);
            summary.mut_quantile().push(entry);
        }

        let mut metric = proto::Metric::default();
        for pair in &self.desc.const_label_pairs {
            metric.mut_label().push(pair.clone());
        }
        metric.set_summary(summary);

        let mut family = MetricFamily::default();
        family.set_name(self.desc.fq_name.clone());
        family.set_help(self.desc.help.clone());
        family.set_field_type(MetricType::SUMMARY);
        family.mut_metric().push(metric);

        vec![family]
    }
}

#[derive(Debug, Clone)]
enum Metric {
    Gauge(Gauge),
    Summary(Summary),
}

/// Every gauge and summary of one experiment run.
///
/// Series accumulate for the whole run and are pushed exactly once, `push` consumes the
/// registry.
pub struct Registry {
    job: String,
    inner: prometheus::Registry,
    series: BTreeMap<(String, Labels), Metric>,
}

impl Registry {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            inner: prometheus::Registry::new(),
            series: BTreeMap::new(),
        }
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    /// register a gauge, asking twice for the same series returns the existing cell
    pub fn gauge(
        &mut self,
        name: &str,
        help: &str,
        labels: Labels,
    ) -> Result<Gauge, MetricsError> {
        let key = (name.to_owned(), labels);
        if let Some(Metric::Gauge(gauge)) = self.series.get(&key) {
            return Ok(gauge.clone());
        }

        let gauge = Gauge::with_opts(Opts::new(name, help).const_labels(const_labels(&key.1)))?;
        self.inner.register(Box::new(gauge.clone()))?;
        self.series.insert(key, Metric::Gauge(gauge.clone()));

        Ok(gauge)
    }

    /// register a summary, asking twice for the same series returns the existing estimator
    pub fn summary(
        &mut self,
        name: &str,
        help: &str,
        labels: Labels,
        quantiles: &[f64],
    ) -> Result<Summary, MetricsError> {
        let key = (name.to_owned(), labels);
        if let Some(Metric::Summary(summary)) = self.series.get(&key) {
            return Ok(summary.clone());
        }

        let summary = Summary::new(name, help, &key.1, quantiles)?;
        self.inner.register(Box::new(summary.clone()))?;
        self.series.insert(key, Metric::Summary(summary.clone()));

        Ok(summary)
    }

    /// Render all series in the Prometheus text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.inner.gather(), &mut buffer)?;

        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Publish the snapshot under this registry's job and `grouping`, then drop it
    pub fn push<P: Publish>(
        self,
        publisher: &P,
        grouping: &[(&str, &str)],
    ) -> Result<(), MetricsPushError> {
        let body = self.render().map_err(MetricsPushError::Encode)?;

        debug!(job = %self.job, series = self.series.len(), "Pushing metrics");
        publisher.publish(&self.job, grouping, body)?;
        info!(job = %self.job, grouping = ?grouping, "Pushed metrics");

        Ok(())
    }
}

fn const_labels(labels: &Labels) -> HashMap<String, String> {
    labels
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// value of the sample line `series`, e.g. `query_count{table="tbl_json"}`
    pub fn sample(body: &str, series: &str) -> Option<f64> {
        body.lines()
            .filter(|line| !line.starts_with('#'))
            .find_map(|line| line.strip_prefix(series)?.strip_prefix(' '))
            .and_then(|value| value.trim().parse().ok())
    }

    #[test]
    fn gauges_share_state_between_clones() {
        let mut registry = Registry::new("insert");
        let gauge = registry
            .gauge("iterations", "Number of iterations per type", Labels::new())
            .unwrap();

        gauge.set(15.0);

        let again = registry
            .gauge("iterations", "Number of iterations per type", Labels::new())
            .unwrap();
        assert_eq!(again.get(), 15.0);
        assert_eq!(registry.series.len(), 1);
    }

    #[test]
    fn current_time_is_unix_seconds() {
        // 2020-01-01T00:00:00Z
        assert!(unix_time() > 1_577_836_800.0);
    }

    #[test]
    fn summaries_accumulate() {
        let mut registry = Registry::new("query");
        let summary = registry
            .summary(
                "query",
                "Count of executed queries",
                labels([("table", "tbl_json")]),
                &DEFAULT_QUANTILES,
            )
            .unwrap();

        for _ in 0..4 {
            summary.observe(Duration::from_millis(500));
        }

        let snapshot = summary.snapshot();
        assert_eq!(snapshot.count, 4);
        assert_eq!(snapshot.sum, 2.0);
        for ((quantile, estimate), expected) in snapshot.quantiles.iter().zip(DEFAULT_QUANTILES) {
            assert_eq!(*quantile, expected);
            assert_close(*estimate, 0.5);
        }
    }

    /// within the histogram's relative resolution
    fn assert_close(estimate: f64, expected: f64) {
        assert!(
            (estimate - expected).abs() <= expected * 1e-3,
            "estimate {estimate}, expected {expected}"
        );
    }

    /// observe 1..=n microseconds in `order` and check every default quantile against its
    /// rank target: p50 within 5%, p90 within 1%, p99 within 0.1% of n
    fn check_rank_error(order: impl Iterator<Item = u64>, n: u64) {
        let mut registry = Registry::new("query");
        let summary = registry
            .summary("query", "Count of executed queries", Labels::new(), &DEFAULT_QUANTILES)
            .unwrap();

        for micros in order {
            summary.observe(Duration::from_micros(micros));
        }

        let snapshot = summary.snapshot();
        assert_eq!(snapshot.count, n);

        let tolerances = [0.05, 0.01, 0.001];
        for ((quantile, estimate), tolerance) in snapshot.quantiles.into_iter().zip(tolerances) {
            // a value of k microseconds has rank k in the stream
            let rank = estimate * 1e6;
            let target = quantile * n as f64;
            let allowed = tolerance * n as f64 + 1.0;

            assert!(
                (rank - target).abs() <= allowed,
                "q{quantile}: rank {rank}, target {target} ± {allowed}"
            );
        }
    }

    #[test]
    fn ascending_stream_stays_within_rank_error() {
        check_rank_error(1..=100_000, 100_000);
    }

    #[test]
    fn descending_stream_stays_within_rank_error() {
        check_rank_error((1..=100_000).rev(), 100_000);
    }

    #[test]
    fn shuffled_stream_stays_within_rank_error() {
        use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

        let mut values = (1..=10_000).collect::<Vec<u64>>();
        values.shuffle(&mut StdRng::seed_from_u64(7));

        check_rank_error(values.into_iter(), 10_000);
    }

    #[test]
    fn slow_observations_are_clamped() {
        let mut registry = Registry::new("query");
        let summary = registry
            .summary("query", "Count of executed queries", Labels::new(), &DEFAULT_QUANTILES)
            .unwrap();

        summary.observe(MAX_LATENCY * 2);

        let snapshot = summary.snapshot();
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.sum, (MAX_LATENCY * 2).as_secs_f64());
        assert_close(snapshot.quantiles[0].1, MAX_LATENCY.as_secs_f64());
    }

    #[test]
    fn renders_exposition_format() {
        let mut registry = Registry::new("insert");
        registry
            .gauge("iterations", "Number of iterations per type", Labels::new())
            .unwrap()
            .set(15.0);
        for (table, size) in [("tbl_json", 8192.0), ("tbl_text", 4096.0)] {
            registry
                .gauge(
                    "table_size",
                    "Table size after inserting data",
                    labels([("table", table)]),
                )
                .unwrap()
                .set(size);
        }
        registry
            .summary(
                "query",
                "Count of executed queries",
                labels([("table", "tbl_json")]),
                &DEFAULT_QUANTILES,
            )
            .unwrap()
            .observe(Duration::from_millis(250));

        let rendered = registry.render().unwrap();

        assert!(rendered.contains("# HELP iterations Number of iterations per type\n"));
        assert!(rendered.contains("# TYPE iterations gauge\n"));
        assert!(rendered.contains("# TYPE query summary\n"));
        assert_eq!(sample(&rendered, "iterations"), Some(15.0));
        assert_eq!(sample(&rendered, "table_size{table=\"tbl_json\"}"), Some(8192.0));
        assert_eq!(sample(&rendered, "table_size{table=\"tbl_text\"}"), Some(4096.0));
        assert_close(
            sample(&rendered, "query{table=\"tbl_json\",quantile=\"0.99\"}").unwrap(),
            0.25,
        );
        assert_eq!(sample(&rendered, "query_sum{table=\"tbl_json\"}"), Some(0.25));
        assert_eq!(sample(&rendered, "query_count{table=\"tbl_json\"}"), Some(1.0));

        // families come out sorted by name
        let families = rendered
            .lines()
            .filter_map(|line| line.strip_prefix("# TYPE "))
            .collect::<Vec<_>>();
        assert_eq!(
            families,
            vec!["iterations gauge", "query summary", "table_size gauge"]
        );
    }

    #[test]
    fn empty_summary_reports_nan() {
        let mut registry = Registry::new("query");
        registry
            .summary("query", "Count of executed queries", Labels::new(), &DEFAULT_QUANTILES)
            .unwrap();

        let rendered = registry.render().unwrap();

        assert!(sample(&rendered, "query{quantile=\"0.5\"}").unwrap().is_nan());
        assert_eq!(sample(&rendered, "query_count"), Some(0.0));
    }

    #[test]
    fn conflicting_help_is_rejected() {
        let mut registry = Registry::new("insert");
        registry
            .gauge("table_size", "Table size after inserting data", labels([("table", "a")]))
            .unwrap();

        assert!(registry
            .gauge("table_size", "something else", labels([("table", "b")]))
            .is_err());
    }
}
