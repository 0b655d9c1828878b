use crate::config::GatewayConfig;
use base64::{engine::general_purpose::URL_SAFE, Engine};
use reqwest::{blocking::Client, header::CONTENT_TYPE, Url};
use std::{iter, time::Duration};
use thiserror::Error;
use tracing::{debug, error};

/// content type of the Prometheus text exposition format
const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

#[derive(Debug, Error)]
pub enum MetricsPushError {
    #[error("Invalid gateway url {url}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Failed to encode metrics")]
    Encode(#[source] prometheus::Error),
    #[error("Gateway url {0} cannot carry a path")]
    NotABase(String),
    #[error("Failed to build HTTP client")]
    Client(#[source] reqwest::Error),
    #[error("Failed to push metrics to gateway {url}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Gateway {url} rejected metrics with status {status}: {body}")]
    Rejected {
        url: String,
        status: u16,
        body: String,
    },
}

/// Receiver for a rendered metrics snapshot
pub trait Publish {
    /// deliver `body`, replacing whatever was stored before for `job` and `grouping`
    fn publish(
        &self,
        job: &str,
        grouping: &[(&str, &str)],
        body: String,
    ) -> Result<(), MetricsPushError>;
}

#[derive(Debug, Clone)]
/// Prometheus push gateway reached over HTTP
pub struct PushGateway {
    url: Url,
    client: Client,
}

impl PushGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, MetricsPushError> {
        let raw = config.url.to_string();
        let url = Url::parse(&raw).map_err(|source| MetricsPushError::InvalidUrl {
            url: raw.clone(),
            source,
        })?;

        if url.cannot_be_a_base() {
            return Err(MetricsPushError::NotABase(raw));
        }

        let client = Client::builder()
            .timeout(config.timeout_ms.map(Duration::from_millis))
            .build()
            .map_err(MetricsPushError::Client)?;

        Ok(Self { url, client })
    }

    /// `<gateway>/metrics/job/<job>/<label>/<value>...`, every segment percent encoded
    pub fn endpoint(&self, job: &str, grouping: &[(&str, &str)]) -> Result<Url, MetricsPushError> {
        let mut url = self.url.clone();

        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| MetricsPushError::NotABase(self.url.to_string()))?;

            segments.pop_if_empty().push("metrics");
            for (name, value) in iter::once(&("job", job)).chain(grouping) {
                let (name, value) = label_segments(name, value);
                segments.extend([name, value]);
            }
        }

        Ok(url)
    }
}

/// Encode one `<label>/<value>` pair of the grouping path.
///
/// The gateway splits the path on `/` before decoding, so values that contain a slash or are
/// empty travel as `<label>@base64/<url safe base64>`.
fn label_segments(name: &str, value: &str) -> (String, String) {
    if value.is_empty() || value.contains('/') {
        (format!("{name}@base64"), URL_SAFE.encode(value))
    } else {
        (name.to_owned(), value.to_owned())
    }
}

impl Publish for PushGateway {
    fn publish(
        &self,
        job: &str,
        grouping: &[(&str, &str)],
        body: String,
    ) -> Result<(), MetricsPushError> {
        let url = self.endpoint(job, grouping)?;

        debug!(url = %url, bytes = body.len(), "Sending metrics");

        let response = self
            .client
            .put(url.clone())
            .header(CONTENT_TYPE, TEXT_FORMAT)
            .body(body)
            .send()
            .map_err(|source| {
                error!(url = %url, "Metrics gateway is unreachable: {source}");

                MetricsPushError::Transport {
                    url: url.to_string(),
                    source,
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(MetricsPushError::Rejected {
                url: url.to_string(),
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            })
        }
    }
}

#[cfg(test)]
pub mod recording {
    use super::{MetricsPushError, Publish};
    use std::cell::RefCell;

    #[derive(Debug, Clone, PartialEq)]
    pub struct Delivery {
        pub job: String,
        pub grouping: Vec<(String, String)>,
        pub body: String,
    }

    #[derive(Debug, Default)]
    /// Keeps every snapshot in memory, optionally refusing all of them
    pub struct RecordingPublisher {
        pub deliveries: RefCell<Vec<Delivery>>,
        pub unreachable: bool,
    }

    impl Publish for RecordingPublisher {
        fn publish(
            &self,
            job: &str,
            grouping: &[(&str, &str)],
            body: String,
        ) -> Result<(), MetricsPushError> {
            if self.unreachable {
                return Err(MetricsPushError::NotABase("unreachable".to_owned()));
            }

            self.deliveries.borrow_mut().push(Delivery {
                job: job.to_owned(),
                grouping: grouping
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect(),
                body,
            });

            Ok(())
        }
    }
}
