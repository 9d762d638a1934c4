//! Collector configuration
//!
//! [`MetricsOptions`] is a plain record. Builder calls overwrite one field
//! each, so the last call for a given field wins. Nothing is validated here:
//! bad names or bucket ladders are rejected when the collector is built.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Optional replacements for the default metric names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricNames {
    pub started: Option<String>,
    pub handled: Option<String>,
    pub handled_seconds: Option<String>,
    pub msg_sent: Option<String>,
    pub msg_received: Option<String>,
}

/// Configuration for a [`Metrics`](crate::Metrics) collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsOptions {
    /// Export the `handled_seconds` histogram (default: false)
    pub histogram: bool,

    /// Upper bounds of the latency histogram, in seconds
    pub histogram_buckets: Vec<f64>,

    /// Prefix prepended to every metric name
    pub namespace: String,

    /// Second prefix, placed between the namespace and the name
    pub subsystem: String,

    /// Labels attached to every series with a fixed value
    pub const_labels: HashMap<String, String>,

    pub names: MetricNames,
}

impl Default for MetricsOptions {
    fn default() -> Self {
        Self {
            histogram: false,
            histogram_buckets: prometheus::DEFAULT_BUCKETS.to_vec(),
            namespace: String::new(),
            subsystem: String::new(),
            const_labels: HashMap::new(),
            names: MetricNames::default(),
        }
    }
}

impl MetricsOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_histogram(mut self, enabled: bool) -> Self {
        self.histogram = enabled;
        self
    }

    pub fn with_histogram_buckets(mut self, buckets: impl Into<Vec<f64>>) -> Self {
        self.histogram_buckets = buckets.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.subsystem = subsystem.into();
        self
    }

    /// Replace the constant labels
    pub fn with_const_labels<K, V>(mut self, labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.const_labels = labels
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn with_started_name(mut self, name: impl Into<String>) -> Self {
        self.names.started = Some(name.into());
        self
    }

    pub fn with_handled_name(mut self, name: impl Into<String>) -> Self {
        self.names.handled = Some(name.into());
        self
    }

    pub fn with_handled_seconds_name(mut self, name: impl Into<String>) -> Self {
        self.names.handled_seconds = Some(name.into());
        self
    }

    pub fn with_msg_sent_name(mut self, name: impl Into<String>) -> Self {
        self.names.msg_sent = Some(name.into());
        self
    }

    pub fn with_msg_received_name(mut self, name: impl Into<String>) -> Self {
        self.names.msg_received = Some(name.into());
        self
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `GRPC_METRICS_NAMESPACE`: Metric namespace
    /// - `GRPC_METRICS_SUBSYSTEM`: Metric subsystem
    /// - `GRPC_METRICS_HISTOGRAM`: Enable the latency histogram (true/false)
    /// - `GRPC_METRICS_HISTOGRAM_BUCKETS`: Comma separated bucket bounds, e.g. `0.01,0.1,1`
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::default();

        if let Some(namespace) = lookup("GRPC_METRICS_NAMESPACE") {
            options.namespace = namespace;
        }

        if let Some(subsystem) = lookup("GRPC_METRICS_SUBSYSTEM") {
            options.subsystem = subsystem;
        }

        if let Some(raw) = lookup("GRPC_METRICS_HISTOGRAM") {
            match raw.trim().parse::<bool>() {
                Ok(enabled) => options.histogram = enabled,
                Err(_) => warn!(value = %raw, "Ignoring invalid GRPC_METRICS_HISTOGRAM"),
            }
        }

        if let Some(raw) = lookup("GRPC_METRICS_HISTOGRAM_BUCKETS") {
            match parse_buckets(&raw) {
                Some(buckets) => options.histogram_buckets = buckets,
                None => warn!(value = %raw, "Ignoring invalid GRPC_METRICS_HISTOGRAM_BUCKETS"),
            }
        }

        options
    }
}

fn parse_buckets(raw: &str) -> Option<Vec<f64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<f64>().ok())
        .collect()
}
