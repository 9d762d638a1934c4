//! Prometheus collector for one side of RPC traffic
//!
//! Every series is keyed by `type`, `service` and `method`; the handled
//! counter and latency histogram add `code`. Label combinations are created
//! on first use.

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use tracing::warn;

use crate::error::{MetricsError, Result};
use crate::options::MetricsOptions;

const CALL_LABELS: [&str; 3] = ["type", "service", "method"];
const HANDLED_LABELS: [&str; 4] = ["type", "service", "method", "code"];

/// Which end of a call a collector observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Client => "client",
            Side::Server => "server",
        }
    }

    fn default_name(self, suffix: &str) -> String {
        format!("connect_{}_{}", self.as_str(), suffix)
    }
}

lazy_static::lazy_static! {
    static ref DEFAULT_CLIENT_METRICS: Metrics = Metrics::process_default(Side::Client);
    static ref DEFAULT_SERVER_METRICS: Metrics = Metrics::process_default(Side::Server);
}

/// Process-wide client collector with default options.
///
/// Built on first use and registered once against
/// [`prometheus::default_registry`]. A registration conflict is logged, not raised.
pub fn default_client_metrics() -> Metrics {
    DEFAULT_CLIENT_METRICS.clone()
}

/// Process-wide server collector, see [`default_client_metrics`].
pub fn default_server_metrics() -> Metrics {
    DEFAULT_SERVER_METRICS.clone()
}

/// Started/handled counters, optional latency histogram and stream message
/// counters for one side of RPC traffic.
///
/// Cloning is cheap and clones share the underlying series.
#[derive(Clone)]
pub struct Metrics {
    side: Side,
    started: IntCounterVec,
    handled: IntCounterVec,
    handled_seconds: Option<HistogramVec>,
    msg_sent: IntCounterVec,
    msg_received: IntCounterVec,
}

impl Metrics {
    /// Collector for calls handled by this process
    pub fn server(options: MetricsOptions) -> Result<Self> {
        Self::build(Side::Server, options)
    }

    /// Collector for calls made by this process
    pub fn client(options: MetricsOptions) -> Result<Self> {
        Self::build(Side::Client, options)
    }

    fn build(side: Side, options: MetricsOptions) -> Result<Self> {
        let names = &options.names;
        let side_str = side.as_str();

        let started = counter_vec(
            &options,
            names.started.clone().unwrap_or_else(|| side.default_name("started_total")),
            format!("Total number of RPCs started handling {side_str}-side"),
            &CALL_LABELS,
        )?;

        let handled = counter_vec(
            &options,
            names.handled.clone().unwrap_or_else(|| side.default_name("handled_total")),
            format!("Total number of RPCs handled {side_str}-side"),
            &HANDLED_LABELS,
        )?;

        let msg_sent = counter_vec(
            &options,
            names.msg_sent.clone().unwrap_or_else(|| side.default_name("msg_sent_total")),
            format!("Total number of stream messages sent {side_str}-side"),
            &CALL_LABELS,
        )?;

        let msg_received = counter_vec(
            &options,
            names
                .msg_received
                .clone()
                .unwrap_or_else(|| side.default_name("msg_received_total")),
            format!("Total number of stream messages received {side_str}-side"),
            &CALL_LABELS,
        )?;

        let handled_seconds = if options.histogram {
            let name = names
                .handled_seconds
                .clone()
                .unwrap_or_else(|| side.default_name("handled_seconds"));
            let opts = HistogramOpts::new(name.clone(), format!("Histogram of RPCs handled {side_str}-side"))
                .namespace(options.namespace.clone())
                .subsystem(options.subsystem.clone())
                .const_labels(options.const_labels.clone())
                .buckets(options.histogram_buckets.clone());

            // Bucket ladders are only checked when a series is created; probe
            // one now so a bad ladder fails here instead of at report time.
            Histogram::with_opts(opts.clone()).map_err(|e| MetricsError::construction(&name, e))?;

            Some(HistogramVec::new(opts, &HANDLED_LABELS).map_err(|e| MetricsError::construction(&name, e))?)
        } else {
            None
        };

        Ok(Self {
            side,
            started,
            handled,
            handled_seconds,
            msg_sent,
            msg_received,
        })
    }

    fn process_default(side: Side) -> Self {
        let metrics = Self::build(side, MetricsOptions::default())
            .expect("Default metric definitions should always be valid");

        if let Err(e) = metrics.register(prometheus::default_registry()) {
            warn!(side = side.as_str(), error = %e, "Default RPC metrics already registered");
        }

        metrics
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn histogram_enabled(&self) -> bool {
        self.handled_seconds.is_some()
    }

    /// Register every owned vector against `registry`.
    ///
    /// Stops at the first collision. Vectors registered before the failure
    /// stay registered.
    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry
            .register(Box::new(self.started.clone()))
            .map_err(MetricsError::Registration)?;
        registry
            .register(Box::new(self.handled.clone()))
            .map_err(MetricsError::Registration)?;

        if let Some(histogram) = &self.handled_seconds {
            registry
                .register(Box::new(histogram.clone()))
                .map_err(MetricsError::Registration)?;
        }

        registry
            .register(Box::new(self.msg_sent.clone()))
            .map_err(MetricsError::Registration)?;
        registry
            .register(Box::new(self.msg_received.clone()))
            .map_err(MetricsError::Registration)?;

        Ok(())
    }

    pub fn report_started(&self, call_type: &str, service: &str, method: &str) {
        inc(&self.started, &[call_type, service, method]);
    }

    pub fn report_handled(&self, call_type: &str, service: &str, method: &str, code: &str) {
        inc(&self.handled, &[call_type, service, method, code]);
    }

    /// No-op unless the histogram was enabled at construction
    pub fn report_handled_seconds(
        &self,
        call_type: &str,
        service: &str,
        method: &str,
        code: &str,
        seconds: f64,
    ) {
        let Some(histogram) = &self.handled_seconds else {
            return;
        };

        match histogram.get_metric_with_label_values(&[call_type, service, method, code]) {
            Ok(series) => series.observe(seconds),
            Err(e) => warn!(error = %e, "Failed to resolve RPC latency series"),
        }
    }

    pub fn report_message_sent(&self, call_type: &str, service: &str, method: &str) {
        inc(&self.msg_sent, &[call_type, service, method]);
    }

    pub fn report_message_received(&self, call_type: &str, service: &str, method: &str) {
        inc(&self.msg_received, &[call_type, service, method]);
    }

    fn collectors(&self) -> impl Iterator<Item = &dyn Collector> {
        [
            &self.started as &dyn Collector,
            &self.handled as &dyn Collector,
            &self.msg_sent as &dyn Collector,
            &self.msg_received as &dyn Collector,
        ]
        .into_iter()
        .chain(self.handled_seconds.as_ref().map(|h| h as &dyn Collector))
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("side", &self.side)
            .field("histogram", &self.histogram_enabled())
            .finish_non_exhaustive()
    }
}

/// Lets the whole collector be registered as a single unit.
impl Collector for Metrics {
    fn desc(&self) -> Vec<&Desc> {
        self.collectors().flat_map(|c| c.desc()).collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.collectors().flat_map(|c| c.collect()).collect()
    }
}

fn counter_vec(
    options: &MetricsOptions,
    name: String,
    help: String,
    labels: &[&str],
) -> Result<IntCounterVec> {
    let opts = Opts::new(name.clone(), help)
        .namespace(options.namespace.clone())
        .subsystem(options.subsystem.clone())
        .const_labels(options.const_labels.clone());

    IntCounterVec::new(opts, labels).map_err(|e| MetricsError::construction(&name, e))
}

fn inc(vec: &IntCounterVec, labels: &[&str]) {
    match vec.get_metric_with_label_values(labels) {
        Ok(counter) => counter.inc(),
        Err(e) => warn!(error = %e, "Failed to resolve RPC counter series"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICE: &str = "greet.v1.GreetService";

    fn test_options() -> MetricsOptions {
        MetricsOptions::new()
            .with_histogram(true)
            .with_namespace("namespace")
            .with_subsystem("subsystem")
            .with_const_labels([("component", "foo")])
            .with_histogram_buckets(vec![0.5, 1.0, 1.5])
    }

    fn family<'a>(families: &'a [MetricFamily], name: &str) -> Option<&'a MetricFamily> {
        families.iter().find(|f| f.get_name() == name)
    }

    #[test]
    fn test_server_metrics() {
        let registry = Registry::new();
        let metrics = Metrics::server(test_options()).unwrap();
        metrics.register(&registry).unwrap();

        metrics.report_started("unary", SERVICE, "Greet");
        assert_eq!(metrics.started.with_label_values(&["unary", SERVICE, "Greet"]).get(), 1);

        metrics.report_handled("unary", SERVICE, "Greet", "aborted");
        assert_eq!(
            metrics.handled.with_label_values(&["unary", SERVICE, "Greet", "aborted"]).get(),
            1
        );

        metrics.report_message_sent("unary", SERVICE, "Greet");
        metrics.report_message_received("unary", SERVICE, "Greet");
        assert_eq!(metrics.msg_sent.with_label_values(&["unary", SERVICE, "Greet"]).get(), 1);
        assert_eq!(metrics.msg_received.with_label_values(&["unary", SERVICE, "Greet"]).get(), 1);

        metrics.report_handled_seconds("unary", SERVICE, "Greet", "aborted", 1.0);

        let families = registry.gather();
        let histogram = family(&families, "namespace_subsystem_connect_server_handled_seconds")
            .expect("histogram should be exported");
        assert_eq!(histogram.get_help(), "Histogram of RPCs handled server-side");

        let series = &histogram.get_metric()[0];
        let labels: Vec<(&str, &str)> = series
            .get_label()
            .iter()
            .map(|l| (l.get_name(), l.get_value()))
            .collect();
        assert!(labels.contains(&("component", "foo")));
        assert!(labels.contains(&("code", "aborted")));

        let buckets = series.get_histogram().get_bucket();
        let cumulative: Vec<(f64, u64)> = buckets
            .iter()
            .map(|b| (b.get_upper_bound(), b.get_cumulative_count()))
            .collect();
        assert_eq!(cumulative, vec![(0.5, 0), (1.0, 1), (1.5, 1)]);
        assert_eq!(series.get_histogram().get_sample_count(), 1);
        assert_eq!(series.get_histogram().get_sample_sum(), 1.0);
    }

    #[test]
    fn test_client_metric_names() {
        let registry = Registry::new();
        let metrics = Metrics::client(test_options()).unwrap();
        metrics.register(&registry).unwrap();

        metrics.report_started("bidi", SERVICE, "Chat");
        metrics.report_handled("bidi", SERVICE, "Chat", "ok");
        metrics.report_handled_seconds("bidi", SERVICE, "Chat", "ok", 0.2);
        metrics.report_message_sent("bidi", SERVICE, "Chat");
        metrics.report_message_received("bidi", SERVICE, "Chat");

        let names: Vec<String> = registry.gather().iter().map(|f| f.get_name().to_string()).collect();
        assert_eq!(
            names,
            vec![
                "namespace_subsystem_connect_client_handled_seconds",
                "namespace_subsystem_connect_client_handled_total",
                "namespace_subsystem_connect_client_msg_received_total",
                "namespace_subsystem_connect_client_msg_sent_total",
                "namespace_subsystem_connect_client_started_total",
            ]
        );
    }

    #[test]
    fn test_histogram_disabled_is_noop() {
        let metrics = Metrics::server(MetricsOptions::default()).unwrap();
        assert!(!metrics.histogram_enabled());

        metrics.report_handled_seconds("unary", SERVICE, "Greet", "ok", 0.1);

        assert!(metrics.desc().iter().all(|d| !d.fq_name.ends_with("handled_seconds")));
    }

    #[test]
    fn test_name_overrides() {
        let metrics = Metrics::server(
            MetricsOptions::new()
                .with_histogram(true)
                .with_started_name("calls_started_total")
                .with_handled_name("calls_handled_total")
                .with_handled_seconds_name("calls_handled_seconds")
                .with_msg_sent_name("calls_msg_sent_total")
                .with_msg_received_name("calls_msg_received_total"),
        )
        .unwrap();

        let mut names: Vec<&str> = metrics.desc().iter().map(|d| d.fq_name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(
            names,
            vec![
                "calls_handled_seconds",
                "calls_handled_total",
                "calls_msg_received_total",
                "calls_msg_sent_total",
                "calls_started_total",
            ]
        );
    }

    #[test]
    fn test_invalid_definitions_fail_construction() {
        let err = Metrics::server(MetricsOptions::new().with_started_name("")).unwrap_err();
        assert!(matches!(err, MetricsError::Construction { .. }));

        let err = Metrics::server(
            MetricsOptions::new()
                .with_histogram(true)
                .with_histogram_buckets(vec![5.0, 1.0]),
        )
        .unwrap_err();
        assert!(matches!(err, MetricsError::Construction { .. }));
    }

    #[test]
    fn test_registration_collision() {
        let registry = Registry::new();

        Metrics::server(MetricsOptions::new().with_namespace("a"))
            .unwrap()
            .register(&registry)
            .unwrap();
        Metrics::server(MetricsOptions::new().with_namespace("b"))
            .unwrap()
            .register(&registry)
            .unwrap();

        let err = Metrics::server(MetricsOptions::new().with_namespace("a"))
            .unwrap()
            .register(&registry)
            .unwrap_err();
        assert!(err.is_already_registered());
    }

    #[test]
    fn test_register_as_collector() {
        let registry = Registry::new();
        let metrics = Metrics::client(MetricsOptions::default()).unwrap();
        registry.register(Box::new(metrics.clone())).unwrap();

        metrics.report_started("unary", SERVICE, "Greet");
        let families = registry.gather();
        let started = family(&families, "connect_client_started_total").unwrap();
        assert_eq!(started.get_metric()[0].get_counter().get_value(), 1.0);

        assert!(metrics.register(&registry).is_err());
    }

    #[test]
    fn test_default_metrics_are_shared() {
        let first = default_server_metrics();
        let second = default_server_metrics();
        assert_eq!(first.side(), Side::Server);
        assert_eq!(default_client_metrics().side(), Side::Client);

        first.report_started("unary", "defaults.v1.Test", "Shared");
        assert_eq!(
            second.started.with_label_values(&["unary", "defaults.v1.Test", "Shared"]).get(),
            1
        );
    }
}
