//! Per-call bookkeeping shared by the unary, streaming and tower paths

use std::sync::Arc;
use std::time::Instant;

use tonic::Code;
use tracing::debug;

use crate::labels::{code_name, procedure_to_service_and_method, CallType};
use crate::metrics::Metrics;
use crate::spec::Spec;

/// Labels of one call bound to the collector that records them.
#[derive(Debug)]
pub(crate) struct CallReporter {
    metrics: Metrics,
    call_type: CallType,
    service: String,
    method: String,
}

impl CallReporter {
    pub(crate) fn new(metrics: Metrics, spec: &Spec) -> Self {
        let (service, method) = procedure_to_service_and_method(&spec.procedure);
        Self {
            metrics,
            call_type: CallType::from(spec.stream_type),
            service: service.to_string(),
            method: method.to_string(),
        }
    }

    pub(crate) fn message_sent(&self) {
        self.metrics
            .report_message_sent(self.call_type.as_str(), &self.service, &self.method);
    }

    pub(crate) fn message_received(&self) {
        self.metrics
            .report_message_received(self.call_type.as_str(), &self.service, &self.method);
    }
}

/// Reports `started` when created and `handled` exactly once afterwards.
///
/// A tracker dropped without [`finish`](CallTracker::finish) belongs to a call
/// whose future or stream was abandoned, and is reported as `canceled`.
#[derive(Debug)]
pub(crate) struct CallTracker {
    reporter: Arc<CallReporter>,
    started_at: Instant,
    finished: bool,
}

impl CallTracker {
    pub(crate) fn start(metrics: Metrics, spec: &Spec) -> Self {
        let reporter = CallReporter::new(metrics, spec);
        reporter.metrics.report_started(
            reporter.call_type.as_str(),
            &reporter.service,
            &reporter.method,
        );

        Self {
            reporter: Arc::new(reporter),
            started_at: Instant::now(),
            finished: false,
        }
    }

    pub(crate) fn reporter(&self) -> &Arc<CallReporter> {
        &self.reporter
    }

    pub(crate) fn finish(mut self, code: &str) {
        self.report_handled(code);
    }

    fn report_handled(&mut self, code: &str) {
        if self.finished {
            return;
        }
        self.finished = true;

        let reporter = &self.reporter;
        let call_type = reporter.call_type.as_str();
        let elapsed = self.started_at.elapsed().as_secs_f64();

        reporter
            .metrics
            .report_handled(call_type, &reporter.service, &reporter.method, code);
        reporter.metrics.report_handled_seconds(
            call_type,
            &reporter.service,
            &reporter.method,
            code,
            elapsed,
        );
    }
}

impl Drop for CallTracker {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                service = %self.reporter.service,
                method = %self.reporter.method,
                "RPC dropped before completion"
            );
            self.report_handled(code_name(Code::Cancelled));
        }
    }
}
