//! Interceptor facade
//!
//! [`MetricsInterceptor`] holds an optional collector per side and exposes
//! the three hooks an RPC stack needs: unary calls, caller-side streams and
//! handler-side streams. A side without a collector is a pure pass-through.

use std::future::Future;

use tonic::Status;
use tracing::debug;

use crate::conn::{InstrumentedClientConn, InstrumentedHandlerConn};
use crate::labels::code_of;
use crate::layer::GrpcMetricsLayer;
use crate::metrics::{default_client_metrics, default_server_metrics, Metrics};
use crate::spec::{Spec, StreamingClientConn, StreamingHandlerConn};
use crate::tracker::CallTracker;

/// Builder for [`MetricsInterceptor`]
///
/// Sides left untouched fall back to the process-wide default collectors.
#[derive(Debug, Default)]
pub struct MetricsInterceptorBuilder {
    client: Option<Option<Metrics>>,
    server: Option<Option<Metrics>>,
}

impl MetricsInterceptorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collector for calls made by this process; `None` disables the client side
    pub fn with_client_metrics(mut self, metrics: Option<Metrics>) -> Self {
        self.client = Some(metrics);
        self
    }

    /// Collector for calls handled by this process; `None` disables the server side
    pub fn with_server_metrics(mut self, metrics: Option<Metrics>) -> Self {
        self.server = Some(metrics);
        self
    }

    pub fn build(self) -> MetricsInterceptor {
        MetricsInterceptor {
            client: self.client.unwrap_or_else(|| Some(default_client_metrics())),
            server: self.server.unwrap_or_else(|| Some(default_server_metrics())),
        }
    }
}

/// Metrics interceptor for RPC clients and servers
///
/// Cheap to clone; clones share the same collectors.
///
/// ## Usage
///
/// ```rust,no_run
/// use grpc_metrics::{Metrics, MetricsInterceptor, MetricsOptions, Spec, StreamType};
/// use tonic::{Response, Status};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = prometheus::Registry::new();
/// let server_metrics = Metrics::server(MetricsOptions::new().with_histogram(true))?;
/// server_metrics.register(&registry)?;
///
/// let interceptor = MetricsInterceptor::builder()
///     .with_server_metrics(Some(server_metrics))
///     .with_client_metrics(None)
///     .build();
///
/// let spec = Spec::server("/greet.v1.GreetService/Greet", StreamType::UNARY);
/// let _response = interceptor
///     .wrap_unary(&spec, "elza", |name| async move {
///         Ok::<_, Status>(Response::new(format!("Hello, {name}")))
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MetricsInterceptor {
    client: Option<Metrics>,
    server: Option<Metrics>,
}

impl MetricsInterceptor {
    /// Interceptor reporting into the process-wide default collectors
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> MetricsInterceptorBuilder {
        MetricsInterceptorBuilder::new()
    }

    pub fn client_metrics(&self) -> Option<&Metrics> {
        self.client.as_ref()
    }

    pub fn server_metrics(&self) -> Option<&Metrics> {
        self.server.as_ref()
    }

    /// Tower layer reporting server-side calls into this interceptor's server collector
    pub fn layer(&self) -> GrpcMetricsLayer {
        GrpcMetricsLayer::new(self.server.clone())
    }

    fn metrics_for(&self, spec: &Spec) -> Option<&Metrics> {
        if spec.is_client {
            self.client.as_ref()
        } else {
            self.server.as_ref()
        }
    }

    /// Run a unary call through `next`, reporting it on the side named by `spec`.
    ///
    /// The result of `next` is returned as is.
    pub async fn wrap_unary<Req, Resp, F, Fut>(
        &self,
        spec: &Spec,
        request: Req,
        next: F,
    ) -> Result<Resp, Status>
    where
        F: FnOnce(Req) -> Fut,
        Fut: Future<Output = Result<Resp, Status>>,
    {
        // Short-circuit, not configured to report for either client or server.
        if self.client.is_none() && self.server.is_none() {
            return next(request).await;
        }

        let Some(metrics) = self.metrics_for(spec) else {
            return next(request).await;
        };

        let tracker = CallTracker::start(metrics.clone(), spec);
        let result = next(request).await;
        tracker.finish(code_of(result.as_ref().err()));

        result
    }

    /// Wrap the caller side of a streaming call.
    ///
    /// The call is reported as handled when `close_response` returns. A conn
    /// dropped after a receive ended the stream reports that outcome (`ok` on
    /// end of stream, the error's code otherwise); one dropped mid-flight
    /// reports `canceled`.
    pub fn wrap_streaming_client<C>(&self, conn: C) -> InstrumentedClientConn<C>
    where
        C: StreamingClientConn,
    {
        let tracker = self.client.as_ref().map(|metrics| {
            debug!(procedure = %conn.spec().procedure, "Instrumenting streaming client call");
            CallTracker::start(metrics.clone(), conn.spec())
        });

        InstrumentedClientConn::new(conn, tracker)
    }

    /// Run a streaming handler, reporting the call as handled with the
    /// handler's own result once it returns.
    pub async fn wrap_streaming_handler<C, F, Fut>(&self, conn: C, next: F) -> Result<(), Status>
    where
        C: StreamingHandlerConn,
        F: FnOnce(InstrumentedHandlerConn<C>) -> Fut,
        Fut: Future<Output = Result<(), Status>>,
    {
        let tracker = self.server.as_ref().map(|metrics| {
            debug!(procedure = %conn.spec().procedure, "Instrumenting streaming handler call");
            CallTracker::start(metrics.clone(), conn.spec())
        });
        let conn = InstrumentedHandlerConn::new(conn, tracker.as_ref().map(|t| t.reporter().clone()));

        let result = next(conn).await;

        if let Some(tracker) = tracker {
            tracker.finish(code_of(result.as_ref().err()));
        }

        result
    }
}

impl Default for MetricsInterceptor {
    fn default() -> Self {
        Self::new()
    }
}
