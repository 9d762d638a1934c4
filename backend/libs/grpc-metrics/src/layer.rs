//! Tower layer for tonic servers
//!
//! Reports every request passing through the HTTP stack of a tonic server
//! into a server-side [`Metrics`] collector. The procedure comes from the
//! request path and the result code from the `grpc-status` response header.
//!
//! The layer only sees the response head, so a streaming response is counted
//! as handled once its headers are produced and messages are not counted.
//! Use [`MetricsInterceptor::wrap_streaming_handler`](crate::MetricsInterceptor::wrap_streaming_handler)
//! for per-message counts.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use pin_project::pin_project;
use tonic::codegen::http::{HeaderMap, Request, Response};
use tonic::Code;
use tower::{Layer, Service};

use crate::labels::{code_name, CODE_OK, UNKNOWN};
use crate::metrics::Metrics;
use crate::spec::{Spec, StreamType};
use crate::tracker::CallTracker;

const GRPC_STATUS: &str = "grpc-status";

#[derive(Debug, Clone)]
pub struct GrpcMetricsLayer {
    metrics: Option<Metrics>,
    stream_types: Arc<HashMap<String, StreamType>>,
    default_stream_type: StreamType,
}

impl GrpcMetricsLayer {
    /// `None` turns the layer into a pass-through.
    pub fn new(metrics: Option<Metrics>) -> Self {
        Self {
            metrics,
            stream_types: Arc::new(HashMap::new()),
            default_stream_type: StreamType::UNARY,
        }
    }

    /// Declare the stream type of a procedure, e.g. `"/chat.v1.ChatService/Chat"`
    pub fn with_stream_type(mut self, procedure: impl Into<String>, stream_type: StreamType) -> Self {
        Arc::make_mut(&mut self.stream_types).insert(procedure.into(), stream_type);
        self
    }

    /// Stream type of procedures not declared with [`with_stream_type`](Self::with_stream_type)
    pub fn with_default_stream_type(mut self, stream_type: StreamType) -> Self {
        self.default_stream_type = stream_type;
        self
    }

    fn spec_for(&self, procedure: &str) -> Spec {
        let stream_type = self
            .stream_types
            .get(procedure)
            .copied()
            .unwrap_or(self.default_stream_type);
        Spec::server(procedure, stream_type)
    }
}

impl<S> Layer<S> for GrpcMetricsLayer {
    type Service = GrpcMetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GrpcMetricsService {
            inner,
            layer: self.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GrpcMetricsService<S> {
    inner: S,
    layer: GrpcMetricsLayer,
}

impl<S, B, C> Service<Request<B>> for GrpcMetricsService<S>
where
    S: Service<Request<B>, Response = Response<C>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = GrpcMetricsFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let tracker = self.layer.metrics.as_ref().map(|metrics| {
            let spec = self.layer.spec_for(req.uri().path());
            CallTracker::start(metrics.clone(), &spec)
        });

        GrpcMetricsFuture {
            inner: self.inner.call(req),
            tracker,
        }
    }
}

#[pin_project]
pub struct GrpcMetricsFuture<F> {
    #[pin]
    inner: F,
    tracker: Option<CallTracker>,
}

impl<F, C, E> Future for GrpcMetricsFuture<F>
where
    F: Future<Output = Result<Response<C>, E>>,
{
    type Output = Result<Response<C>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));

        if let Some(tracker) = this.tracker.take() {
            let code = match &result {
                Ok(response) => status_code(response.headers()),
                Err(_) => UNKNOWN,
            };
            tracker.finish(code);
        }

        Poll::Ready(result)
    }
}

/// Missing header means the handler did not fail before producing a response.
fn status_code(headers: &HeaderMap) -> &'static str {
    headers
        .get(GRPC_STATUS)
        .map(|value| code_name(Code::from_bytes(value.as_bytes())))
        .unwrap_or(CODE_OK)
}
