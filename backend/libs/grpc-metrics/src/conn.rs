//! Instrumented streaming conns
//!
//! Both wrappers forward every call to the wrapped conn unchanged. On top of
//! that they count successful sends and receives. The caller-side wrapper
//! also owns the call tracker and reports `handled` from `close_response`,
//! or on drop once a receive has ended the stream; the handler side is
//! closed by
//! [`MetricsInterceptor::wrap_streaming_handler`](crate::MetricsInterceptor::wrap_streaming_handler).

use std::sync::Arc;

use async_trait::async_trait;
use tonic::metadata::MetadataMap;
use tonic::Status;

use crate::labels::{code_of, CODE_OK};
use crate::spec::{Spec, StreamingClientConn, StreamingHandlerConn};
use crate::tracker::{CallReporter, CallTracker};

/// Caller-side conn wrapper returned by
/// [`MetricsInterceptor::wrap_streaming_client`](crate::MetricsInterceptor::wrap_streaming_client).
pub struct InstrumentedClientConn<C> {
    inner: C,
    reporter: Option<Arc<CallReporter>>,
    tracker: Option<CallTracker>,
    // Outcome of the first receive that ended the stream (`ok` on end of
    // stream, else the error's code). Used when close_response succeeds or
    // when the conn is dropped without it.
    terminal_code: Option<&'static str>,
}

impl<C> InstrumentedClientConn<C> {
    pub(crate) fn new(inner: C, tracker: Option<CallTracker>) -> Self {
        Self {
            inner,
            reporter: tracker.as_ref().map(|t| t.reporter().clone()),
            tracker,
            terminal_code: None,
        }
    }

    /// True when a collector is attached
    pub fn is_instrumented(&self) -> bool {
        self.reporter.is_some()
    }

    pub fn get_ref(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C> StreamingClientConn for InstrumentedClientConn<C>
where
    C: StreamingClientConn,
{
    type Request = C::Request;
    type Response = C::Response;

    fn spec(&self) -> &Spec {
        self.inner.spec()
    }

    fn request_header(&self) -> &MetadataMap {
        self.inner.request_header()
    }

    async fn send(&mut self, message: Self::Request) -> Result<(), Status> {
        let result = self.inner.send(message).await;
        if let (Ok(()), Some(reporter)) = (&result, &self.reporter) {
            reporter.message_sent();
        }
        result
    }

    async fn close_request(&mut self) -> Result<(), Status> {
        self.inner.close_request().await
    }

    async fn receive(&mut self) -> Result<Option<Self::Response>, Status> {
        let result = self.inner.receive().await;
        match &result {
            Ok(Some(_)) => {
                if let Some(reporter) = &self.reporter {
                    reporter.message_received();
                }
            }
            Ok(None) => {
                self.terminal_code.get_or_insert(CODE_OK);
            }
            Err(status) => {
                self.terminal_code.get_or_insert(code_of(Some(status)));
            }
        }
        result
    }

    fn response_header(&self) -> &MetadataMap {
        self.inner.response_header()
    }

    fn response_trailer(&self) -> &MetadataMap {
        self.inner.response_trailer()
    }

    async fn close_response(&mut self) -> Result<(), Status> {
        let result = self.inner.close_response().await;
        if let Some(tracker) = self.tracker.take() {
            let code = match &result {
                Err(status) => code_of(Some(status)),
                Ok(()) => self.terminal_code.unwrap_or(CODE_OK),
            };
            tracker.finish(code);
        }
        result
    }
}

impl<C> Drop for InstrumentedClientConn<C> {
    fn drop(&mut self) {
        // A stream that already ended keeps its outcome; anything else is
        // left to the tracker, which reports it as canceled.
        if let (Some(tracker), Some(code)) = (self.tracker.take(), self.terminal_code) {
            tracker.finish(code);
        }
    }
}

/// Handler-side conn wrapper passed to the handler by
/// [`MetricsInterceptor::wrap_streaming_handler`](crate::MetricsInterceptor::wrap_streaming_handler).
pub struct InstrumentedHandlerConn<C> {
    inner: C,
    reporter: Option<Arc<CallReporter>>,
}

impl<C> InstrumentedHandlerConn<C> {
    pub(crate) fn new(inner: C, reporter: Option<Arc<CallReporter>>) -> Self {
        Self { inner, reporter }
    }

    pub fn is_instrumented(&self) -> bool {
        self.reporter.is_some()
    }

    pub fn get_ref(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C> StreamingHandlerConn for InstrumentedHandlerConn<C>
where
    C: StreamingHandlerConn,
{
    type Request = C::Request;
    type Response = C::Response;

    fn spec(&self) -> &Spec {
        self.inner.spec()
    }

    fn request_header(&self) -> &MetadataMap {
        self.inner.request_header()
    }

    async fn receive(&mut self) -> Result<Option<Self::Request>, Status> {
        let result = self.inner.receive().await;
        if let (Ok(Some(_)), Some(reporter)) = (&result, &self.reporter) {
            reporter.message_received();
        }
        result
    }

    async fn send(&mut self, message: Self::Response) -> Result<(), Status> {
        let result = self.inner.send(message).await;
        if let (Ok(()), Some(reporter)) = (&result, &self.reporter) {
            reporter.message_sent();
        }
        result
    }

    fn response_header_mut(&mut self) -> &mut MetadataMap {
        self.inner.response_header_mut()
    }

    fn response_trailer_mut(&mut self) -> &mut MetadataMap {
        self.inner.response_trailer_mut()
    }
}
