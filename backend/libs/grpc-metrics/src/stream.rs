//! Channel-backed conns for tonic streaming calls
//!
//! tonic exposes inbound messages as a `Stream` (`tonic::Streaming<T>`) and
//! takes outbound messages from a stream the caller feeds, usually through a
//! `tokio::sync::mpsc` channel. These adapters put that plumbing behind
//! [`StreamingClientConn`] / [`StreamingHandlerConn`] so it can be wrapped by
//! the interceptor.
//!
//! ```rust,ignore
//! async fn chat(
//!     &self,
//!     request: Request<Streaming<ChatMessage>>,
//! ) -> Result<Response<Self::ChatStream>, Status> {
//!     let (tx, rx) = mpsc::channel(16);
//!     let spec = Spec::server("/chat.v1.ChatService/Chat", StreamType::BIDI);
//!     let conn = ChannelHandlerConn::from_request(spec, request, tx);
//!     let interceptor = self.interceptor.clone();
//!
//!     tokio::spawn(async move {
//!         interceptor
//!             .wrap_streaming_handler(conn, |mut conn| async move {
//!                 while let Some(message) = conn.receive().await? {
//!                     conn.send(echo(message)).await?;
//!                 }
//!                 Ok(())
//!             })
//!             .await
//!     });
//!
//!     Ok(Response::new(ReceiverStream::new(rx)))
//! }
//! ```

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};

use crate::spec::{Spec, StreamingClientConn, StreamingHandlerConn};

/// Caller side of a streaming call: requests go out through an mpsc sender,
/// responses come back on `S`.
pub struct ChannelClientConn<S, Req> {
    spec: Spec,
    request_header: MetadataMap,
    outbound: Option<mpsc::Sender<Req>>,
    inbound: Option<S>,
    response_header: MetadataMap,
    response_trailer: MetadataMap,
}

impl<S, Req> ChannelClientConn<S, Req> {
    pub fn new(spec: Spec, outbound: mpsc::Sender<Req>, inbound: S) -> Self {
        Self {
            spec,
            request_header: MetadataMap::new(),
            outbound: Some(outbound),
            inbound: Some(inbound),
            response_header: MetadataMap::new(),
            response_trailer: MetadataMap::new(),
        }
    }

    /// Build from the response of a tonic streaming call, keeping its headers
    pub fn from_response(spec: Spec, outbound: mpsc::Sender<Req>, response: Response<S>) -> Self {
        let (response_header, inbound, _extensions) = response.into_parts();
        Self {
            response_header,
            ..Self::new(spec, outbound, inbound)
        }
    }

    pub fn with_request_header(mut self, header: MetadataMap) -> Self {
        self.request_header = header;
        self
    }

    pub fn with_response_trailer(mut self, trailer: MetadataMap) -> Self {
        self.response_trailer = trailer;
        self
    }
}

#[async_trait]
impl<S, Req, Resp> StreamingClientConn for ChannelClientConn<S, Req>
where
    S: Stream<Item = Result<Resp, Status>> + Send + Unpin,
    Req: Send + 'static,
    Resp: Send + 'static,
{
    type Request = Req;
    type Response = Resp;

    fn spec(&self) -> &Spec {
        &self.spec
    }

    fn request_header(&self) -> &MetadataMap {
        &self.request_header
    }

    async fn send(&mut self, message: Req) -> Result<(), Status> {
        let Some(outbound) = &self.outbound else {
            return Err(Status::failed_precondition("request stream already closed"));
        };

        outbound
            .send(message)
            .await
            .map_err(|_| Status::unavailable("request stream closed by peer"))
    }

    async fn close_request(&mut self) -> Result<(), Status> {
        self.outbound = None;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<Resp>, Status> {
        let Some(inbound) = self.inbound.as_mut() else {
            return Err(Status::failed_precondition("response stream already closed"));
        };

        inbound.next().await.transpose()
    }

    fn response_header(&self) -> &MetadataMap {
        &self.response_header
    }

    fn response_trailer(&self) -> &MetadataMap {
        &self.response_trailer
    }

    async fn close_response(&mut self) -> Result<(), Status> {
        self.inbound = None;
        Ok(())
    }
}

/// Handler side of a streaming call: requests arrive on `S`, responses are
/// pushed into the channel whose receiver backs the tonic response stream.
pub struct ChannelHandlerConn<S, Resp> {
    spec: Spec,
    request_header: MetadataMap,
    inbound: S,
    outbound: mpsc::Sender<Result<Resp, Status>>,
    response_header: MetadataMap,
    response_trailer: MetadataMap,
}

impl<S, Resp> ChannelHandlerConn<S, Resp> {
    pub fn new(spec: Spec, inbound: S, outbound: mpsc::Sender<Result<Resp, Status>>) -> Self {
        Self {
            spec,
            request_header: MetadataMap::new(),
            inbound,
            outbound,
            response_header: MetadataMap::new(),
            response_trailer: MetadataMap::new(),
        }
    }

    /// Build from an incoming tonic streaming request, keeping its metadata
    pub fn from_request(
        spec: Spec,
        request: Request<S>,
        outbound: mpsc::Sender<Result<Resp, Status>>,
    ) -> Self {
        let (request_header, _extensions, inbound) = request.into_parts();
        Self {
            request_header,
            ..Self::new(spec, inbound, outbound)
        }
    }

    pub fn response_header(&self) -> &MetadataMap {
        &self.response_header
    }

    pub fn response_trailer(&self) -> &MetadataMap {
        &self.response_trailer
    }
}

#[async_trait]
impl<S, Req, Resp> StreamingHandlerConn for ChannelHandlerConn<S, Resp>
where
    S: Stream<Item = Result<Req, Status>> + Send + Unpin,
    Req: Send + 'static,
    Resp: Send + 'static,
{
    type Request = Req;
    type Response = Resp;

    fn spec(&self) -> &Spec {
        &self.spec
    }

    fn request_header(&self) -> &MetadataMap {
        &self.request_header
    }

    async fn receive(&mut self) -> Result<Option<Req>, Status> {
        self.inbound.next().await.transpose()
    }

    async fn send(&mut self, message: Resp) -> Result<(), Status> {
        self.outbound
            .send(Ok(message))
            .await
            .map_err(|_| Status::cancelled("response stream receiver dropped"))
    }

    fn response_header_mut(&mut self) -> &mut MetadataMap {
        &mut self.response_header
    }

    fn response_trailer_mut(&mut self) -> &mut MetadataMap {
        &mut self.response_trailer
    }
}
