//! Call metadata and streaming conn traits supplied by the host RPC stack
//!
//! The interceptor never talks to a transport directly. The host hands it a
//! [`Spec`] per call and, for streaming calls, an object implementing
//! [`StreamingClientConn`] or [`StreamingHandlerConn`].

use async_trait::async_trait;
use tonic::metadata::MetadataMap;
use tonic::Status;

/// Shape of an RPC as described by the host framework.
///
/// Bit 0 is set when the client streams, bit 1 when the server streams.
/// Values outside the four known shapes are representable on purpose: they
/// come from the wire and are labelled `unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamType(u8);

impl StreamType {
    pub const UNARY: StreamType = StreamType(0b00);
    pub const CLIENT: StreamType = StreamType(0b01);
    pub const SERVER: StreamType = StreamType(0b10);
    pub const BIDI: StreamType = StreamType(0b11);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// Per-call metadata handed over by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spec {
    /// Routable identifier, `/<service>/<method>`
    pub procedure: String,
    pub stream_type: StreamType,
    /// True when the call is being made, false when it is being handled
    pub is_client: bool,
}

impl Spec {
    pub fn new(procedure: impl Into<String>, stream_type: StreamType, is_client: bool) -> Self {
        Self {
            procedure: procedure.into(),
            stream_type,
            is_client,
        }
    }

    pub fn client(procedure: impl Into<String>, stream_type: StreamType) -> Self {
        Self::new(procedure, stream_type, true)
    }

    pub fn server(procedure: impl Into<String>, stream_type: StreamType) -> Self {
        Self::new(procedure, stream_type, false)
    }
}

/// Caller side of a streaming RPC.
#[async_trait]
pub trait StreamingClientConn: Send {
    type Request: Send + 'static;
    type Response: Send + 'static;

    fn spec(&self) -> &Spec;

    fn request_header(&self) -> &MetadataMap;

    async fn send(&mut self, message: Self::Request) -> Result<(), Status>;

    async fn close_request(&mut self) -> Result<(), Status>;

    /// `Ok(None)` marks a clean end of the response stream.
    async fn receive(&mut self) -> Result<Option<Self::Response>, Status>;

    fn response_header(&self) -> &MetadataMap;

    fn response_trailer(&self) -> &MetadataMap;

    /// Terminal point of the call on the caller side.
    async fn close_response(&mut self) -> Result<(), Status>;
}

/// Handler side of a streaming RPC.
#[async_trait]
pub trait StreamingHandlerConn: Send {
    type Request: Send + 'static;
    type Response: Send + 'static;

    fn spec(&self) -> &Spec;

    fn request_header(&self) -> &MetadataMap;

    /// `Ok(None)` marks a clean end of the request stream.
    async fn receive(&mut self) -> Result<Option<Self::Request>, Status>;

    async fn send(&mut self, message: Self::Response) -> Result<(), Status>;

    fn response_header_mut(&mut self) -> &mut MetadataMap;

    fn response_trailer_mut(&mut self) -> &mut MetadataMap;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_type_bits() {
        assert_eq!(StreamType::CLIENT.bits() | StreamType::SERVER.bits(), StreamType::BIDI.bits());
        assert_eq!(StreamType::from_bits(2), StreamType::SERVER);
        assert_ne!(StreamType::from_bits(7), StreamType::BIDI);
    }

    #[test]
    fn test_spec_constructors() {
        let spec = Spec::client("/greet.v1.GreetService/Greet", StreamType::UNARY);
        assert!(spec.is_client);
        assert_eq!(spec.procedure, "/greet.v1.GreetService/Greet");

        let spec = Spec::server("/greet.v1.GreetService/Chat", StreamType::BIDI);
        assert!(!spec.is_client);
        assert_eq!(spec.stream_type, StreamType::BIDI);
    }
}
