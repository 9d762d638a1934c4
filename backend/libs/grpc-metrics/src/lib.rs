//! # Prometheus metrics for RPC clients and servers
//!
//! Records the lifecycle of every RPC that passes through the interceptor:
//! calls started, calls handled (labelled with the result code), optional
//! latency histograms and per-message counts for streaming calls. Client and
//! server sides keep separate collectors.
//!
//! ## Metrics
//!
//! | name | type | labels |
//! |------|------|--------|
//! | `connect_{side}_started_total` | counter | type, service, method |
//! | `connect_{side}_handled_total` | counter | type, service, method, code |
//! | `connect_{side}_handled_seconds` | histogram (opt-in) | type, service, method, code |
//! | `connect_{side}_msg_sent_total` | counter | type, service, method |
//! | `connect_{side}_msg_received_total` | counter | type, service, method |
//!
//! `{side}` is `client` or `server`. Namespace and subsystem prefixes are
//! applied Prometheus-style (`namespace_subsystem_name`).
//!
//! ## Components
//!
//! - **Metrics**: one side's collector, registrable into any `prometheus::Registry`
//! - **MetricsInterceptor**: wraps unary calls and both ends of streaming calls
//! - **GrpcMetricsLayer**: tower layer for the HTTP stack of a tonic server
//! - **ChannelClientConn / ChannelHandlerConn**: adapters from tonic streams to conns
//!
//! ## Example
//!
//! ```rust,no_run
//! use grpc_metrics::{Metrics, MetricsInterceptor, MetricsOptions};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = prometheus::Registry::new();
//! let options = MetricsOptions::from_env().with_histogram(true);
//!
//! let server_metrics = Metrics::server(options)?;
//! server_metrics.register(&registry)?;
//!
//! let interceptor = MetricsInterceptor::builder()
//!     .with_server_metrics(Some(server_metrics))
//!     .with_client_metrics(None)
//!     .build();
//!
//! // tonic::transport::Server::builder().layer(interceptor.layer())
//! # let _ = interceptor;
//! # Ok(())
//! # }
//! ```

mod conn;
mod error;
mod interceptor;
mod labels;
mod layer;
mod metrics;
mod options;
mod spec;
mod stream;
mod tracker;

pub use conn::{InstrumentedClientConn, InstrumentedHandlerConn};
pub use error::{MetricsError, Result};
pub use interceptor::{MetricsInterceptor, MetricsInterceptorBuilder};
pub use labels::{code_name, code_of, procedure_to_service_and_method, CallType, CODE_OK, UNKNOWN};
pub use layer::{GrpcMetricsFuture, GrpcMetricsLayer, GrpcMetricsService};
pub use metrics::{default_client_metrics, default_server_metrics, Metrics, Side};
pub use options::{MetricNames, MetricsOptions};
pub use spec::{Spec, StreamType, StreamingClientConn, StreamingHandlerConn};
pub use stream::{ChannelClientConn, ChannelHandlerConn};

// Re-export for convenience
pub use tonic::Status;
