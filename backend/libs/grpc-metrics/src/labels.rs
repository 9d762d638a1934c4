//! Label derivation: call type, service/method, and result code

use std::error::Error;
use std::io;

use futures::future::Aborted;
use tonic::{Code, Status};

use crate::spec::StreamType;

/// Result code recorded for calls that returned no error
pub const CODE_OK: &str = "ok";

/// Sentinel used for identifiers and shapes we cannot make sense of
pub const UNKNOWN: &str = "unknown";

/// Value of the `type` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallType {
    Unary,
    ClientStream,
    ServerStream,
    Bidi,
    Unknown,
}

impl CallType {
    pub fn as_str(self) -> &'static str {
        match self {
            CallType::Unary => "unary",
            CallType::ClientStream => "client_stream",
            CallType::ServerStream => "server_stream",
            CallType::Bidi => "bidi",
            CallType::Unknown => UNKNOWN,
        }
    }
}

impl From<StreamType> for CallType {
    fn from(stream_type: StreamType) -> Self {
        match stream_type {
            StreamType::UNARY => CallType::Unary,
            StreamType::CLIENT => CallType::ClientStream,
            StreamType::SERVER => CallType::ServerStream,
            StreamType::BIDI => CallType::Bidi,
            _ => CallType::Unknown,
        }
    }
}

impl std::fmt::Display for CallType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split `/<service>/<method>` into its parts.
///
/// One leading `/` is stripped and the rest is split on the first `/`.
/// Anything without a separator yields `("unknown", "unknown")`.
pub fn procedure_to_service_and_method(procedure: &str) -> (&str, &str) {
    let procedure = procedure.strip_prefix('/').unwrap_or(procedure);
    procedure.split_once('/').unwrap_or((UNKNOWN, UNKNOWN))
}

/// Snake-case name of a status code.
pub fn code_name(code: Code) -> &'static str {
    match code {
        Code::Ok => CODE_OK,
        Code::Cancelled => "canceled",
        Code::Unknown => UNKNOWN,
        Code::InvalidArgument => "invalid_argument",
        Code::DeadlineExceeded => "deadline_exceeded",
        Code::NotFound => "not_found",
        Code::AlreadyExists => "already_exists",
        Code::PermissionDenied => "permission_denied",
        Code::ResourceExhausted => "resource_exhausted",
        Code::FailedPrecondition => "failed_precondition",
        Code::Aborted => "aborted",
        Code::OutOfRange => "out_of_range",
        Code::Unimplemented => "unimplemented",
        Code::Internal => "internal",
        Code::Unavailable => "unavailable",
        Code::DataLoss => "data_loss",
        Code::Unauthenticated => "unauthenticated",
    }
}

/// Result code for a call outcome.
///
/// `None` is `"ok"`. A status classified as `Unknown` is refined by walking
/// its source chain for a cancellation or an expired deadline.
pub fn code_of(err: Option<&Status>) -> &'static str {
    let Some(status) = err else {
        return CODE_OK;
    };

    match status.code() {
        Code::Unknown => code_name(reclassify_unknown(status)),
        code => code_name(code),
    }
}

fn reclassify_unknown(status: &Status) -> Code {
    if any_cause(status, is_cancellation) {
        Code::Cancelled
    } else if any_cause(status, is_deadline) {
        Code::DeadlineExceeded
    } else {
        Code::Unknown
    }
}

fn any_cause(status: &Status, predicate: fn(&(dyn Error + 'static)) -> bool) -> bool {
    let mut source = status.source();
    while let Some(err) = source {
        if predicate(err) {
            return true;
        }
        source = err.source();
    }
    false
}

fn is_cancellation(err: &(dyn Error + 'static)) -> bool {
    if let Some(status) = err.downcast_ref::<Status>() {
        return status.code() == Code::Cancelled;
    }
    if let Some(join) = err.downcast_ref::<tokio::task::JoinError>() {
        return join.is_cancelled();
    }
    err.is::<Aborted>()
}

fn is_deadline(err: &(dyn Error + 'static)) -> bool {
    if let Some(status) = err.downcast_ref::<Status>() {
        return status.code() == Code::DeadlineExceeded;
    }
    if let Some(io) = err.downcast_ref::<io::Error>() {
        return io.kind() == io::ErrorKind::TimedOut;
    }
    err.is::<tokio::time::error::Elapsed>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn unknown_caused_by(cause: impl Error + Send + Sync + 'static) -> Status {
        let mut status = Status::unknown(cause.to_string());
        status.set_source(Arc::new(cause));
        status
    }

    #[test]
    fn test_procedure_split() {
        assert_eq!(procedure_to_service_and_method("/a/b"), ("a", "b"));
        assert_eq!(
            procedure_to_service_and_method("/greet.v1.GreetService/Greet"),
            ("greet.v1.GreetService", "Greet")
        );
        assert_eq!(procedure_to_service_and_method("a/b"), ("a", "b"));
        assert_eq!(procedure_to_service_and_method("/a/b/c"), ("a", "b/c"));
    }

    #[test]
    fn test_procedure_without_separator() {
        assert_eq!(procedure_to_service_and_method(""), (UNKNOWN, UNKNOWN));
        assert_eq!(procedure_to_service_and_method("/"), (UNKNOWN, UNKNOWN));
        assert_eq!(procedure_to_service_and_method("/Greet"), (UNKNOWN, UNKNOWN));
    }

    #[test]
    fn test_call_type_from_stream_type() {
        assert_eq!(CallType::from(StreamType::UNARY).as_str(), "unary");
        assert_eq!(CallType::from(StreamType::CLIENT).as_str(), "client_stream");
        assert_eq!(CallType::from(StreamType::SERVER).as_str(), "server_stream");
        assert_eq!(CallType::from(StreamType::BIDI).as_str(), "bidi");
        assert_eq!(CallType::from(StreamType::from_bits(9)), CallType::Unknown);
    }

    #[test]
    fn test_code_of_success() {
        assert_eq!(code_of(None), "ok");
    }

    #[test]
    fn test_code_of_classified_status() {
        assert_eq!(code_of(Some(&Status::unimplemented("nope"))), "unimplemented");
        assert_eq!(code_of(Some(&Status::cancelled("gone"))), "canceled");
        assert_eq!(code_of(Some(&Status::aborted("conflict"))), "aborted");
        assert_eq!(code_of(Some(&Status::unknown("plain"))), "unknown");
    }

    #[test]
    fn test_unknown_with_timed_out_cause_is_deadline() {
        let status = unknown_caused_by(io::Error::new(io::ErrorKind::TimedOut, "upstream deadline"));

        assert_eq!(status.code(), Code::Unknown);
        assert_eq!(code_of(Some(&status)), "deadline_exceeded");
    }

    #[test]
    fn test_unknown_with_aborted_cause_is_canceled() {
        let status = unknown_caused_by(Aborted);

        assert_eq!(code_of(Some(&status)), "canceled");
    }

    #[tokio::test]
    async fn test_unknown_with_elapsed_cause_is_deadline() {
        let elapsed = tokio::time::timeout(Duration::from_millis(1), futures::future::pending::<()>())
            .await
            .unwrap_err();
        let status = unknown_caused_by(elapsed);

        assert_eq!(code_of(Some(&status)), "deadline_exceeded");
    }

    #[test]
    fn test_unknown_with_nested_status_cause() {
        let status = unknown_caused_by(Status::deadline_exceeded("inner"));
        assert_eq!(code_of(Some(&status)), "deadline_exceeded");

        let status = unknown_caused_by(Status::cancelled("inner"));
        assert_eq!(code_of(Some(&status)), "canceled");
    }

    #[test]
    fn test_unknown_with_unrelated_cause_stays_unknown() {
        let status = unknown_caused_by(io::Error::new(io::ErrorKind::BrokenPipe, "reset"));

        assert_eq!(code_of(Some(&status)), "unknown");
    }
}
