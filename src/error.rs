//! The `DispatchError` hierarchy applications raise from registered functions:
//! a single enum with one variant per error kind, each pinned to a fixed
//! [`Status`] and registered with [`crate::status::status_for_error`].

use crate::status::Status;

/// Errors a registered function may return, each pre-classified with a [`Status`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("operation was throttled: {0}")]
    Throttled(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("temporary error: {0}")]
    Temporary(String),

    #[error("permanent error: {0}")]
    Permanent(String),

    #[error("incompatible coroutine state: {0}")]
    IncompatibleState(String),

    #[error("DNS error: {0}")]
    Dns(String),

    #[error("TCP error: {0}")]
    Tcp(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl DispatchError {
    /// The [`Status`] this error variant is pinned to.
    pub fn status(&self) -> Status {
        match self {
            DispatchError::Timeout(_) => Status::Timeout,
            DispatchError::Throttled(_) => Status::Throttled,
            DispatchError::InvalidArgument(_) => Status::InvalidArgument,
            DispatchError::InvalidResponse(_) => Status::InvalidResponse,
            DispatchError::Temporary(_) => Status::TemporaryError,
            DispatchError::Permanent(_) => Status::PermanentError,
            DispatchError::IncompatibleState(_) => Status::IncompatibleState,
            DispatchError::Dns(_) => Status::DnsError,
            DispatchError::Tcp(_) => Status::TcpError,
            DispatchError::Tls(_) => Status::TlsError,
            DispatchError::Http(_) => Status::HttpError,
            DispatchError::Unauthenticated(_) => Status::Unauthenticated,
            DispatchError::PermissionDenied(_) => Status::PermissionDenied,
            DispatchError::NotFound(_) => Status::NotFound,
        }
    }
}

/// Consulted by [`crate::status::status_for_error`] before falling back to
/// the standard exception-shape heuristics. Returns `None` for errors that
/// are not a [`DispatchError`], so the lookup falls through to the default
/// classification.
pub(crate) fn dispatch_error_status(error: &(dyn std::error::Error + 'static)) -> Option<Status> {
    error
        .downcast_ref::<DispatchError>()
        .map(DispatchError::status)
}

/// Maps a wire [`crate::proto::Error`] — the status a nested call or
/// combinator child actually failed with — onto the matching fixed
/// `DispatchError` variant, so `?` on `Context::call`/`all`/`any`/`race`
/// preserves that status instead of every propagation point re-raising it
/// as `Temporary` (spec.md §7: "A child's error reaches the parent as the
/// same error value (preserved type + message)"). Mirrors
/// `client.rs`'s `From<tonic::Status> for DispatchError`, which does the
/// same status-preserving mapping for the gRPC-transport case.
impl From<crate::proto::Error> for DispatchError {
    fn from(error: crate::proto::Error) -> DispatchError {
        let message = format!("{}: {}", error.r#type, error.message);
        match error.status {
            Status::Timeout => DispatchError::Timeout(message),
            Status::Throttled => DispatchError::Throttled(message),
            Status::InvalidArgument => DispatchError::InvalidArgument(message),
            Status::InvalidResponse => DispatchError::InvalidResponse(message),
            Status::TemporaryError => DispatchError::Temporary(message),
            Status::IncompatibleState => DispatchError::IncompatibleState(message),
            Status::DnsError => DispatchError::Dns(message),
            Status::TcpError => DispatchError::Tcp(message),
            Status::TlsError => DispatchError::Tls(message),
            Status::HttpError => DispatchError::Http(message),
            Status::Unauthenticated => DispatchError::Unauthenticated(message),
            Status::PermissionDenied => DispatchError::PermissionDenied(message),
            Status::NotFound => DispatchError::NotFound(message),
            // `Ok`/`Unspecified` never label an actual error in practice
            // (the wire envelope only carries an `Error` alongside a
            // failing status); treat either as an unclassified fatal error
            // rather than silently picking a retryable bucket for them.
            Status::Ok | Status::Unspecified | Status::PermanentError => {
                DispatchError::Permanent(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_variant_maps_to_its_pinned_status() {
        assert_eq!(DispatchError::Timeout("x".into()).status(), Status::Timeout);
        assert_eq!(
            DispatchError::PermissionDenied("x".into()).status(),
            Status::PermissionDenied
        );
        assert_eq!(
            DispatchError::IncompatibleState("x".into()).status(),
            Status::IncompatibleState
        );
    }

    #[test]
    fn from_proto_error_preserves_status_instead_of_downgrading_to_temporary() {
        let wire = crate::proto::Error::new(Status::PermanentError, "Boom", "third call failed");
        let err: DispatchError = wire.into();
        assert_eq!(err.status(), Status::PermanentError);
        assert!(err.to_string().contains("third call failed"));
    }

    #[test]
    fn status_for_error_recognizes_dispatch_error() {
        let err = DispatchError::NotFound("widget".into());
        let dyn_err: &(dyn std::error::Error + 'static) = &err;
        assert_eq!(
            crate::status::status_for_error(dyn_err),
            Status::NotFound
        );
    }
}
