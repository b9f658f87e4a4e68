//! Ergonomic wrappers around the generated `dispatch.sdk.v1` protobuf types:
//! `Input`, `Output`, `Call`, `CallResult` and `Error` are thin, mostly
//! read-only wrappers that provide safeguards and ergonomics around the raw
//! wire messages.

use crate::pb;
use crate::status::{status_for_error, status_for_output, Status};
use crate::value::{self, Value};

/// The input to a primitive function (C8's entry point).
///
/// A function always receives one [`Input`]: on first invocation it carries
/// the user-visible argument payload; on resume it carries the accumulated
/// call results (and possibly a poll-level error) for an in-flight
/// coroutine tree. Use [`Input::is_first_call`] / [`Input::is_resume`] to
/// discriminate.
#[derive(Debug)]
pub enum Input {
    FirstCall {
        input: Value,
    },
    Resume {
        coroutine_state: Vec<u8>,
        call_results: Vec<CallResult>,
        poll_error: Option<Error>,
    },
}

impl Input {
    pub fn is_first_call(&self) -> bool {
        matches!(self, Input::FirstCall { .. })
    }

    pub fn is_resume(&self) -> bool {
        !self.is_first_call()
    }

    /// Decode this request out of the wire `RunRequest`.
    pub fn from_request(req: &pb::RunRequest) -> Result<Input, ProtoError> {
        if let Some(any) = &req.input {
            return Ok(Input::FirstCall {
                input: unpack_value(any),
            });
        }
        let poll_result = req
            .poll_result
            .as_ref()
            .ok_or(ProtoError::MissingOneOf("input or poll_result"))?;
        let call_results = poll_result
            .results
            .iter()
            .map(CallResult::from_proto)
            .collect::<Result<_, _>>()?;
        let poll_error = poll_result.error.as_ref().map(Error::from_proto);
        Ok(Input::Resume {
            coroutine_state: poll_result.coroutine_state.clone(),
            call_results,
            poll_error,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("RunRequest is missing {0}")]
    MissingOneOf(&'static str),
    #[error(transparent)]
    Codec(#[from] value::CodecError),
}

/// The output of a primitive function: either a terminal exit or a poll
/// directive. Build with [`Output::value`], [`Output::error`],
/// [`Output::tail_call`] or [`Output::poll`].
#[derive(Debug)]
pub struct Output {
    pub message: pb::RunResponse,
}

impl Output {
    /// Terminally exit the function with the provided return value.
    pub fn value<T: serde::Serialize>(value: &T) -> Result<Output, value::CodecError> {
        let status = status_for_output(value);
        let encoded = value::encode(value)?;
        Ok(Self::exit(Some(CallResult::from_value(encoded)), None, status))
    }

    /// Terminally exit the function with an already-encoded return value.
    /// Used by the scheduler, which only ever holds a coroutine's result as
    /// an opaque [`Value`] (the concrete Rust type was erased when the
    /// registered function encoded it). Always reports `OK`; a function
    /// wanting a different status for a successful-looking return should
    /// raise a [`crate::error::DispatchError`] instead.
    pub fn exit_value(value: Value) -> Output {
        Self::exit(Some(CallResult::from_value(value)), None, Status::Ok)
    }

    /// Terminally exit the function with the provided error.
    pub fn error(error: Error) -> Output {
        let status = error.status;
        Self::exit(Some(CallResult::from_error(error)), None, status)
    }

    /// Terminally exit the function, instructing the orchestrator to tail
    /// call the specified function instead of returning to the caller.
    pub fn tail_call(tail_call: Call) -> Output {
        Self::exit(None, Some(tail_call), Status::Ok)
    }

    fn exit(result: Option<CallResult>, tail_call: Option<Call>, status: Status) -> Output {
        Output {
            message: pb::RunResponse {
                status: status_to_i32(status),
                directive: Some(pb::run_response::Directive::Exit(pb::Exit {
                    result: result.map(|r| r.as_proto()),
                    tail_call: tail_call.map(|c| c.as_proto()),
                })),
            },
        }
    }

    /// Suspend the function with a set of calls, instructing the
    /// orchestrator to resume the function with `state` once results arrive.
    pub fn poll(
        state: Vec<u8>,
        calls: Vec<Call>,
        min_results: u32,
        max_results: u32,
        max_wait_seconds: Option<u32>,
    ) -> Output {
        Output {
            message: pb::RunResponse {
                status: status_to_i32(Status::Ok),
                directive: Some(pb::run_response::Directive::Poll(pb::Poll {
                    coroutine_state: state,
                    calls: calls.into_iter().map(Call::as_proto).collect(),
                    min_results,
                    max_results,
                    max_wait_seconds,
                })),
            },
        }
    }
}

/// Instruction to call a function. Though this type can be built manually, it
/// is normally produced by the scheduler from a coroutine's `Call` directive.
#[derive(Debug, Clone)]
pub struct Call {
    pub function: String,
    pub input: Value,
    pub endpoint: Option<String>,
    pub correlation_id: Option<u64>,
}

impl Call {
    pub fn as_proto(self) -> pb::Call {
        pb::Call {
            correlation_id: self.correlation_id,
            endpoint: self.endpoint,
            function: self.function,
            input: Some(pack_value(&self.input)),
            expiration_seconds: None,
        }
    }

    /// Inverse of [`Call::as_proto`], used by callers that resolve a poll's
    /// outgoing calls in-process instead of over the wire (see
    /// [`crate::testing`]).
    pub fn from_proto(proto: pb::Call) -> Call {
        Call {
            function: proto.function,
            input: proto.input.map(|a| unpack_value(&a)).unwrap_or_else(|| Value {
                type_url: String::new(),
                bytes: Vec::new(),
            }),
            endpoint: proto.endpoint,
            correlation_id: proto.correlation_id,
        }
    }
}

/// Result of a [`Call`].
#[derive(Debug, Clone)]
pub struct CallResult {
    pub correlation_id: Option<u64>,
    pub output: Option<Value>,
    pub error: Option<Error>,
}

impl CallResult {
    pub fn from_value(output: Value) -> CallResult {
        CallResult {
            correlation_id: None,
            output: Some(output),
            error: None,
        }
    }

    pub fn from_error(error: Error) -> CallResult {
        CallResult {
            correlation_id: None,
            output: None,
            error: Some(error),
        }
    }

    pub fn as_proto(&self) -> pb::CallResult {
        pb::CallResult {
            correlation_id: self.correlation_id,
            output: self.output.as_ref().map(pack_value),
            error: self.error.as_ref().map(Error::as_proto),
            dispatch_id: None,
        }
    }

    pub fn from_proto(proto: &pb::CallResult) -> Result<CallResult, ProtoError> {
        Ok(CallResult {
            correlation_id: proto.correlation_id,
            output: proto.output.as_ref().map(unpack_value),
            error: proto.error.as_ref().map(Error::from_proto),
        })
    }
}

/// Error when running a function. Not a Rust [`std::error::Error`] itself —
/// it is the wire representation carried in a [`CallResult`] or [`Output`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Error {
    pub status: Status,
    pub r#type: String,
    pub message: String,
}

impl Error {
    pub fn new(status: Status, r#type: impl Into<String>, message: impl Into<String>) -> Error {
        Error {
            status,
            r#type: r#type.into(),
            message: message.into(),
        }
    }

    /// Build an [`Error`] from a Rust error, deriving its [`Status`] via
    /// [`status_for_error`] unless overridden.
    pub fn from_std_error(err: &(dyn std::error::Error + 'static), status: Option<Status>) -> Error {
        let status = status.unwrap_or_else(|| status_for_error(err));
        Error::new(status, std::any::type_name_of_val(err), err.to_string())
    }

    pub fn as_proto(&self) -> pb::Error {
        pb::Error {
            r#type: self.r#type.clone(),
            message: self.message.clone(),
        }
    }

    pub fn from_proto(proto: &pb::Error) -> Error {
        Error {
            status: Status::Unspecified,
            r#type: proto.r#type.clone(),
            message: proto.message.clone(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.r#type, self.message)
    }
}

impl std::error::Error for Error {}

fn status_to_i32(status: Status) -> i32 {
    status as i32
}

fn pack_value(value: &Value) -> prost_types::Any {
    prost_types::Any {
        type_url: value.type_url.clone(),
        value: value.bytes.clone(),
    }
}

fn unpack_value(any: &prost_types::Any) -> Value {
    Value {
        type_url: any.type_url.clone(),
        bytes: any.value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_value_round_trips_through_call_result() {
        let output = Output::value(&42i64).unwrap();
        match output.message.directive {
            Some(pb::run_response::Directive::Exit(exit)) => {
                let result = exit.result.expect("exit carries a result");
                let any = result.output.expect("result carries an output Any");
                let value = unpack_value(&any);
                let decoded: i64 = crate::value::decode(&value).unwrap();
                assert_eq!(decoded, 42);
            }
            _ => panic!("expected an exit directive"),
        }
        assert_eq!(output.message.status, Status::Ok as i32);
    }

    #[test]
    fn output_error_carries_its_status() {
        let err = Error::new(Status::NotFound, "NotFoundError", "widget missing");
        let output = Output::error(err);
        assert_eq!(output.message.status, Status::NotFound as i32);
    }
}
