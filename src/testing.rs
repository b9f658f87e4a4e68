//! C12 — an in-process test harness, grounded in
//! `examples/original_source/src/dispatch/test/service.py`'s `DispatchService`
//! and `test/client.py`'s `EndpointClient`.
//!
//! The Python pair talks real gRPC/HTTP over a loopback `httpx` client; here
//! there is no wire to cross (the scheduler already speaks [`Output`] and
//! [`Input`] directly), so [`TestDispatcher`] plays both roles at once: it
//! drains a queue of pending [`Call`]s by invoking the target function's own
//! [`Scheduler`] in-process, feeding the resulting [`CallResult`]s back into
//! the caller's next round, exactly as `dispatch_calls` drives `endpoint_client.run`
//! in a loop — minus the network hop, since both sides share one [`Registry`].

use std::collections::{HashSet, VecDeque};

use crate::proto::{Call, CallResult, Error, Input, Output};
use crate::registry::Registry;
use crate::scheduler::Scheduler;
use crate::status::Status;
use crate::value::{self, Value};

/// The statuses retried automatically, mirroring `service.py`'s
/// `_default_retry_on_status`.
fn default_retry_on_status() -> HashSet<Status> {
    [
        Status::Throttled,
        Status::Timeout,
        Status::TemporaryError,
        Status::DnsError,
        Status::TcpError,
        Status::TlsError,
        Status::HttpError,
    ]
    .into_iter()
    .collect()
}

/// A request/response pair recorded against an invoked function when
/// [`TestDispatcher::collect_roundtrips`] is enabled.
#[derive(Debug)]
pub struct RoundTrip {
    pub function: String,
    pub input: Input,
    pub output: Output,
}

/// Why a [`TestDispatcher::run_to_completion`] call gave up before the
/// coroutine tree settled.
#[derive(Debug, thiserror::Error)]
pub enum TestDispatchError {
    #[error("coroutine tree did not settle within {0} round(s)")]
    TooManyRounds(usize),
    #[error("poll named an unregistered function: '{0}'")]
    UnknownFunction(String),
}

/// The outcome of driving a coroutine tree to completion: either the
/// function's own terminal error, or a harness-level failure to settle it.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Function(#[from] Error),
    #[error(transparent)]
    Harness(#[from] TestDispatchError),
}

/// Drives a registered function to completion without a real network hop,
/// resolving every outgoing [`Call`] by invoking the named function's own
/// [`Scheduler`] against the same [`Registry`] — grounded in `DispatchService`
/// queuing calls for `dispatch_calls` to replay against an `EndpointClient`,
/// collapsed here into one process since both sides share one registry.
pub struct TestDispatcher<'r> {
    registry: &'r Registry,
    retry_on_status: HashSet<Status>,
    max_rounds: usize,
    roundtrips: Option<Vec<RoundTrip>>,
}

impl<'r> TestDispatcher<'r> {
    pub fn new(registry: &'r Registry) -> TestDispatcher<'r> {
        TestDispatcher {
            registry,
            retry_on_status: default_retry_on_status(),
            max_rounds: 10_000,
            roundtrips: None,
        }
    }

    pub fn with_retry_on_status(mut self, statuses: HashSet<Status>) -> TestDispatcher<'r> {
        self.retry_on_status = statuses;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> TestDispatcher<'r> {
        self.max_rounds = max_rounds;
        self
    }

    /// Enable collection of request/response round-trips against every
    /// function this dispatcher drives, mirroring `collect_roundtrips`.
    pub fn collect_roundtrips(mut self) -> TestDispatcher<'r> {
        self.roundtrips = Some(Vec::new());
        self
    }

    pub fn roundtrips(&self) -> &[RoundTrip] {
        self.roundtrips.as_deref().unwrap_or(&[])
    }

    /// Run `function(input)` to completion, returning its terminal value or
    /// error. Every call the coroutine tree makes to another registered
    /// function is resolved in-process, to arbitrary recursion depth; a poll
    /// naming a function this dispatcher's registry doesn't have is reported
    /// as [`TestDispatchError::UnknownFunction`] rather than attempted over
    /// the network.
    pub fn run_to_completion(&mut self, function: &str, input: Value) -> Result<Value, RunError> {
        let result = self.settle(function, Input::FirstCall { input })?;
        match result.error {
            Some(err) => Err(RunError::Function(err)),
            None => Ok(result.output.unwrap_or_else(unit_value)),
        }
    }

    /// Drive `function` from `next_input` through as many rounds as it takes
    /// to reach a terminal [`CallResult`] — resolving every nested call it
    /// makes along the way by recursing into this same method, so a call
    /// that itself suspends (e.g. a recursive divide-and-conquer function
    /// like a distributed merge sort) is driven to completion rather than
    /// requeued unresolved. The target's own terminal error comes back as
    /// part of the `CallResult` instead of being raised here, so the caller
    /// one level up — `settle` itself, when resolving a poll's calls — can
    /// apply `retry_on_status` to it exactly as `dispatch_calls` retries a
    /// call whose result carried a retryable status.
    fn settle(&mut self, function: &str, mut next_input: Input) -> Result<CallResult, RunError> {
        if !self.registry.contains(function) {
            return Err(RunError::Harness(TestDispatchError::UnknownFunction(
                function.to_string(),
            )));
        }

        for round in 0..self.max_rounds {
            let output = self.invoke(function, next_input);

            match exit_of(&output) {
                Some(ExitKind::Result(result)) => return Ok(result),
                Some(ExitKind::TailCall(tail_call)) => {
                    let correlation_id = tail_call.correlation_id;
                    let mut result =
                        self.settle(&tail_call.function, Input::FirstCall { input: tail_call.input })?;
                    result.correlation_id = correlation_id;
                    return Ok(result);
                }
                None => {}
            }

            let Some(poll) = poll_of(output) else {
                return Err(RunError::Harness(TestDispatchError::UnknownFunction(
                    "response carried neither an exit nor a poll directive".into(),
                )));
            };

            let calls: VecDeque<Call> = poll.calls.into_iter().map(Call::from_proto).collect();
            let mut results = Vec::with_capacity(calls.len());

            for call in calls {
                let correlation_id = call.correlation_id;
                let mut resolved = None;
                for _ in 0..self.max_rounds {
                    let candidate = self.settle(&call.function, Input::FirstCall { input: call.input.clone() })?;
                    let status = candidate.error.as_ref().map(|e| e.status).unwrap_or(Status::Ok);
                    if candidate.error.is_some() && self.retry_on_status.contains(&status) {
                        continue;
                    }
                    resolved = Some(candidate);
                    break;
                }
                let mut result = resolved
                    .ok_or(RunError::Harness(TestDispatchError::TooManyRounds(self.max_rounds)))?;
                result.correlation_id = correlation_id;
                results.push(result);
            }

            next_input = Input::Resume {
                coroutine_state: poll.coroutine_state,
                call_results: results,
                poll_error: None,
            };

            if round + 1 == self.max_rounds {
                break;
            }
        }
        Err(RunError::Harness(TestDispatchError::TooManyRounds(self.max_rounds)))
    }

    fn invoke(&mut self, function: &str, input: Input) -> Output {
        let scheduler = Scheduler::new(self.registry, function);
        let recorded_input = self.roundtrips.is_some().then(|| clone_input(&input));
        let output = scheduler.run(input);

        if let Some(roundtrips) = self.roundtrips.as_mut() {
            roundtrips.push(RoundTrip {
                function: function.to_string(),
                input: recorded_input.unwrap(),
                output: Output { message: output.message.clone() },
            });
        }
        output
    }
}

enum ExitKind {
    Result(CallResult),
    TailCall(Call),
}

fn exit_of(output: &Output) -> Option<ExitKind> {
    match &output.message.directive {
        Some(crate::pb::run_response::Directive::Exit(exit)) => {
            if let Some(result) = &exit.result {
                return Some(ExitKind::Result(
                    CallResult::from_proto(result).unwrap_or_else(|e| CallResult {
                        correlation_id: None,
                        output: None,
                        error: Some(Error::new(
                            Status::InvalidResponse,
                            "InvalidResponse",
                            e.to_string(),
                        )),
                    }),
                ));
            }
            if let Some(tail_call) = &exit.tail_call {
                return Some(ExitKind::TailCall(Call {
                    function: tail_call.function.clone(),
                    input: tail_call
                        .input
                        .as_ref()
                        .map(|any| Value { type_url: any.type_url.clone(), bytes: any.value.clone() })
                        .unwrap_or_else(unit_value),
                    endpoint: tail_call.endpoint.clone(),
                    correlation_id: tail_call.correlation_id,
                }));
            }
            Some(ExitKind::Result(CallResult {
                correlation_id: None,
                output: None,
                error: Some(Error::new(
                    Status::InvalidResponse,
                    "InvalidResponse",
                    "exit carried neither a result nor a tail call",
                )),
            }))
        }
        _ => None,
    }
}

fn poll_of(output: Output) -> Option<crate::pb::Poll> {
    match output.message.directive {
        Some(crate::pb::run_response::Directive::Poll(poll)) => Some(poll),
        _ => None,
    }
}

fn unit_value() -> Value {
    value::encode(&()).expect("unit always encodes")
}

fn clone_input(input: &Input) -> Input {
    match input {
        Input::FirstCall { input } => Input::FirstCall { input: input.clone() },
        Input::Resume { coroutine_state, call_results, poll_error } => Input::Resume {
            coroutine_state: coroutine_state.clone(),
            call_results: call_results.clone(),
            poll_error: poll_error.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Context;

    #[test]
    fn identity_function_resolves_in_one_round() {
        let registry = Registry::new("http://localhost:0");
        registry
            .register("identity", |_ctx: Context, input: String| async move {
                Ok::<_, crate::error::DispatchError>(input)
            })
            .unwrap();

        let mut dispatcher = TestDispatcher::new(&registry);
        let input = value::encode(&"hello".to_string()).unwrap();
        let output = dispatcher.run_to_completion("identity", input).unwrap();
        let decoded: String = value::decode(&output).unwrap();
        assert_eq!(decoded, "hello");
    }

    #[test]
    fn a_call_to_another_registered_function_resolves_without_a_network_hop() {
        let registry = Registry::new("http://localhost:0");
        registry
            .register("double", |_ctx: Context, input: i64| async move {
                Ok::<_, crate::error::DispatchError>(input * 2)
            })
            .unwrap();
        registry
            .register("quadruple", |ctx: Context, input: i64| async move {
                let doubled: i64 = ctx.call("double", &input).await?;
                let result: i64 = ctx.call("double", &doubled).await?;
                Ok::<_, crate::error::DispatchError>(result)
            })
            .unwrap();

        let mut dispatcher = TestDispatcher::new(&registry);
        let input = value::encode(&5i64).unwrap();
        let output = dispatcher.run_to_completion("quadruple", input).unwrap();
        let decoded: i64 = value::decode(&output).unwrap();
        assert_eq!(decoded, 20);
    }

    #[test]
    fn unregistered_target_is_reported_rather_than_dialed() {
        let registry = Registry::new("http://localhost:0");
        registry
            .register("caller", |ctx: Context, input: i64| async move {
                let _: i64 = ctx.call("missing", &input).await?;
                Ok::<_, crate::error::DispatchError>(input)
            })
            .unwrap();

        let mut dispatcher = TestDispatcher::new(&registry);
        let input = value::encode(&1i64).unwrap();
        let err = dispatcher.run_to_completion("caller", input).unwrap_err();
        assert!(matches!(err, RunError::Harness(TestDispatchError::UnknownFunction(_))));
    }

    #[test]
    fn roundtrips_are_collected_when_requested() {
        let registry = Registry::new("http://localhost:0");
        registry
            .register("identity", |_ctx: Context, input: i64| async move {
                Ok::<_, crate::error::DispatchError>(input)
            })
            .unwrap();

        let mut dispatcher = TestDispatcher::new(&registry).collect_roundtrips();
        let input = value::encode(&1i64).unwrap();
        dispatcher.run_to_completion("identity", input).unwrap();
        assert_eq!(dispatcher.roundtrips().len(), 1);
    }

    fn merge(mut left: Vec<i64>, mut right: Vec<i64>) -> Vec<i64> {
        let mut out = Vec::with_capacity(left.len() + right.len());
        let mut l = left.drain(..).peekable();
        let mut r = right.drain(..).peekable();
        loop {
            match (l.peek(), r.peek()) {
                (Some(a), Some(b)) if a <= b => out.push(l.next().unwrap()),
                (Some(_), Some(_)) => out.push(r.next().unwrap()),
                (Some(_), None) => out.push(l.next().unwrap()),
                (None, Some(_)) => out.push(r.next().unwrap()),
                (None, None) => break,
            }
        }
        out
    }

    /// S5: a distributed merge sort over `[1,5,3,2,4,6,7,8,9,0]`. Each level
    /// recurses by calling `merge_sort` on both halves through `ctx.all`, and
    /// each of those recursive calls is itself a separate scheduler run that
    /// may suspend further — `TestDispatcher::settle` drives the whole tree
    /// across as many invocations as it takes, not just one level of polling,
    /// and the final exit value is the fully sorted list.
    #[test]
    fn distributed_merge_sort_settles_on_the_sorted_list() {
        let registry = Registry::new("http://localhost:0");
        registry
            .register("merge_sort", |ctx: Context, list: Vec<i64>| async move {
                if list.len() <= 1 {
                    return Ok::<_, crate::error::DispatchError>(list);
                }
                let mid = list.len() / 2;
                let halves = [list[..mid].to_vec(), list[mid..].to_vec()];
                let awaitables = halves
                    .iter()
                    .map(|half| ctx.awaitable("merge_sort", half))
                    .collect::<Result<Vec<_>, _>>()
                    .unwrap();
                let mut sorted_halves: Vec<Vec<i64>> = ctx.all(awaitables).await?;
                let right = sorted_halves.pop().unwrap();
                let left = sorted_halves.pop().unwrap();
                Ok(merge(left, right))
            })
            .unwrap();

        let mut dispatcher = TestDispatcher::new(&registry);
        let input = value::encode(&vec![1i64, 5, 3, 2, 4, 6, 7, 8, 9, 0]).unwrap();
        let output = dispatcher.run_to_completion("merge_sort", input).unwrap();
        let sorted: Vec<i64> = value::decode(&output).unwrap();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    /// S6: a registered function whose body fails with `TEMPORARY_ERROR` on
    /// its first five invocations and returns `"SUCCESS"` on the sixth,
    /// standing in for the orchestrator retrying the same `Run` request
    /// after a retryable status. The endpoint (here, a bare [`Scheduler`], to
    /// observe each individual `RunResponse` rather than only the settled
    /// outcome `run_to_completion` would give) is invoked six times: the
    /// first five carry `status=TEMPORARY_ERROR`, the sixth carries
    /// `status=OK` with output `"SUCCESS"`.
    #[test]
    fn retried_entry_fails_five_times_then_succeeds_on_the_sixth_invocation() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let attempts = Arc::new(AtomicUsize::new(0));
        let registry = Registry::new("http://localhost:0");
        {
            let attempts = attempts.clone();
            registry
                .register("flaky", move |_ctx: Context, ()| {
                    let attempts = attempts.clone();
                    async move {
                        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                        if attempt <= 5 {
                            Err(crate::error::DispatchError::Temporary(format!(
                                "attempt {attempt} failed"
                            )))
                        } else {
                            Ok::<_, crate::error::DispatchError>("SUCCESS".to_string())
                        }
                    }
                })
                .unwrap();
        }

        let input = value::encode(&()).unwrap();
        for attempt in 1..=6 {
            let scheduler = Scheduler::new(&registry, "flaky");
            let output = scheduler.run(Input::FirstCall { input: input.clone() });
            if attempt <= 5 {
                assert_eq!(output.message.status, Status::TemporaryError as i32);
            } else {
                assert_eq!(output.message.status, Status::Ok as i32);
                let exit = match &output.message.directive {
                    Some(crate::pb::run_response::Directive::Exit(exit)) => exit.clone(),
                    other => panic!("expected an exit directive, got {other:?}"),
                };
                let result = exit.result.expect("exit carries a result");
                let any = result.output.expect("successful exit carries a value");
                let value = Value { type_url: any.type_url, bytes: any.value };
                let decoded: String = value::decode(&value).unwrap();
                assert_eq!(decoded, "SUCCESS");
            }
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
    }
}
