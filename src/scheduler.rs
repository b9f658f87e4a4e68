//! C6 — the one-shot cooperative scheduler: drains a tree of coroutines to
//! its next suspension point, then serializes and yields to the
//! orchestrator.
//!
//! Grounded line-for-line in
//! `examples/original_source/src/dispatch/scheduler.py`'s `OneShotScheduler`:
//! the `ready`/`suspended` bookkeeping, the depth-first child-prepending of
//! `all`/`any`/`race`, and the two-phase result dispatch (poll-level error to
//! every previous caller, then individual call results by correlation id) are
//! unchanged. What differs is how a coroutine is "resumed": the teacher's
//! `Executor` in `executor/mod.rs` drives `Coroutine::resume` against a
//! `World`; here the coroutine IS a plain `Future`, driven with a no-op
//! waker exactly like `function_coroutine/mod.rs`'s `waker` module, and a
//! coroutine that isn't live in memory (because this invocation is a fresh
//! process resuming serialized state) is rebuilt via `coroutine::Scope`'s
//! history replay rather than bevy's ECS bookkeeping.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::task::{Context as TaskContext, Poll};

use serde::{Deserialize, Serialize};

use crate::coroutine::{Awaitable, Directive, Scope, Settlement};
use crate::future::{
    AllFuture, AnyFuture, AnyResult, CallFuture, CallResult as FutureCallResult, CoroutineResult,
    DispatchFuture, RaceFuture,
};
use crate::id::{self, CallId, CoroutineId};
use crate::proto::{self, Call, Error, Input, Output};
use crate::registry::Registry;
use crate::status::Status;
use crate::value::Value;

/// The current scheduler/coroutine-state wire format. Bumping this
/// invalidates every in-flight coroutine tree (spec.md §4.6.5's
/// `IncompatibleState`), mirroring `scheduler.py`'s use of `sys.version`
/// except pinned explicitly instead of riding the interpreter version.
pub const STATE_VERSION: &str = "dispatch-sdk-scheduler/1";

/// One of the four [`DispatchFuture`] shapes a suspended coroutine can be
/// waiting on. Kept as a closed enum (rather than a trait object) because
/// the scheduler needs to convert a ready future into the [`Settlement`] its
/// owner's next poll expects, which is shape-specific.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum PendingFuture {
    Call(CallFuture),
    All(AllFuture),
    Any(AnyFuture),
    Race(RaceFuture),
}

impl PendingFuture {
    fn ready(&self) -> bool {
        match self {
            PendingFuture::Call(f) => f.ready(),
            PendingFuture::All(f) => f.ready(),
            PendingFuture::Any(f) => f.ready(),
            PendingFuture::Race(f) => f.ready(),
        }
    }

    fn add_error(&mut self, error: Error) {
        match self {
            PendingFuture::Call(f) => f.add_error(error),
            PendingFuture::All(f) => f.add_error(error),
            PendingFuture::Any(f) => f.add_error(error),
            PendingFuture::Race(f) => f.add_error(error),
        }
    }

    fn add_call_result(&mut self, result: FutureCallResult) {
        if let PendingFuture::Call(f) = self {
            f.add_result(AnyResult::Call(result));
        }
    }

    fn add_coroutine_result(&mut self, result: CoroutineResult) {
        match self {
            PendingFuture::All(f) => f.add_result(AnyResult::Coroutine(result)),
            PendingFuture::Any(f) => f.add_result(AnyResult::Coroutine(result)),
            PendingFuture::Race(f) => f.add_result(AnyResult::Coroutine(result)),
            PendingFuture::Call(_) => {}
        }
    }

    /// Converts a ready future into the settlement fed back into the
    /// coroutine's await point on its next poll.
    fn settlement(&self) -> Settlement {
        match self {
            PendingFuture::Call(f) => {
                Settlement::Call(match f.error() {
                    Some(e) => Err(e),
                    None => Ok(f.value().expect("ready CallFuture carries a value")),
                })
            }
            PendingFuture::All(f) => Settlement::All(match f.error() {
                Some(e) => Err(e),
                None => Ok(f.values()),
            }),
            PendingFuture::Any(f) => Settlement::Any(match f.error() {
                Some(e) => Err(e),
                None => Ok(f.value().expect("ready AnyFuture carries a value")),
            }),
            PendingFuture::Race(f) => Settlement::Race(match f.error() {
                Some(e) => Err(e),
                None => Ok(f.value().expect("ready RaceFuture carries a value")),
            }),
        }
    }
}

/// A coroutine suspended across an invocation boundary: everything needed to
/// rebuild it from scratch in a fresh process.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CoroutineSnapshot {
    id: CoroutineId,
    parent_id: Option<CoroutineId>,
    function: String,
    input: Value,
    history: Vec<Settlement>,
    pending: PendingFuture,
}

/// The serialized scheduler snapshot carried as `coroutine_state` in
/// [`proto::Input::Resume`] / [`Output::poll`]. `ready` is always empty when
/// persisted — the drain pass runs until it is — but the field is kept for
/// fidelity with `scheduler.py`'s `State` dataclass.
#[derive(Debug, Serialize, Deserialize)]
pub struct State {
    version: String,
    suspended: Vec<CoroutineSnapshot>,
    ready: Vec<CoroutineSnapshot>,
    next_coroutine_id: CoroutineId,
    next_call_id: CallId,
    prev_callers: Vec<CoroutineId>,
    outstanding_calls: u32,
}

/// An in-flight coroutine, live in memory for the duration of one
/// invocation. Not `Send`/`Sync`: it is driven synchronously, start to
/// finish, on the thread handling this request.
struct LiveCoroutine {
    id: CoroutineId,
    parent_id: Option<CoroutineId>,
    function: String,
    input: Value,
    history: Vec<Settlement>,
    scope: Rc<Scope>,
    future: crate::registry::BoxFuture,
    pending: Option<PendingFuture>,
}

impl LiveCoroutine {
    fn fresh(registry: &Registry, id: CoroutineId, parent_id: Option<CoroutineId>, function: String, input: Value) -> Result<LiveCoroutine, DispatchSchedulerError> {
        let scope = Rc::new(Scope::new(Vec::new()));
        let future = Self::build_future(registry, &scope, parent_id, function.clone(), input.clone())?;
        Ok(LiveCoroutine {
            id,
            parent_id,
            function,
            input,
            history: Vec::new(),
            scope,
            future,
            pending: None,
        })
    }

    /// Builds the future a coroutine drives. A root coroutine (`parent_id`
    /// `None`) runs `function`'s own registered body. A combinator child
    /// (`parent_id` `Some`, spawned by `spawn_children`) never runs that
    /// body locally — it is a thin forwarder whose only action is to issue
    /// a `Call` directive for `function`/`input` and hand back whatever
    /// settles it, so every `all`/`any`/`race` operand is always an outbound
    /// call, never an in-process invocation.
    fn build_future(
        registry: &Registry,
        scope: &Rc<Scope>,
        parent_id: Option<CoroutineId>,
        function: String,
        input: Value,
    ) -> Result<crate::registry::BoxFuture, DispatchSchedulerError> {
        if parent_id.is_none() {
            registry
                .construct(&function, scope.clone(), input)
                .map_err(DispatchSchedulerError::Construct)
        } else {
            let scope = scope.clone();
            Ok(Box::pin(async move { scope.call(function, input).await }))
        }
    }

    /// Rebuilds a coroutine that was suspended in a previous invocation.
    /// Priming-polls it once to fast-forward past its replayed history and
    /// reach the frontier await it was halted at (spec.md §9 strategy 1);
    /// the directive that poll records is discarded since the caller already
    /// knows, from `snapshot.pending`, what kind of await is in flight.
    fn restore(registry: &Registry, snapshot: CoroutineSnapshot) -> Result<LiveCoroutine, DispatchSchedulerError> {
        let scope = Rc::new(Scope::new(snapshot.history.clone()));
        let mut future = Self::build_future(
            registry,
            &scope,
            snapshot.parent_id,
            snapshot.function.clone(),
            snapshot.input.clone(),
        )?;

        let waker = noop_waker();
        let mut cx = TaskContext::from_waker(&waker);
        match future.as_mut().poll(&mut cx) {
            Poll::Pending => {
                scope.take_directive();
            }
            Poll::Ready(_) => {
                return Err(DispatchSchedulerError::Incompatible(
                    "coroutine state claims suspension but replay ran to completion".into(),
                ))
            }
        }

        Ok(LiveCoroutine {
            id: snapshot.id,
            parent_id: snapshot.parent_id,
            function: snapshot.function,
            input: snapshot.input,
            history: snapshot.history,
            scope,
            future,
            pending: Some(snapshot.pending),
        })
    }

    fn snapshot(self) -> CoroutineSnapshot {
        CoroutineSnapshot {
            id: self.id,
            parent_id: self.parent_id,
            function: self.function,
            input: self.input,
            history: self.history,
            pending: self.pending.expect("suspended coroutines always have a pending future"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum DispatchSchedulerError {
    #[error("{0}")]
    Construct(crate::error::DispatchError),
    #[error("incompatible coroutine state: {0}")]
    Incompatible(String),
    #[error("failed to serialize coroutine state: {0}")]
    Serialize(#[from] Box<bincode::ErrorKind>),
    #[error("failed to deserialize coroutine state: {0}")]
    Deserialize(String),
    #[error("coroutine yielded without recording a directive")]
    MissingDirective,
}

fn noop_waker() -> std::task::Waker {
    fn clone(_: *const ()) -> std::task::RawWaker {
        raw()
    }
    fn noop(_: *const ()) {}
    fn raw() -> std::task::RawWaker {
        static VTABLE: std::task::RawWakerVTable =
            std::task::RawWakerVTable::new(clone, noop, noop, noop);
        std::task::RawWaker::new(std::ptr::null(), &VTABLE)
    }
    unsafe { std::task::Waker::from_raw(raw()) }
}

/// Runs one local round of scheduling for a single entry-point function,
/// mirroring `scheduler.py`'s `OneShotScheduler`.
pub struct Scheduler<'r> {
    registry: &'r Registry,
    function: String,
    poll_min_results: u32,
    poll_max_results: u32,
    poll_max_wait_seconds: Option<u32>,
}

impl<'r> Scheduler<'r> {
    pub fn new(registry: &'r Registry, function: impl Into<String>) -> Scheduler<'r> {
        Scheduler {
            registry,
            function: function.into(),
            poll_min_results: 1,
            poll_max_results: 10,
            poll_max_wait_seconds: None,
        }
    }

    pub fn with_poll_limits(mut self, min_results: u32, max_results: u32) -> Scheduler<'r> {
        self.poll_min_results = min_results;
        self.poll_max_results = max_results;
        self
    }

    pub fn with_poll_max_wait_seconds(mut self, seconds: Option<u32>) -> Scheduler<'r> {
        self.poll_max_wait_seconds = seconds;
        self
    }

    /// Run one round of scheduling. Never fails: scheduler-internal errors
    /// are caught and reported as a `TEMPORARY_ERROR` [`Output`] per
    /// spec.md §4.6.5, matching `scheduler.py`'s top-level `run` catching
    /// `Exception`.
    pub fn run(&self, input: Input) -> Output {
        match self.run_inner(input) {
            Ok(output) => output,
            Err(err) => {
                tracing::error!(error = %err, "unexpected error during coroutine scheduling");
                let status = match &err {
                    DispatchSchedulerError::Incompatible(_) => Status::IncompatibleState,
                    DispatchSchedulerError::Deserialize(_) => Status::IncompatibleState,
                    _ => Status::TemporaryError,
                };
                Output::error(Error::new(status, "SchedulerError", err.to_string()))
            }
        }
    }

    fn run_inner(&self, input: Input) -> Result<Output, DispatchSchedulerError> {
        let mut ready: VecDeque<LiveCoroutine>;
        let mut suspended: HashMap<CoroutineId, LiveCoroutine>;
        let mut next_coroutine_id: CoroutineId;
        let mut next_call_id: CallId;
        let mut prev_callers: Vec<CoroutineId>;
        let mut outstanding_calls: u32;

        match input {
            Input::FirstCall { input } => {
                tracing::debug!(function = %self.function, "starting main coroutine");
                let root = LiveCoroutine::fresh(self.registry, 0, None, self.function.clone(), input)?;
                ready = VecDeque::from([root]);
                suspended = HashMap::new();
                next_coroutine_id = 1;
                next_call_id = 1;
                prev_callers = Vec::new();
                outstanding_calls = 0;
            }
            Input::Resume {
                coroutine_state,
                call_results,
                poll_error,
            } => {
                tracing::debug!(bytes = coroutine_state.len(), "resuming scheduler state");
                let state: State = bincode::deserialize(&coroutine_state)
                    .map_err(|e| DispatchSchedulerError::Deserialize(e.to_string()))?;
                if state.version != STATE_VERSION {
                    return Err(DispatchSchedulerError::Incompatible(format!(
                        "version mismatch: '{}' vs. current '{STATE_VERSION}'",
                        state.version
                    )));
                }

                let mut rebuilt = HashMap::new();
                for snapshot in state.suspended {
                    let id = snapshot.id;
                    rebuilt.insert(id, LiveCoroutine::restore(self.registry, snapshot)?);
                }
                suspended = rebuilt;
                next_coroutine_id = state.next_coroutine_id;
                next_call_id = state.next_call_id;
                outstanding_calls = state.outstanding_calls;
                ready = VecDeque::new();

                if let Some(poll_error) = poll_error {
                    tracing::debug!(error = %poll_error, "dispatching poll error");
                    for coroutine_id in &state.prev_callers {
                        if let Some(coro) = suspended.get_mut(coroutine_id) {
                            let pending = coro.pending.as_mut().expect("suspended coroutine has a pending future");
                            pending.add_error(poll_error.clone());
                            if pending.ready() {
                                let coro = suspended.remove(coroutine_id).unwrap();
                                ready.push_back(coro);
                            }
                        }
                        outstanding_calls = outstanding_calls.saturating_sub(1);
                    }
                }
                prev_callers = Vec::new();

                tracing::debug!(count = call_results.len(), "dispatching call result(s)");
                for call_result in call_results {
                    let correlation_id = call_result.correlation_id.unwrap_or_default();
                    let coroutine_id = id::correlation_coroutine_id(correlation_id);
                    let call_id = id::correlation_call_id(correlation_id);

                    let Some(coro) = suspended.get_mut(&coroutine_id) else {
                        tracing::warn!(coroutine_id, "discarding unexpected call result");
                        continue;
                    };
                    let pending = coro.pending.as_mut().expect("suspended coroutine has a pending future");
                    pending.add_call_result(FutureCallResult {
                        call_id,
                        value: call_result.output,
                        error: call_result.error,
                    });
                    if pending.ready() {
                        let coro = suspended.remove(&coroutine_id).unwrap();
                        ready.push_back(coro);
                    }
                    outstanding_calls = outstanding_calls.saturating_sub(1);
                }
            }
        }

        tracing::debug!(
            ready = ready.len(),
            total = ready.len() + suspended.len(),
            "draining ready coroutines"
        );

        let mut pending_calls: Vec<Call> = Vec::new();
        let waker = noop_waker();
        let mut cx = TaskContext::from_waker(&waker);

        while let Some(mut coro) = ready.pop_front() {
            if let Some(pending) = coro.pending.take() {
                let settlement = pending.settlement();
                coro.history.push(settlement.clone());
                coro.scope.put_resume(settlement);
            }

            match coro.future.as_mut().poll(&mut cx) {
                Poll::Ready(outcome) => {
                    let (value, error) = match outcome {
                        Ok(v) => (Some(v), None),
                        Err(e) => (None, Some(e)),
                    };

                    match coro.parent_id {
                        None => {
                            // The root coroutine finished: every other
                            // suspended coroutine is dropped unpolled.
                            return Ok(match error {
                                Some(e) => Output::error(e),
                                None => Output::exit_value(value.expect("root coroutine returned a value")),
                            });
                        }
                        Some(parent_id) => {
                            let result = CoroutineResult {
                                coroutine_id: coro.id,
                                value,
                                error,
                            };
                            if let Some(parent) = suspended.get_mut(&parent_id) {
                                let pending = parent
                                    .pending
                                    .as_mut()
                                    .expect("suspended coroutine has a pending future");
                                pending.add_coroutine_result(result);
                                if pending.ready() {
                                    let parent = suspended.remove(&parent_id).unwrap();
                                    ready.push_front(parent);
                                }
                            } else {
                                tracing::warn!(coroutine_id = coro.id, "discarding result: parent is gone");
                            }
                        }
                    }
                }
                Poll::Pending => {
                    let directive = coro
                        .scope
                        .take_directive()
                        .ok_or(DispatchSchedulerError::MissingDirective)?;

                    match directive {
                        Directive::Call {
                            function,
                            input,
                            endpoint,
                        } => {
                            let call_id = next_call_id;
                            next_call_id += 1;
                            let correlation_id = id::correlation_id(coro.id, call_id);
                            pending_calls.push(Call {
                                function,
                                input,
                                endpoint,
                                correlation_id: Some(correlation_id),
                            });
                            coro.pending = Some(PendingFuture::Call(CallFuture::default()));
                            prev_callers.push(coro.id);
                            outstanding_calls += 1;
                            suspended.insert(coro.id, coro);
                        }
                        Directive::All(awaitables) => {
                            let child_ids = spawn_children(
                                self.registry,
                                &mut ready,
                                &mut next_coroutine_id,
                                coro.id,
                                awaitables,
                            )?;
                            coro.pending = Some(PendingFuture::All(AllFuture::new(child_ids)));
                            suspended.insert(coro.id, coro);
                        }
                        Directive::Any(awaitables) => {
                            let child_ids = spawn_children(
                                self.registry,
                                &mut ready,
                                &mut next_coroutine_id,
                                coro.id,
                                awaitables,
                            )?;
                            coro.pending = Some(PendingFuture::Any(AnyFuture::new(child_ids)));
                            suspended.insert(coro.id, coro);
                        }
                        Directive::Race(awaitables) => {
                            let child_ids = spawn_children(
                                self.registry,
                                &mut ready,
                                &mut next_coroutine_id,
                                coro.id,
                                awaitables,
                            )?;
                            coro.pending = Some(PendingFuture::Race(RaceFuture::new(child_ids)));
                            suspended.insert(coro.id, coro);
                        }
                    }
                }
            }
        }

        tracing::debug!("serializing state");
        let suspended_snapshots: Vec<CoroutineSnapshot> =
            suspended.into_values().map(LiveCoroutine::snapshot).collect();
        let state = State {
            version: STATE_VERSION.to_string(),
            suspended: suspended_snapshots,
            ready: Vec::new(),
            next_coroutine_id,
            next_call_id,
            prev_callers,
            outstanding_calls,
        };
        let serialized = bincode::serialize(&state)?;

        tracing::debug!(
            calls = pending_calls.len(),
            bytes = serialized.len(),
            "yielding to the orchestrator"
        );
        Ok(Output::poll(
            serialized,
            pending_calls,
            std::cmp::max(1, std::cmp::min(outstanding_calls, self.poll_min_results)),
            std::cmp::max(1, std::cmp::min(outstanding_calls, self.poll_max_results)),
            self.poll_max_wait_seconds,
        ))
    }
}

/// Spawns one child coroutine per awaitable and prepends them to `ready` in
/// declaration order, giving a depth-first traversal of the coroutine tree —
/// `scheduler.py`'s `spawn_children`. Each child is a call forwarder (see
/// `LiveCoroutine::build_future`), so every operand of `all`/`any`/`race`
/// always reaches the drain pass as its own outbound `Call`.
fn spawn_children(
    registry: &Registry,
    ready: &mut VecDeque<LiveCoroutine>,
    next_coroutine_id: &mut CoroutineId,
    parent_id: CoroutineId,
    awaitables: Vec<Awaitable>,
) -> Result<Vec<CoroutineId>, DispatchSchedulerError> {
    let mut children = Vec::with_capacity(awaitables.len());
    let mut child_ids = Vec::with_capacity(awaitables.len());
    for awaitable in awaitables {
        let id = *next_coroutine_id;
        *next_coroutine_id += 1;
        child_ids.push(id);
        children.push(LiveCoroutine::fresh(
            registry,
            id,
            Some(parent_id),
            awaitable.function,
            awaitable.input,
        )?);
    }
    for child in children.into_iter().rev() {
        ready.push_front(child);
    }
    Ok(child_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Context;

    fn poll_parts(output: &Output) -> (Vec<u8>, Vec<Call>) {
        match &output.message.directive {
            Some(crate::pb::run_response::Directive::Poll(poll)) => (
                poll.coroutine_state.clone(),
                poll.calls.iter().cloned().map(proto::Call::from_proto).collect(),
            ),
            other => panic!("expected a poll directive, got {other:?}"),
        }
    }

    fn exit_value(output: &Output) -> Value {
        match &output.message.directive {
            Some(crate::pb::run_response::Directive::Exit(exit)) => {
                let result = exit.result.as_ref().expect("exit carries a result");
                let any = result.output.as_ref().expect("exit result carries a value");
                Value {
                    type_url: any.type_url.clone(),
                    bytes: any.value.clone(),
                }
            }
            other => panic!("expected an exit directive, got {other:?}"),
        }
    }

    fn exit_error(output: &Output) -> proto::Error {
        match &output.message.directive {
            Some(crate::pb::run_response::Directive::Exit(exit)) => {
                let result = exit.result.as_ref().expect("exit carries a result");
                proto::Error {
                    status: Status::from_i32(output.message.status),
                    r#type: result.error.as_ref().unwrap().r#type.clone(),
                    message: result.error.as_ref().unwrap().message.clone(),
                }
            }
            other => panic!("expected an exit directive, got {other:?}"),
        }
    }

    fn call_result(call: &Call, value: Value) -> proto::CallResult {
        proto::CallResult {
            correlation_id: call.correlation_id,
            output: Some(value),
            error: None,
        }
    }

    fn call_error(call: &Call, error: Error) -> proto::CallResult {
        proto::CallResult {
            correlation_id: call.correlation_id,
            output: None,
            error: Some(error),
        }
    }

    /// S1: a single-call function round trips with one invocation.
    #[test]
    fn identity_round_trip() {
        let registry = Registry::new("http://localhost:0");
        registry
            .register("greet_name", |_ctx: Context, name: String| async move {
                Ok::<_, crate::error::DispatchError>(format!("Hello world: {name}"))
            })
            .unwrap();

        let scheduler = Scheduler::new(&registry, "greet_name");
        let input = Input::FirstCall {
            input: crate::value::encode(&"52".to_string()).unwrap(),
        };
        let output = scheduler.run(input);
        assert_eq!(output.message.status, Status::Ok as i32);
        let value: String = crate::value::decode(&exit_value(&output)).unwrap();
        assert_eq!(value, "Hello world: 52");
    }

    /// S2: `all` over three calls polls with three distinct correlation ids,
    /// then resuming with their results (matched by correlation id, in any
    /// arrival order) exits with the values in declared order.
    #[test]
    fn gather_three_matches_by_correlation_id() {
        let registry = Registry::new("http://localhost:0");
        registry
            .register("times_ten", |_ctx: Context, n: i64| async move {
                Ok::<_, crate::error::DispatchError>(n * 10)
            })
            .unwrap();
        registry
            .register("call_concurrently", |ctx: Context, names: Vec<i64>| async move {
                let awaitables = names
                    .into_iter()
                    .map(|n| ctx.awaitable("times_ten", &n))
                    .collect::<Result<Vec<_>, _>>()
                    .unwrap();
                Ok::<_, crate::error::DispatchError>(ctx.all::<i64>(awaitables).await?)
            })
            .unwrap();

        let scheduler = Scheduler::new(&registry, "call_concurrently");
        let output = scheduler.run(Input::FirstCall {
            input: crate::value::encode(&vec![1i64, 2, 3]).unwrap(),
        });
        let (state, calls) = poll_parts(&output);
        assert_eq!(calls.len(), 3);
        let correlations: std::collections::HashSet<_> = calls.iter().map(|c| c.correlation_id).collect();
        assert_eq!(correlations.len(), 3, "every call gets a distinct correlation id");

        // Deliver results out of declaration order; `all`'s output must still
        // come back ordered by declaration (P5).
        let results = vec![
            call_result(&calls[2], crate::value::encode(&30i64).unwrap()),
            call_result(&calls[0], crate::value::encode(&10i64).unwrap()),
            call_result(&calls[1], crate::value::encode(&20i64).unwrap()),
        ];
        let output = scheduler.run(Input::Resume {
            coroutine_state: state,
            call_results: results,
            poll_error: None,
        });
        let value: Vec<i64> = crate::value::decode(&exit_value(&output)).unwrap();
        assert_eq!(value, vec![10, 20, 30]);
    }

    /// S3: `any` resolves on the first successful child, ignoring the rest.
    #[test]
    fn any_short_circuits_on_first_success() {
        let registry = Registry::new("http://localhost:0");
        registry
            .register("echo", |_ctx: Context, n: i64| async move {
                Ok::<_, crate::error::DispatchError>(n)
            })
            .unwrap();
        registry
            .register("any_of_four", |ctx: Context, ()| async move {
                let awaitables = ["a", "b", "c", "d"]
                    .iter()
                    .map(|_| ctx.awaitable("echo", &0i64))
                    .collect::<Result<Vec<_>, _>>()
                    .unwrap();
                Ok::<_, crate::error::DispatchError>(ctx.any::<i64>(awaitables).await?)
            })
            .unwrap();

        let scheduler = Scheduler::new(&registry, "any_of_four");
        let output = scheduler.run(Input::FirstCall {
            input: crate::value::encode(&()).unwrap(),
        });
        let (state, calls) = poll_parts(&output);
        assert_eq!(calls.len(), 4);

        // Only the second call's result ever arrives.
        let results = vec![call_result(&calls[1], crate::value::encode(&23i64).unwrap())];
        let output = scheduler.run(Input::Resume {
            coroutine_state: state,
            call_results: results,
            poll_error: None,
        });
        assert_eq!(output.message.status, Status::Ok as i32);
        let value: i64 = crate::value::decode(&exit_value(&output)).unwrap();
        assert_eq!(value, 23);
    }

    /// S4: `race` settles on whichever child terminates first, even if it's
    /// an error — and the status that error actually carried survives the
    /// round trip unchanged (spec.md §7: "a child's error reaches the parent
    /// as the same error value"), rather than being downgraded to a generic
    /// retryable status.
    #[test]
    fn race_settles_on_first_error() {
        let registry = Registry::new("http://localhost:0");
        registry
            .register("echo", |_ctx: Context, n: i64| async move {
                Ok::<_, crate::error::DispatchError>(n)
            })
            .unwrap();
        registry
            .register("race_of_four", |ctx: Context, ()| async move {
                let awaitables = ["a", "b", "c", "d"]
                    .iter()
                    .map(|_| ctx.awaitable("echo", &0i64))
                    .collect::<Result<Vec<_>, _>>()
                    .unwrap();
                Ok::<_, crate::error::DispatchError>(ctx.race::<i64>(awaitables).await?)
            })
            .unwrap();

        let scheduler = Scheduler::new(&registry, "race_of_four");
        let output = scheduler.run(Input::FirstCall {
            input: crate::value::encode(&()).unwrap(),
        });
        let (state, calls) = poll_parts(&output);
        assert_eq!(calls.len(), 4);

        let error = Error::new(Status::PermanentError, "Boom", "third call failed");
        let results = vec![call_error(&calls[2], error)];
        let output = scheduler.run(Input::Resume {
            coroutine_state: state,
            call_results: results,
            poll_error: None,
        });
        assert_eq!(output.message.status, Status::PermanentError as i32);
        assert!(exit_error(&output).message.contains("third call failed"));
    }

    /// P8: a poll-level error is delivered to every coroutine that issued a
    /// call in the preceding yield, not just one of them.
    #[test]
    fn poll_level_error_reaches_every_previous_caller() {
        let registry = Registry::new("http://localhost:0");
        registry
            .register("echo", |_ctx: Context, n: i64| async move {
                Ok::<_, crate::error::DispatchError>(n)
            })
            .unwrap();
        registry
            .register("all_of_two", |ctx: Context, ()| async move {
                let awaitables = [0i64, 1]
                    .iter()
                    .map(|n| ctx.awaitable("echo", n))
                    .collect::<Result<Vec<_>, _>>()
                    .unwrap();
                Ok::<_, crate::error::DispatchError>(ctx.all::<i64>(awaitables).await?)
            })
            .unwrap();

        let scheduler = Scheduler::new(&registry, "all_of_two");
        let output = scheduler.run(Input::FirstCall {
            input: crate::value::encode(&()).unwrap(),
        });
        let (state, calls) = poll_parts(&output);
        assert_eq!(calls.len(), 2);

        let poll_error = Error::new(Status::TemporaryError, "Orchestrator", "delivery failed");
        let output = scheduler.run(Input::Resume {
            coroutine_state: state,
            call_results: Vec::new(),
            poll_error: Some(poll_error),
        });
        // Both children of `all` were awaited by the same (only) coroutine,
        // so a single poll-level error routed to it is enough to finish the
        // whole tree with that error.
        assert_eq!(output.message.status, Status::TemporaryError as i32);
        assert!(exit_error(&output).message.contains("delivery failed"));
    }

    /// P3: serialize-then-restore is idempotent — resuming from a snapshot
    /// taken mid-flight reaches the same terminal outcome as an uninterrupted
    /// run would have.
    #[test]
    fn restore_reaches_the_same_terminal_outcome() {
        let registry = Registry::new("http://localhost:0");
        registry
            .register("double", |_ctx: Context, n: i64| async move {
                Ok::<_, crate::error::DispatchError>(n * 2)
            })
            .unwrap();
        registry
            .register("double_twice", |ctx: Context, n: i64| async move {
                let once: i64 = ctx.call("double", &n).await?;
                let twice: i64 = ctx.call("double", &once).await?;
                Ok::<_, crate::error::DispatchError>(twice)
            })
            .unwrap();

        let scheduler = Scheduler::new(&registry, "double_twice");
        let output = scheduler.run(Input::FirstCall {
            input: crate::value::encode(&5i64).unwrap(),
        });
        let (state, calls) = poll_parts(&output);
        assert_eq!(calls.len(), 1);

        let output = scheduler.run(Input::Resume {
            coroutine_state: state,
            call_results: vec![call_result(&calls[0], crate::value::encode(&10i64).unwrap())],
            poll_error: None,
        });
        let (state, calls) = poll_parts(&output);
        assert_eq!(calls.len(), 1);

        let output = scheduler.run(Input::Resume {
            coroutine_state: state,
            call_results: vec![call_result(&calls[0], crate::value::encode(&20i64).unwrap())],
            poll_error: None,
        });
        let value: i64 = crate::value::decode(&exit_value(&output)).unwrap();
        assert_eq!(value, 20);
    }

    /// Version-mismatched coroutine state is refused rather than silently
    /// accepted, per spec.md §4.6.5.
    #[test]
    fn incompatible_state_version_is_refused() {
        let registry = Registry::new("http://localhost:0");
        registry
            .register("double", |_ctx: Context, n: i64| async move {
                Ok::<_, crate::error::DispatchError>(n * 2)
            })
            .unwrap();

        let output = Scheduler::new(&registry, "double").run(Input::Resume {
            coroutine_state: b"garbage-not-even-the-right-shape".to_vec(),
            call_results: Vec::new(),
            poll_error: None,
        });
        assert_eq!(output.message.status, Status::IncompatibleState as i32);
    }
}
