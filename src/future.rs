//! Futures tracked by the scheduler while a coroutine is suspended.
//! `CallFuture`, `AllFuture`, `AnyFuture` and `RaceFuture` each accumulate
//! results (and short-circuit errors) differently, matching the `call`/
//! `all`/`any`/`race` directives respectively.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::id::{CallId, CoroutineId};
use crate::proto::Error;

/// The result of an asynchronous function call, keyed by [`CallId`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResult {
    pub call_id: CallId,
    pub value: Option<crate::value::Value>,
    pub error: Option<Error>,
}

/// The result from running a child coroutine to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoroutineResult {
    pub coroutine_id: CoroutineId,
    pub value: Option<crate::value::Value>,
    pub error: Option<Error>,
}

/// Either of the two result shapes a [`DispatchFuture`] can be fed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AnyResult {
    Call(CallResult),
    Coroutine(CoroutineResult),
}

/// Common contract for the futures the scheduler drives.
pub trait DispatchFuture {
    /// Feed the future a newly arrived result. Results for ids the future
    /// isn't (or is no longer) waiting on are silently ignored.
    fn add_result(&mut self, result: AnyResult);

    /// Feed the future a poll-level error (e.g. the orchestrator failed to
    /// deliver results at all).
    fn add_error(&mut self, error: Error);

    /// Whether the future has enough information to resume its coroutine.
    fn ready(&self) -> bool;

    /// The error the coroutine should be resumed with via `throw`, if any.
    /// Only valid once [`DispatchFuture::ready`] is true.
    fn error(&self) -> Option<Error>;

    /// The value the coroutine should be resumed with via `send`. Only
    /// valid once [`DispatchFuture::ready`] is true and [`DispatchFuture::error`] is `None`.
    fn value(&self) -> Option<crate::value::Value>;
}

/// Future result of a `call()` directive: waits for exactly one [`CallResult`].
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CallFuture {
    result: Option<CallResult>,
    first_error: Option<Error>,
}

impl DispatchFuture for CallFuture {
    fn add_result(&mut self, result: AnyResult) {
        let AnyResult::Call(result) = result else {
            panic!("CallFuture::add_result fed a CoroutineResult");
        };
        if result.error.is_some() && self.first_error.is_none() {
            self.first_error = result.error.clone();
        }
        if self.result.is_none() {
            self.result = Some(result);
        }
    }

    fn add_error(&mut self, error: Error) {
        if self.first_error.is_none() {
            self.first_error = Some(error);
        }
    }

    fn ready(&self) -> bool {
        self.first_error.is_some() || self.result.is_some()
    }

    fn error(&self) -> Option<Error> {
        self.first_error.clone()
    }

    fn value(&self) -> Option<crate::value::Value> {
        self.result.as_ref().and_then(|r| r.value.clone())
    }
}

/// Future result of an `all()` directive: waits for every child, fails fast
/// on the first child error.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AllFuture {
    order: Vec<CoroutineId>,
    waiting: HashSet<CoroutineId>,
    results: HashMap<CoroutineId, CoroutineResult>,
    first_error: Option<Error>,
}

impl AllFuture {
    pub fn new(order: Vec<CoroutineId>) -> AllFuture {
        let waiting = order.iter().copied().collect();
        AllFuture {
            order,
            waiting,
            results: HashMap::new(),
            first_error: None,
        }
    }
}

impl DispatchFuture for AllFuture {
    fn add_result(&mut self, result: AnyResult) {
        let AnyResult::Coroutine(result) = result else {
            panic!("AllFuture::add_result fed a CallResult");
        };
        if !self.waiting.remove(&result.coroutine_id) {
            return;
        }
        if let Some(error) = &result.error {
            if self.first_error.is_none() {
                self.first_error = Some(error.clone());
            }
            return;
        }
        self.results.insert(result.coroutine_id, result);
    }

    fn add_error(&mut self, error: Error) {
        if self.first_error.is_none() {
            self.first_error = Some(error);
        }
    }

    fn ready(&self) -> bool {
        self.first_error.is_some() || self.waiting.is_empty()
    }

    fn error(&self) -> Option<Error> {
        self.first_error.clone()
    }

    fn value(&self) -> Option<crate::value::Value> {
        // Callers read `order`/`results` directly via `AllFuture::values` to
        // build the ordered list; this trait method is unused for this future
        // since its value is a list rather than a single `Value`.
        None
    }
}

impl AllFuture {
    /// The ordered list of child return values, once ready with no error.
    pub fn values(&self) -> Vec<crate::value::Value> {
        self.order
            .iter()
            .filter_map(|id| self.results.get(id).and_then(|r| r.value.clone()))
            .collect()
    }
}

/// Future result of an `any()` directive: resolves with the first
/// successful child; if all children fail, aggregates the errors.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AnyFuture {
    order: Vec<CoroutineId>,
    waiting: HashSet<CoroutineId>,
    first_result: Option<CoroutineResult>,
    errors: HashMap<CoroutineId, Error>,
    generic_error: Option<Error>,
}

impl AnyFuture {
    pub fn new(order: Vec<CoroutineId>) -> AnyFuture {
        let waiting = order.iter().copied().collect();
        AnyFuture {
            order,
            waiting,
            first_result: None,
            errors: HashMap::new(),
            generic_error: None,
        }
    }
}

impl DispatchFuture for AnyFuture {
    fn add_result(&mut self, result: AnyResult) {
        let AnyResult::Coroutine(result) = result else {
            panic!("AnyFuture::add_result fed a CallResult");
        };
        if !self.waiting.remove(&result.coroutine_id) {
            return;
        }
        match &result.error {
            None => {
                if self.first_result.is_none() {
                    self.first_result = Some(result);
                }
            }
            Some(error) => {
                self.errors.insert(result.coroutine_id, error.clone());
            }
        }
    }

    fn add_error(&mut self, error: Error) {
        if self.generic_error.is_none() {
            self.generic_error = Some(error);
        }
    }

    fn ready(&self) -> bool {
        self.generic_error.is_some() || self.first_result.is_some() || self.waiting.is_empty()
    }

    fn error(&self) -> Option<Error> {
        if let Some(error) = &self.generic_error {
            return Some(error.clone());
        }
        if self.first_result.is_some() || self.errors.is_empty() {
            return None;
        }
        if self.errors.len() == 1 {
            return self.order.iter().find_map(|id| self.errors.get(id)).cloned();
        }
        // AnyException: every child failed. Aggregate into a single error,
        // mirroring `dispatch.coroutine.AnyException`.
        let joined = self
            .order
            .iter()
            .filter_map(|id| self.errors.get(id))
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Some(Error::new(
            crate::status::Status::PermanentError,
            "AnyException",
            format!("all awaitables failed: {joined}"),
        ))
    }

    fn value(&self) -> Option<crate::value::Value> {
        if self.order.is_empty() {
            return None;
        }
        self.first_result.as_ref().and_then(|r| r.value.clone())
    }
}

/// Future result of a `race()` directive: resolves with whichever child
/// settles (success or failure) first.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RaceFuture {
    waiting: HashSet<CoroutineId>,
    first_result: Option<CoroutineResult>,
    first_error: Option<Error>,
}

impl RaceFuture {
    pub fn new(ids: impl IntoIterator<Item = CoroutineId>) -> RaceFuture {
        RaceFuture {
            waiting: ids.into_iter().collect(),
            first_result: None,
            first_error: None,
        }
    }
}

impl DispatchFuture for RaceFuture {
    fn add_result(&mut self, result: AnyResult) {
        let AnyResult::Coroutine(result) = result else {
            panic!("RaceFuture::add_result fed a CallResult");
        };
        match &result.error {
            Some(error) => {
                if self.first_error.is_none() {
                    self.first_error = Some(error.clone());
                }
            }
            None => {
                if self.first_result.is_none() {
                    self.first_result = Some(result.clone());
                }
            }
        }
        self.waiting.remove(&result.coroutine_id);
    }

    fn add_error(&mut self, error: Error) {
        if self.first_error.is_none() {
            self.first_error = Some(error);
        }
    }

    fn ready(&self) -> bool {
        self.first_error.is_some() || self.first_result.is_some() || self.waiting.is_empty()
    }

    fn error(&self) -> Option<Error> {
        self.first_error.clone()
    }

    fn value(&self) -> Option<crate::value::Value> {
        if self.first_error.is_some() {
            return None;
        }
        self.first_result.as_ref().and_then(|r| r.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;

    fn coro_ok(id: CoroutineId, value: i64) -> AnyResult {
        AnyResult::Coroutine(CoroutineResult {
            coroutine_id: id,
            value: Some(crate::value::encode(&value).unwrap()),
            error: None,
        })
    }

    fn coro_err(id: CoroutineId, message: &str) -> AnyResult {
        AnyResult::Coroutine(CoroutineResult {
            coroutine_id: id,
            value: None,
            error: Some(Error::new(Status::PermanentError, "Err", message)),
        })
    }

    #[test]
    fn call_future_ready_after_first_result() {
        let mut f = CallFuture::default();
        assert!(!f.ready());
        f.add_result(AnyResult::Call(CallResult {
            call_id: 1,
            value: Some(crate::value::encode(&7i64).unwrap()),
            error: None,
        }));
        assert!(f.ready());
        assert!(f.error().is_none());
    }

    #[test]
    fn all_future_fails_fast_on_first_child_error() {
        let mut f = AllFuture::new(vec![1, 2, 3]);
        f.add_result(coro_ok(1, 10));
        assert!(!f.ready());
        f.add_result(coro_err(2, "boom"));
        assert!(f.ready());
        assert_eq!(f.error().unwrap().message, "boom");
        // A late result for the un-awaited third child is simply ignored.
        f.add_result(coro_ok(3, 30));
    }

    #[test]
    fn all_future_preserves_order_independent_of_arrival() {
        let mut f = AllFuture::new(vec![1, 2, 3]);
        f.add_result(coro_ok(3, 3));
        f.add_result(coro_ok(1, 1));
        f.add_result(coro_ok(2, 2));
        assert!(f.ready());
        assert!(f.error().is_none());
        let values: Vec<i64> = f
            .values()
            .iter()
            .map(|v| crate::value::decode(v).unwrap())
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn any_future_resolves_on_first_success_ignoring_later_failures() {
        let mut f = AnyFuture::new(vec![1, 2]);
        f.add_result(coro_ok(1, 42));
        assert!(f.ready());
        assert!(f.error().is_none());
        f.add_result(coro_err(2, "too slow"));
        assert_eq!(crate::value::decode::<i64>(&f.value().unwrap()).unwrap(), 42);
    }

    #[test]
    fn any_future_aggregates_when_every_child_fails() {
        let mut f = AnyFuture::new(vec![1, 2]);
        f.add_result(coro_err(1, "a failed"));
        assert!(!f.ready());
        f.add_result(coro_err(2, "b failed"));
        assert!(f.ready());
        let err = f.error().unwrap();
        assert_eq!(err.r#type, "AnyException");
        assert!(err.message.contains("a failed"));
        assert!(err.message.contains("b failed"));
    }

    #[test]
    fn any_future_single_failure_passes_through_unwrapped() {
        let mut f = AnyFuture::new(vec![1]);
        f.add_result(coro_err(1, "only failure"));
        assert!(f.ready());
        assert_eq!(f.error().unwrap().message, "only failure");
    }

    #[test]
    fn race_future_settles_on_first_arrival_of_either_kind() {
        let mut f = RaceFuture::new([1, 2]);
        f.add_result(coro_err(1, "fast failure"));
        assert!(f.ready());
        assert_eq!(f.error().unwrap().message, "fast failure");
    }
}
