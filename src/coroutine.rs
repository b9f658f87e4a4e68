//! The durable coroutine surface: the `Scope` a registered function body
//! awaits through, and the directive vocabulary those awaits produce.
//!
//! Rust has no way to serialize an arbitrary future's internal state, so
//! durability is built on history replay instead: [`Scope`] records the
//! ordered settlement of every await point a coroutine has already completed
//! (its `history`). `restore()`-ing a suspended coroutine means calling the
//! registered function again from scratch with that history preloaded: every
//! await up to the point already recorded resolves synchronously without a
//! real suspend (`Scope::replay_next`), and only the first *new* await — the
//! frontier — performs a two-phase halted/running suspend (`Poll::Pending`
//! the first time through, `Poll::Ready` the second).

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::proto::Error;
use crate::value::Value;

/// What a coroutine yielded when it suspended: the unit of work the
/// scheduler must hand to the orchestrator (a `Call`) or resolve locally by
/// spawning child coroutines (`All`/`Any`/`Race`).
#[derive(Debug, Clone)]
pub enum Directive {
    Call {
        function: String,
        input: Value,
        endpoint: Option<String>,
    },
    All(Vec<Awaitable>),
    Any(Vec<Awaitable>),
    Race(Vec<Awaitable>),
}

/// One operand of an `all`/`any`/`race` directive: a call to another
/// registered function, to be run as an independent child coroutine.
#[derive(Debug, Clone)]
pub struct Awaitable {
    pub function: String,
    pub input: Value,
}

/// The settled outcome of one await point, recorded in history so a
/// restored coroutine can replay past it without re-suspending.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Settlement {
    Call(Result<Value, Error>),
    All(Result<Vec<Value>, Error>),
    Any(Result<Value, Error>),
    Race(Result<Value, Error>),
}

enum AwaitState {
    /// Already known from history — resolves on the very first poll.
    Replayed(Settlement),
    /// Fresh await point: first poll records the directive and suspends.
    Running,
    /// Suspended; the next poll consumes whatever `Scope::resume` was fed.
    Halted,
}

/// Threaded through a registered function's body in place of a raw
/// `Future`-yielding primitive. Every `Scope::call` / `all` / `any` / `race`
/// either replays instantly from history or genuinely suspends, recording
/// the [`Directive`] the scheduler must act on.
pub struct Scope {
    history: Vec<Settlement>,
    cursor: Cell<usize>,
    directive: RefCell<Option<Directive>>,
    resume: RefCell<Option<Settlement>>,
}

impl Scope {
    pub fn new(history: Vec<Settlement>) -> Scope {
        Scope {
            history,
            cursor: Cell::new(0),
            directive: RefCell::new(None),
            resume: RefCell::new(None),
        }
    }

    fn replay_next(&self) -> Option<Settlement> {
        let i = self.cursor.get();
        let entry = self.history.get(i).cloned();
        if entry.is_some() {
            self.cursor.set(i + 1);
        }
        entry
    }

    /// Whether every history entry has been consumed — the coroutine has
    /// reached its frontier and the next await, if any, is genuinely new.
    pub fn at_frontier(&self) -> bool {
        self.cursor.get() == self.history.len()
    }

    /// Taken by the driver right after a poll returns `Pending`: the
    /// directive the coroutine just yielded.
    pub fn take_directive(&self) -> Option<Directive> {
        self.directive.borrow_mut().take()
    }

    /// Fed by the driver before re-polling a halted coroutine.
    pub fn put_resume(&self, settlement: Settlement) {
        *self.resume.borrow_mut() = Some(settlement);
    }

    pub fn call(&self, function: impl Into<String>, input: Value) -> CallAwait<'_> {
        let function = function.into();
        let directive = Directive::Call {
            function,
            input,
            endpoint: None,
        };
        CallAwait::new(self, directive)
    }

    pub fn all(&self, awaitables: Vec<Awaitable>) -> AllAwait<'_> {
        AllAwait::new(self, Directive::All(awaitables))
    }

    pub fn any(&self, awaitables: Vec<Awaitable>) -> AnyAwait<'_> {
        AnyAwait::new(self, Directive::Any(awaitables))
    }

    pub fn race(&self, awaitables: Vec<Awaitable>) -> RaceAwait<'_> {
        RaceAwait::new(self, Directive::Race(awaitables))
    }
}

macro_rules! await_future {
    ($name:ident, $settle:path, $output:ty) => {
        #[must_use = "futures do nothing unless you `.await` or poll them"]
        pub struct $name<'a> {
            scope: &'a Scope,
            directive: Option<Directive>,
            state: AwaitState,
        }

        impl<'a> $name<'a> {
            fn new(scope: &'a Scope, directive: Directive) -> Self {
                match scope.replay_next() {
                    Some(settlement) => $name {
                        scope,
                        directive: None,
                        state: AwaitState::Replayed(settlement),
                    },
                    None => $name {
                        scope,
                        directive: Some(directive),
                        state: AwaitState::Running,
                    },
                }
            }
        }

        impl Future for $name<'_> {
            type Output = Result<$output, Error>;

            fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
                match &self.state {
                    AwaitState::Replayed(_) => {
                        let AwaitState::Replayed(settlement) =
                            std::mem::replace(&mut self.state, AwaitState::Halted)
                        else {
                            unreachable!()
                        };
                        Poll::Ready(settle(settlement))
                    }
                    AwaitState::Running => {
                        *self.scope.directive.borrow_mut() = self.directive.take();
                        self.state = AwaitState::Halted;
                        Poll::Pending
                    }
                    AwaitState::Halted => {
                        let settlement = self
                            .scope
                            .resume
                            .borrow_mut()
                            .take()
                            .expect("coroutine resumed before its await point was fed a result");
                        Poll::Ready(settle(settlement))
                    }
                }
            }
        }

        fn settle(settlement: Settlement) -> Result<$output, Error> {
            match settlement {
                $settle(result) => result,
                other => panic!(
                    concat!(stringify!($name), " fed the wrong settlement kind: {:?}"),
                    other
                ),
            }
        }
    };
}

await_future!(CallAwait, Settlement::Call, Value);
await_future!(AllAwait, Settlement::All, Vec<Value>);
await_future!(AnyAwait, Settlement::Any, Value);
await_future!(RaceAwait, Settlement::Race, Value);
