//! The process-wide registry of named functions: a qualified name maps to a
//! constructor that, given a [`Scope`] and an encoded [`Value`], produces the
//! future driving that invocation. Registration is a plain method call rather
//! than a decorator, since Rust has no equivalent syntax.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::client::DispatchClient;
use crate::coroutine::{Awaitable, Scope};
use crate::error::DispatchError;
use crate::id::DispatchId;
use crate::proto::{self, Call};
use crate::status::Status;
use crate::value::{self, Value};

/// The future a constructed coroutine drives. Not `Send`: the scheduler polls
/// it synchronously, to completion or suspension, within a single stack
/// frame — no real concurrency inside one invocation — so the `Rc<Scope>` it
/// closes over never needs to cross a thread.
pub type BoxFuture = Pin<Box<dyn Future<Output = Result<Value, proto::Error>>>>;

/// Stored per registered function. Must itself be `Send + Sync` — unlike the
/// futures it produces — so [`Registry`] can be shared across an async HTTP
/// server's worker threads.
type Constructor = dyn Fn(Rc<Scope>, Value) -> BoxFuture + Send + Sync;

/// A handle to the [`Scope`] of the coroutine currently executing, threaded
/// through a registered function's body in place of a raw await primitive.
#[derive(Clone)]
pub struct Context {
    scope: Rc<Scope>,
}

impl Context {
    fn new(scope: Rc<Scope>) -> Context {
        Context { scope }
    }

    /// Build an [`Awaitable`] referencing another registered function, for
    /// use with [`Context::all`], [`Context::any`] or [`Context::race`].
    pub fn awaitable<T: Serialize>(
        &self,
        function: impl Into<String>,
        input: &T,
    ) -> Result<Awaitable, value::CodecError> {
        Ok(Awaitable {
            function: function.into(),
            input: value::encode(input)?,
        })
    }

    /// Call another registered function and await its result.
    pub async fn call<T: Serialize, U: DeserializeOwned>(
        &self,
        function: impl Into<String>,
        input: &T,
    ) -> Result<U, proto::Error> {
        let encoded = value::encode(input).map_err(codec_error)?;
        let value = self.scope.call(function, encoded).await?;
        value::decode(&value).map_err(codec_error)
    }

    /// Run every awaitable concurrently and collect all results in order,
    /// failing fast on the first error.
    pub async fn all<U: DeserializeOwned>(
        &self,
        awaitables: Vec<Awaitable>,
    ) -> Result<Vec<U>, proto::Error> {
        let values = self.scope.all(awaitables).await?;
        values.into_iter().map(|v| value::decode(&v).map_err(codec_error)).collect()
    }

    /// Resolve with the first awaitable to succeed; if every one fails, the
    /// error aggregates all of them.
    pub async fn any<U: DeserializeOwned>(
        &self,
        awaitables: Vec<Awaitable>,
    ) -> Result<U, proto::Error> {
        let value = self.scope.any(awaitables).await?;
        value::decode(&value).map_err(codec_error)
    }

    /// Resolve with whichever awaitable settles first, success or failure
    /// (spec.md C4 `race`).
    pub async fn race<U: DeserializeOwned>(
        &self,
        awaitables: Vec<Awaitable>,
    ) -> Result<U, proto::Error> {
        let value = self.scope.race(awaitables).await?;
        value::decode(&value).map_err(codec_error)
    }
}

fn codec_error(err: value::CodecError) -> proto::Error {
    proto::Error::new(Status::InvalidResponse, "CodecError", err.to_string())
}

/// A registered function. Cheap to clone; `name` and a weak link back to the
/// owning [`Registry`] are all it carries, mirroring `function.py`'s
/// `PrimitiveFunction`/`Function` split without the inheritance.
pub struct FunctionHandle<Args, Out> {
    name: String,
    endpoint: String,
    client: Option<Arc<DispatchClient>>,
    _marker: std::marker::PhantomData<fn(Args) -> Out>,
}

impl<Args, Out> Clone for FunctionHandle<Args, Out> {
    fn clone(&self) -> Self {
        FunctionHandle {
            name: self.name.clone(),
            endpoint: self.endpoint.clone(),
            client: self.client.clone(),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<Args: Serialize, Out> FunctionHandle<Args, Out> {
    /// Build a [`Call`] for this function, for use with a [`DispatchClient`]
    /// batch or `Context::call`-style composition (`function.py`'s
    /// `build_call`).
    pub fn build_call(&self, args: &Args) -> Result<Call, value::CodecError> {
        Ok(Call {
            function: self.name.clone(),
            input: value::encode(args)?,
            endpoint: Some(self.endpoint.clone()),
            correlation_id: None,
        })
    }

    /// Dispatch an asynchronous call to this function without waiting for a
    /// result (`function.py`'s `Function.dispatch`). Requires the owning
    /// [`Registry`] to have been configured with a [`DispatchClient`] via
    /// [`Registry::set_client`].
    pub async fn dispatch(&self, args: &Args) -> Result<DispatchId, DispatchError> {
        let client = self.client.as_ref().ok_or_else(|| {
            DispatchError::Permanent(
                "no Dispatch client configured: call Registry::set_client first".into(),
            )
        })?;
        let call = self
            .build_call(args)
            .map_err(|e| DispatchError::InvalidArgument(e.to_string()))?;
        let mut ids = client.dispatch(vec![call]).await?;
        ids.pop()
            .ok_or_else(|| DispatchError::Permanent("dispatch returned no ids".into()))
    }
}

/// Process-wide table of named functions an endpoint can invoke, plus the
/// endpoint URL and (optionally) a client used for fire-and-forget dispatch.
/// Grounded in `function.py`'s `Registry`.
pub struct Registry {
    functions: RwLock<HashMap<String, Arc<Constructor>>>,
    endpoint: RwLock<String>,
    client: RwLock<Option<Arc<DispatchClient>>>,
}

impl Registry {
    pub fn new(endpoint: impl Into<String>) -> Registry {
        Registry {
            functions: RwLock::new(HashMap::new()),
            endpoint: RwLock::new(endpoint.into()),
            client: RwLock::new(None),
        }
    }

    /// Register an async function body. Returns a [`FunctionHandle`] usable
    /// to build calls to it or dispatch it fire-and-forget.
    ///
    /// # Errors
    /// Returns [`DispatchError::Permanent`] if `name` is already registered
    /// (`function.py`'s `_register` raises `ValueError` for the same case).
    pub fn register<Args, Out, F, Fut>(
        &self,
        name: impl Into<String>,
        f: F,
    ) -> Result<FunctionHandle<Args, Out>, DispatchError>
    where
        Args: DeserializeOwned + 'static,
        Out: Serialize + 'static,
        F: Fn(Context, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, DispatchError>> + 'static,
    {
        let name = name.into();
        let f = Arc::new(f);
        let type_name = std::any::type_name::<F>();
        let ctor: Arc<Constructor> = Arc::new(move |scope: Rc<Scope>, input: Value| {
            let f = f.clone();
            let type_name = type_name.to_string();
            let fut: BoxFuture = Box::pin(async move {
                let args: Args = value::decode(&input).map_err(|e| {
                    proto::Error::new(
                        Status::InvalidArgument,
                        "InvalidArgument",
                        format!("incorrect input for '{type_name}': {e}"),
                    )
                })?;
                let ctx = Context::new(scope);
                match f(ctx, args).await {
                    Ok(out) => value::encode(&out).map_err(|e| {
                        proto::Error::new(Status::PermanentError, "EncodeError", e.to_string())
                    }),
                    Err(err) => Err(proto::Error::new(
                        err.status(),
                        error_variant_name(&err),
                        err.to_string(),
                    )),
                }
            });
            fut
        });

        let mut functions = self.functions.write().unwrap();
        if functions.contains_key(&name) {
            return Err(DispatchError::Permanent(format!(
                "function already registered with name '{name}'"
            )));
        }
        functions.insert(name.clone(), ctor);
        drop(functions);

        Ok(FunctionHandle {
            name,
            endpoint: self.endpoint.read().unwrap().clone(),
            client: self.client.read().unwrap().clone(),
            _marker: std::marker::PhantomData,
        })
    }

    /// Look up a registered function and build the future for one
    /// invocation. Used by [`crate::scheduler::Scheduler`] to construct both
    /// the root coroutine and every child spawned by `all`/`any`/`race`.
    pub(crate) fn construct(
        &self,
        name: &str,
        scope: Rc<Scope>,
        input: Value,
    ) -> Result<BoxFuture, DispatchError> {
        let functions = self.functions.read().unwrap();
        let ctor = functions
            .get(name)
            .ok_or_else(|| DispatchError::NotFound(format!("function '{name}' is not registered")))?
            .clone();
        drop(functions);
        Ok(ctor(scope, input))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.read().unwrap().contains_key(name)
    }

    /// Dispatch a call to a registered function by name, without building a
    /// [`FunctionHandle`] first (`registry.py`'s `FunctionRegistry.call`).
    pub async fn dispatch_one<T: Serialize>(
        &self,
        name: &str,
        input: &T,
    ) -> Result<DispatchId, DispatchError> {
        if !self.contains(name) {
            return Err(DispatchError::NotFound(format!(
                "function '{name}' is not registered"
            )));
        }
        let client = self.client.read().unwrap().clone().ok_or_else(|| {
            DispatchError::Permanent(
                "no Dispatch client configured: call Registry::set_client first".into(),
            )
        })?;
        let call = Call {
            function: name.to_string(),
            input: value::encode(input).map_err(|e| DispatchError::InvalidArgument(e.to_string()))?,
            endpoint: Some(self.endpoint.read().unwrap().clone()),
            correlation_id: None,
        };
        let mut ids = client.dispatch(vec![call]).await?;
        ids.pop()
            .ok_or_else(|| DispatchError::Permanent("dispatch returned no ids".into()))
    }

    /// Set (or replace) the client used for fire-and-forget dispatch.
    /// Existing [`FunctionHandle`]s are not retroactively updated — re-fetch
    /// them after calling this, matching `function.py`'s `set_client` note
    /// that new handles pick up the latest client.
    pub fn set_client(&self, client: DispatchClient) {
        *self.client.write().unwrap() = Some(Arc::new(client));
    }

    pub fn set_endpoint(&self, endpoint: impl Into<String>) {
        *self.endpoint.write().unwrap() = endpoint.into();
    }

    pub fn endpoint(&self) -> String {
        self.endpoint.read().unwrap().clone()
    }
}

fn error_variant_name(err: &DispatchError) -> &'static str {
    match err {
        DispatchError::Timeout(_) => "TimeoutError",
        DispatchError::Throttled(_) => "ThrottleError",
        DispatchError::InvalidArgument(_) => "InvalidArgumentError",
        DispatchError::InvalidResponse(_) => "InvalidResponseError",
        DispatchError::Temporary(_) => "TemporaryError",
        DispatchError::Permanent(_) => "PermanentError",
        DispatchError::IncompatibleState(_) => "IncompatibleStateError",
        DispatchError::Dns(_) => "DNSError",
        DispatchError::Tcp(_) => "TCPError",
        DispatchError::Tls(_) => "TLSError",
        DispatchError::Http(_) => "HTTPError",
        DispatchError::Unauthenticated(_) => "UnauthenticatedError",
        DispatchError::PermissionDenied(_) => "PermissionDeniedError",
        DispatchError::NotFound(_) => "NotFoundError",
    }
}
