//! Minimal usage demo, mirroring `examples/original_source/main.py`: register
//! a couple of functions and serve them. Framework-specific mounting (a
//! particular web framework's router macros, a Lambda adapter, ...) stays out
//! of scope per spec.md §1 — this just wires the generic [`endpoint::router`]
//! into a plain `axum`/`tokio` server using [`config::Config`].

use std::net::SocketAddr;
use std::sync::Arc;

use dispatch_sdk::endpoint::{router, EndpointState};
use dispatch_sdk::registry::{Context, Registry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = dispatch_sdk::config::Config::from_env()?;
    let registry = Registry::new(
        config
            .endpoint_url
            .as_ref()
            .map(|(url, _)| url.clone())
            .unwrap_or_default(),
    );

    registry
        .register("greet_name", |_ctx: Context, name: String| async move {
            Ok::<_, dispatch_sdk::error::DispatchError>(format!("Hello world: {name}"))
        })
        .expect("greet_name registered once");

    registry
        .register("call_concurrently", |ctx: Context, names: Vec<String>| async move {
            let awaitables = names
                .into_iter()
                .map(|n| ctx.awaitable("greet_name", &n))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| dispatch_sdk::error::DispatchError::InvalidArgument(e.to_string()))?;
            Ok::<_, dispatch_sdk::error::DispatchError>(ctx.all::<String>(awaitables).await?)
        })
        .expect("call_concurrently registered once");

    let mut state = EndpointState::new(registry);
    if let Some((key, _)) = config.verification_key {
        state = state.with_verification_key(key);
    }

    let addr: SocketAddr = config.endpoint_addr.0.parse()?;
    tracing::info!(%addr, "starting dispatch endpoint");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(Arc::new(state))).await?;
    Ok(())
}
