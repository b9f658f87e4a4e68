//! A durable asynchronous function execution SDK.
//!
//! Applications [`registry::Registry::register`] coroutine-like functions
//! and expose them over an HTTP [`endpoint`]. An external orchestrator calls
//! in, the [`scheduler`] drives every ready coroutine to its next suspension
//! point, and either a terminal result or a poll directive (serialized
//! coroutine state plus outbound calls) comes back. See `DESIGN.md` for how
//! each module maps onto the source this was ported from.

pub mod client;
pub mod config;
pub mod coroutine;
pub mod endpoint;
pub mod error;
pub mod future;
pub mod id;
pub mod pb;
pub mod proto;
pub mod registry;
pub mod scheduler;
pub mod signature;
pub mod status;
pub mod testing;
pub mod value;

pub mod prelude {
    pub use crate::coroutine::Awaitable;
    pub use crate::error::DispatchError;
    pub use crate::registry::{Context, Registry};
    pub use crate::status::Status;
}
