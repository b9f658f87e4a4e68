//! Identifiers used to route results back to the coroutine that issued them.

/// Unique within one scheduler run. `0` is reserved for the root coroutine.
pub type CoroutineId = u32;

/// Unique within one scheduler run.
pub type CallId = u32;

/// Routing token carried on outbound calls: `(coroutine_id << 32) | call_id`.
pub type CorrelationId = u64;

/// Opaque identifier handed back by the orchestrator for a dispatched call.
pub type DispatchId = String;

/// Build a correlation id from a coroutine id and a call id.
pub const fn correlation_id(coroutine_id: CoroutineId, call_id: CallId) -> CorrelationId {
    (coroutine_id as u64) << 32 | call_id as u64
}

/// Extract the coroutine id half of a correlation id.
pub const fn correlation_coroutine_id(id: CorrelationId) -> CoroutineId {
    (id >> 32) as u32
}

/// Extract the call id half of a correlation id.
pub const fn correlation_call_id(id: CorrelationId) -> CallId {
    (id & 0xFFFF_FFFF) as u32
}
