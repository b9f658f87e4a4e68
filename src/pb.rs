//! Generated protobuf types for the `dispatch.sdk.v1` package.
//!
//! Kept as a thin `include!` wrapper so hand-written code never touches
//! `OUT_DIR` directly.

#![allow(clippy::derive_partial_eq_without_eq)]

include!(concat!(env!("OUT_DIR"), "/dispatch.sdk.v1.rs"));
