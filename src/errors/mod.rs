//! # Error Handling
//!
//! Error types for the Flowgate control plane, built on `thiserror`.
//!
//! User-input problems never surface here: they become Conditions on the
//! smallest affected resource. This module covers misrouted input,
//! broken invariants and I/O at the process edges.

pub mod types;

pub use types::{FlowgateError, Result};
