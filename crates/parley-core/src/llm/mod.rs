//! Completion source abstractions for Parley.
//!
//! - `CompletionSource`: RPITIT trait for concrete upstream implementations
//! - `BoxCompletionSource`: object-safe wrapper for dynamic dispatch

pub mod box_source;
pub mod source;
