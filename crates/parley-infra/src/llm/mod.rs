//! Upstream completion source implementations.
//!
//! Contains concrete implementations of the [`CompletionSource`] trait
//! defined in `parley-core`.
//!
//! [`CompletionSource`]: parley_core::llm::source::CompletionSource

pub mod openai_compat;
