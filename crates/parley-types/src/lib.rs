//! Shared domain types for Parley.
//!
//! This crate contains the types passed between the relay core, the upstream
//! completion source and the HTTP layer: dialogue turns, completion requests,
//! streamed fragments, configuration defaults and their error types.
//!
//! Zero infrastructure dependencies -- only serde and thiserror.

pub mod config;
pub mod error;
pub mod llm;
