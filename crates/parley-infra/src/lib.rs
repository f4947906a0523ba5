//! Infrastructure layer for Parley.
//!
//! Contains the implementations of the ports defined in `parley-core`:
//! currently the OpenAI-compatible chat-completions streaming client.

pub mod llm;
