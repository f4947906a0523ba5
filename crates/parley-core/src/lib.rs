//! Conversation logic for Parley.
//!
//! This crate defines the [`llm::source::CompletionSource`] port that the
//! infrastructure layer implements, the [`relay::StreamRelay`] that turns an
//! upstream stream into a bounded fragment channel, and the
//! [`session::ConversationSession`] that owns the dialogue history. It
//! depends only on `parley-types` and tokio -- never on `parley-infra`.

pub mod llm;
pub mod relay;
pub mod session;
