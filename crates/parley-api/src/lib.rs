//! HTTP surface of the Parley prompt relay: configuration, server lifecycle,
//! and handlers.

pub mod config;
pub mod http;
pub mod metrics;
pub mod state;
