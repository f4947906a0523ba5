pub mod metrics;
pub mod prompt;
