pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod rate_limiter;
pub mod server;
pub mod tasks;

// Layered boundaries: domain types, use cases behind ports, adapters
pub mod app;
pub mod domain;
pub mod infra;

pub mod observability;
