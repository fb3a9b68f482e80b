// Frameworks layer: runtime wiring and environment configuration.

pub mod config;
pub mod server;
