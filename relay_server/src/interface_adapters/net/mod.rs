// Network adapter for external client sockets.

pub mod client;

pub use client::ws_handler;
