pub mod app;
pub mod circuit_breaker;
pub mod cli;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod logging;
pub mod moderation;
pub mod rate_limit;
pub mod retry;
pub mod sampler;
pub mod state;
pub mod stream_relay;
pub mod web;
