//! # sg_app
//!
//! Shared plumbing for binaries that gate work behind `sg_ratelimit` limits

pub mod cli;
pub mod config_loader;
pub mod errors;
pub mod shutdown_handler;
pub mod tracing_setup;
