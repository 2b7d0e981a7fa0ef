//! Command implementations for the EchoTwin CLI.

pub mod configure;
pub mod fetch;
pub mod probe;
pub mod sanitize;
pub mod show_config;
pub mod train;
