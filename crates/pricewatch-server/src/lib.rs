//! Outer surfaces for pricewatch: CLI commands, the HTTP service, and
//! logging setup.

pub mod app;
pub mod cli;
pub mod http;
pub mod logging;
