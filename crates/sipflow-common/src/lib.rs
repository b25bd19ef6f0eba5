//! Sipflow Common Library
//!
//! Shared utilities for the sipflow workspace members.
//!
//! - **Logging**: tracing subscriber setup driven by `LOG_*` variables
//! - **Environment**: typed readers for configuration variables
//!
//! # Example
//!
//! ```no_run
//! use sipflow_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod env;
pub mod logging;

pub use env::EnvError;
