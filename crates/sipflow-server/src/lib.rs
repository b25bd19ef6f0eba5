//! Sipflow Server Library
//!
//! Ingest core of a digital preservation system: it accepts Submission
//! Information Packages (SIPs), starts a processing workflow per SIP on an
//! external workflow engine and records what the workflow reports.
//!
//! # Overview
//!
//! - **Persistence**: SIPs, workflows, tasks, users and batches in SQLite
//!   with SQLx, filtered and paged listings
//! - **Events**: in-process fan-out of every change to monitor clients and
//!   the audit log
//! - **Ingest**: the coordinator behind every public operation
//! - **Auth**: bearer token verification, attribute checks and single-use
//!   tickets for streaming endpoints
//! - **Buckets**: S3 compatible and in-memory object stores for uploads,
//!   failed packages and the SIP source
//! - **Storage API**: OIDC authenticated client of the storage service
//!
//! # Architecture
//!
//! HTTP handlers in [`features`] extract the caller, check attributes and
//! delegate to [`ingest::IngestService`]. The service writes through the
//! [`persistence::Service`] trait and publishes an [`event::IngestEvent`]
//! once the write has committed.
//!
//! # Example
//!
//! ```no_run
//! use sipflow_server::config::Config;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     println!("listening on {}:{}", config.server.host, config.server.port);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod audit;
pub mod auth;
pub mod bucket;
pub mod childwf;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod features;
pub mod ingest;
pub mod middleware;
pub mod models;
pub mod oidc;
pub mod persistence;
pub mod sipsource;
pub mod storage_client;
pub mod timerange;

// Re-export commonly used types
pub use error::ErrorBody;
pub use ingest::{IngestError, IngestService};
