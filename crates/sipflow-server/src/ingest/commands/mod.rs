//! Ingest commands
//!
//! Operations that write through persistence, start or signal workflows and
//! publish the resulting events.

pub mod lifecycle;
pub mod review;
pub mod submit;
pub mod upload;

pub use review::{ConfirmSipCommand, RejectSipCommand};
pub use submit::{SubmitSipCommand, SubmitSipResponse};
pub use upload::UploadSipResponse;
