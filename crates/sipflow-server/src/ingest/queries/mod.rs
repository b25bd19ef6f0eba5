//! Ingest queries

pub mod download;
pub mod sip_sources;
pub mod sips;
pub mod users;

pub use download::DownloadMeta;
pub use sip_sources::ListSipSourceObjectsQuery;
pub use sips::{ListSipsQuery, SipsPage};
pub use users::{ListUsersQuery, UsersPage};
