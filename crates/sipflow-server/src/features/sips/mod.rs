//! SIP endpoints: submission, upload, listing, review and failed downloads

pub mod routes;

pub use routes::sips_routes;
