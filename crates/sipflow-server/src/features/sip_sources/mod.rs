//! SIP source browsing

pub mod routes;

pub use routes::sip_sources_routes;
