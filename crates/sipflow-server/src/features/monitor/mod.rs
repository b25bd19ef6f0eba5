//! Live event stream over WebSocket
//!
//! Clients first `POST /monitor` for a ticket, which is set as a cookie, then
//! open the WebSocket with `GET /monitor`.

pub mod routes;

pub use routes::monitor_routes;
