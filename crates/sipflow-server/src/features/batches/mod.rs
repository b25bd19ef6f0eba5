pub mod routes;

pub use routes::batches_routes;
