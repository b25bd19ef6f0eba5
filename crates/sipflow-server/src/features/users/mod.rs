pub mod routes;

pub use routes::users_routes;
