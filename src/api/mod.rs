//! REST surface over the catalog: handlers and routing.

pub mod handlers;
pub mod routes;

pub use routes::create_router;
