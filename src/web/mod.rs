//! Web API module: router assembly and its route handlers.

pub mod audio;
pub mod chat;
pub mod images;
pub mod middleware;
pub mod models;
pub mod routes;

pub use routes::create_router;
