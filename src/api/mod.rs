//! The API layer, containing web handlers and routing.

pub mod handlers;
pub mod router;
pub mod ws;

pub use handlers::ApiDoc;
pub use router::create_router;
