use axum::{Router, routing::get};

pub mod cargo;
pub mod inventory;
pub mod stream;
pub mod system;
pub mod trades;

/// Router for every resource endpoint (`/health` is wired separately).
pub fn router() -> Router {
    Router::new()
        .route("/stream", get(stream::stream))
        .nest("/trades", trades::router())
        .nest("/cargo", cargo::router())
        .nest("/inventory", inventory::router())
}
