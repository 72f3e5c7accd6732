//! HTTP server and routes.

mod handlers;
mod state;

pub use state::{AppState, feed_cache, open_cache_store};

use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let catalog_routes = Router::new()
        .route("/", get(handlers::catalog_root))
        .route("/books", get(handlers::catalog_books))
        .route("/books/{id}", get(handlers::catalog_book))
        .route("/search", get(handlers::catalog_search));

    Router::new()
        .route("/opensearch.xml", get(handlers::opensearch))
        .nest("/opds", catalog_routes)
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
