use axum::{
    Router,
    routing::{get, patch, post, put},
};

pub mod credits;
pub mod generations;
pub mod system;

/// Router for all endpoints that need an identity.
pub fn router() -> Router {
    Router::new()
        .route("/generations", post(generations::create_generation).get(generations::list_generations))
        .route("/generations/stream", post(generations::stream_generation))
        .route("/generations/:id", get(generations::get_generation))
        .route("/generations/:id/versions", post(generations::append_version))
        .route("/generations/:id/visibility", patch(generations::set_visibility))
        .route("/versions/:id", put(generations::update_version))
        .route("/credits", get(credits::balance))
}
