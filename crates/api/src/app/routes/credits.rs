use std::sync::Arc;

use axum::{Json, extract::Extension, response::IntoResponse};

use vectorsmith_core::Actor;

use crate::app::errors;
use crate::app::services::AppServices;

/// GET /credits
pub async fn balance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
) -> axum::response::Response {
    match services.generations().balance(&actor).await {
        Ok(balance) => Json(serde_json::json!({
            "userId": actor.user_id(),
            "balance": balance,
        }))
        .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
