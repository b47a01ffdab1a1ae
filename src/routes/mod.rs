mod health;
mod predict;
mod status;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/healthcheck", get(health::healthcheck))
        .route("/test-model", get(status::model_status))
        .route("/predict", post(predict::predict))
        .route("/upload", post(predict::upload))
}
