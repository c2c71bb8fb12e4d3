use axum::{Router, routing::get};
use serde::Serialize;

use crate::error::ApiResult;

use super::{ApiResponse, AppState};

pub(crate) fn routes() -> Router<AppState> {
    Router::new().route("/api/v1/healthcheck", get(healthcheck))
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Health {
    pub status: &'static str,
}

pub(crate) async fn healthcheck() -> ApiResult<ApiResponse<Health>> {
    Ok(ApiResponse::ok(Health { status: "OK" }, "Health check passed"))
}
