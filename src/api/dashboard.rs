use axum::{Router, extract::State, routing::get};

use crate::{
    error::ApiResult,
    read_models::{ChannelStats, DashboardVideo},
};

use super::{ApiResponse, AppState, CurrentUser};

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/dashboard/stats", get(channel_stats))
        .route("/api/v1/dashboard/videos", get(channel_videos))
}

/// Totals for the signed-in user's own channel.
pub(crate) async fn channel_stats(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<ApiResponse<ChannelStats>> {
    let channel = user.id;
    let stats = state
        .db(move |store| Ok(store.channel_stats(&channel)?))
        .await?;
    Ok(ApiResponse::ok(stats, "Channel stats fetched successfully"))
}

/// Every video of the signed-in user, unpublished ones included.
pub(crate) async fn channel_videos(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<ApiResponse<Vec<DashboardVideo>>> {
    let channel = user.id;
    let videos = state
        .db(move |store| Ok(store.channel_videos(&channel)?))
        .await?;
    Ok(ApiResponse::ok(videos, "Channel videos fetched successfully"))
}
