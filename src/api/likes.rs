use axum::{
    Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Serialize;

use crate::{
    error::{ApiError, ApiResult},
    models::{LikeTarget, User},
    read_models::LikedVideo,
    store::Store,
};

use super::{ApiResponse, AppState, CurrentUser, parse_id};

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/likes/toggle/v/{video_id}", post(toggle_video_like))
        .route(
            "/api/v1/likes/toggle/c/{comment_id}",
            post(toggle_comment_like),
        )
        .route("/api/v1/likes/toggle/t/{tweet_id}", post(toggle_tweet_like))
        .route("/api/v1/likes/videos", get(liked_videos))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeState {
    pub is_liked: bool,
}

async fn toggle_video_like(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(video_id): Path<String>,
) -> ApiResult<ApiResponse<LikeState>> {
    let target = LikeTarget::Video(parse_id(&video_id, "videoId")?);
    respond(toggle_like(&state, &user, target).await?)
}

async fn toggle_comment_like(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(comment_id): Path<String>,
) -> ApiResult<ApiResponse<LikeState>> {
    let target = LikeTarget::Comment(parse_id(&comment_id, "commentId")?);
    respond(toggle_like(&state, &user, target).await?)
}

async fn toggle_tweet_like(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(tweet_id): Path<String>,
) -> ApiResult<ApiResponse<LikeState>> {
    let target = LikeTarget::Tweet(parse_id(&tweet_id, "tweetId")?);
    respond(toggle_like(&state, &user, target).await?)
}

fn respond(like: LikeState) -> ApiResult<ApiResponse<LikeState>> {
    let message = if like.is_liked {
        "Liked successfully"
    } else {
        "Unliked successfully"
    };
    Ok(ApiResponse::ok(like, message))
}

/// Removes the viewer's like on `target` if there is one, otherwise adds it.
/// The lookup and the write are separate statements, so two concurrent
/// toggles by the same user can both insert.
pub async fn toggle_like(state: &AppState, user: &User, target: LikeTarget) -> ApiResult<LikeState> {
    let liked_by = user.id.clone();
    state
        .db(move |store| {
            ensure_target_exists(store, &target)?;
            match store.find_like(&liked_by, &target)? {
                Some(existing) => {
                    store.delete_like(&existing.id)?;
                    Ok(LikeState { is_liked: false })
                }
                None => {
                    store.create_like(&liked_by, &target)?;
                    Ok(LikeState { is_liked: true })
                }
            }
        })
        .await
}

fn ensure_target_exists(store: &Store, target: &LikeTarget) -> ApiResult<()> {
    let found = match target {
        LikeTarget::Video(id) => store.find_video(id)?.is_some(),
        LikeTarget::Comment(id) => store.find_comment(id)?.is_some(),
        LikeTarget::Tweet(id) => store.find_tweet(id)?.is_some(),
    };
    if found {
        return Ok(());
    }
    let what = match target {
        LikeTarget::Video(_) => "Video",
        LikeTarget::Comment(_) => "Comment",
        LikeTarget::Tweet(_) => "Tweet",
    };
    Err(ApiError::not_found(format!("{what} not found")))
}

async fn liked_videos(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<ApiResponse<Vec<LikedVideo>>> {
    let viewer = user.id;
    let liked = state
        .db(move |store| Ok(store.liked_videos(&viewer)?))
        .await?;
    Ok(ApiResponse::ok(liked, "Liked videos fetched successfully"))
}
