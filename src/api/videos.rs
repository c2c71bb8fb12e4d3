use axum::{
    Router,
    extract::{Multipart, Path, Query, State},
    routing::{get, patch},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    error::{ApiError, ApiResult},
    media::StagedFile,
    models::{User, Video},
    pagination::{Page, PageParams},
    read_models::{VideoCard, VideoDetail, VideoFilter, VideoSort},
    store::NewVideo,
};

use super::{ApiResponse, AppState, CurrentUser, ensure_owner, form, parse_id, required};

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/videos", get(list_videos).post(publish))
        .route(
            "/api/v1/videos/{video_id}",
            get(get_video).patch(update).delete(delete_video),
        )
        .route(
            "/api/v1/videos/toggle/publish/{video_id}",
            patch(toggle_publish),
        )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoListQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub query: Option<String>,
    pub sort_by: Option<String>,
    pub sort_type: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct PublishForm {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Seconds, used when the media backend cannot measure the upload.
    pub duration: Option<String>,
    pub video_file: Option<StagedFile>,
    pub thumbnail: Option<StagedFile>,
}

#[derive(Debug, Default)]
pub struct UpdateVideoForm {
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<StagedFile>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishState {
    pub is_published: bool,
}

pub(crate) async fn list_videos(
    State(state): State<AppState>,
    CurrentUser(_viewer): CurrentUser,
    Query(query): Query<VideoListQuery>,
) -> ApiResult<ApiResponse<Page<VideoCard>>> {
    let page = PageParams::from_query(query.page.as_deref(), query.limit.as_deref());
    let owner = query
        .user_id
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| parse_id(raw, "userId"))
        .transpose()?;
    let sort = VideoSort::parse(query.sort_by.as_deref(), query.sort_type.as_deref())
        .map_err(ApiError::bad_request)?;
    let filter = VideoFilter {
        query: query.query.filter(|q| !q.trim().is_empty()),
        owner,
        sort,
    };
    let videos = state
        .db(move |store| Ok(store.list_videos(&filter, page)?))
        .await?;
    Ok(ApiResponse::ok(videos, "Videos fetched successfully"))
}

async fn publish(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    multipart: Multipart,
) -> ApiResult<ApiResponse<Video>> {
    let mut form = form::read(&state, multipart).await?;
    let input = PublishForm {
        title: form.text("title").map(str::to_string),
        description: form.text("description").map(str::to_string),
        duration: form.text("duration").map(str::to_string),
        video_file: form.take_file("videoFile"),
        thumbnail: form.take_file("thumbnail"),
    };
    let video = publish_video(&state, &user, input).await?;
    Ok(ApiResponse::created(video, "Video uploaded successfully"))
}

pub async fn publish_video(state: &AppState, user: &User, input: PublishForm) -> ApiResult<Video> {
    let title = required(input.title.as_deref(), "title")?;
    let description = required(input.description.as_deref(), "description")?;
    let declared_duration = match input.duration.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<f64>()
                .ok()
                .filter(|d| d.is_finite() && *d >= 0.0)
                .ok_or_else(|| ApiError::bad_request("duration must be a non-negative number"))?,
        ),
    };
    let video_file = input
        .video_file
        .ok_or_else(|| ApiError::bad_request("videoFile is required"))?;
    let thumbnail = input
        .thumbnail
        .ok_or_else(|| ApiError::bad_request("thumbnail is required"))?;

    let uploaded_video = state.upload(&video_file).await?;
    let uploaded_thumbnail = state.upload(&thumbnail).await?;

    let new = NewVideo {
        owner: user.id.clone(),
        title,
        description,
        duration: uploaded_video
            .duration
            .or(declared_duration)
            .unwrap_or_default(),
        video_file: uploaded_video.asset(),
        thumbnail: uploaded_thumbnail.asset(),
    };
    let video = state.db(move |store| Ok(store.create_video(&new)?)).await?;
    log::info!("user {} published video {}", user.id, video.id);
    Ok(video)
}

async fn get_video(
    State(state): State<AppState>,
    CurrentUser(viewer): CurrentUser,
    Path(video_id): Path<String>,
) -> ApiResult<ApiResponse<VideoDetail>> {
    let detail = watch_video(&state, &viewer, &video_id).await?;
    Ok(ApiResponse::ok(detail, "Video details fetched successfully"))
}

/// Counts a view, records it in the viewer's history and returns the detail
/// view. The three steps are independent writes; the returned view already
/// includes this call's view.
pub async fn watch_video(state: &AppState, viewer: &User, raw_id: &str) -> ApiResult<VideoDetail> {
    let video_id = parse_id(raw_id, "videoId")
        .map_err(|_| ApiError::not_found("Video not found"))?;
    let viewer_id = viewer.id.clone();
    state
        .db(move |store| {
            if !store.increment_views(&video_id)? {
                return Err(ApiError::not_found("Video not found"));
            }
            store.add_to_watch_history(&viewer_id, &video_id)?;
            store
                .video_detail(&video_id, &viewer_id)?
                .ok_or_else(|| ApiError::not_found("Video not found"))
        })
        .await
}

async fn update(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(video_id): Path<String>,
    multipart: Multipart,
) -> ApiResult<ApiResponse<Video>> {
    let mut form = form::read(&state, multipart).await?;
    let input = UpdateVideoForm {
        title: form.text("title").map(str::to_string),
        description: form.text("description").map(str::to_string),
        thumbnail: form.take_file("thumbnail"),
    };
    let video = update_video(&state, &user, &video_id, input).await?;
    Ok(ApiResponse::ok(video, "Video updated successfully"))
}

/// Replaces title, description and thumbnail. The previous thumbnail is
/// deleted only after the new one is persisted.
pub async fn update_video(
    state: &AppState,
    user: &User,
    raw_id: &str,
    input: UpdateVideoForm,
) -> ApiResult<Video> {
    let video_id = parse_id(raw_id, "videoId")?;
    let title = required(input.title.as_deref(), "title")?;
    let description = required(input.description.as_deref(), "description")?;
    let thumbnail = input
        .thumbnail
        .ok_or_else(|| ApiError::bad_request("thumbnail is required"))?;

    let existing = find_owned_video(state, user, &video_id, "edit this video").await?;
    let uploaded = state.upload(&thumbnail).await?.asset();
    let updated = state
        .db(move |store| {
            store
                .update_video_details(&video_id, &title, &description, &uploaded)?
                .ok_or_else(|| ApiError::not_found("Video not found"))
        })
        .await?;
    state.discard_media(&existing.thumbnail).await;
    Ok(updated)
}

async fn delete_video(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(video_id): Path<String>,
) -> ApiResult<ApiResponse<Value>> {
    remove_video(&state, &user, &video_id).await?;
    Ok(ApiResponse::ok(json!({}), "Video deleted successfully"))
}

/// Deletes the video row, then its media. Comments, likes and playlist
/// entries that reference it stay behind.
pub async fn remove_video(state: &AppState, user: &User, raw_id: &str) -> ApiResult<()> {
    let video_id = parse_id(raw_id, "videoId")?;
    let existing = find_owned_video(state, user, &video_id, "delete this video").await?;
    let deleted = state
        .db(move |store| Ok(store.delete_video(&video_id)?))
        .await?;
    if !deleted {
        return Err(ApiError::not_found("Video not found"));
    }
    state.discard_media(&existing.video_file).await;
    state.discard_media(&existing.thumbnail).await;
    Ok(())
}

async fn toggle_publish(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(video_id): Path<String>,
) -> ApiResult<ApiResponse<PublishState>> {
    let toggled = toggle_publish_status(&state, &user, &video_id).await?;
    Ok(ApiResponse::ok(toggled, "Video publish status toggled successfully"))
}

pub async fn toggle_publish_status(
    state: &AppState,
    user: &User,
    raw_id: &str,
) -> ApiResult<PublishState> {
    let video_id = parse_id(raw_id, "videoId")?;
    let existing = find_owned_video(state, user, &video_id, "change this video").await?;
    let updated = state
        .db(move |store| {
            store
                .set_video_published(&video_id, !existing.is_published)?
                .ok_or_else(|| ApiError::not_found("Video not found"))
        })
        .await?;
    Ok(PublishState {
        is_published: updated.is_published,
    })
}

async fn find_owned_video(
    state: &AppState,
    user: &User,
    video_id: &str,
    action: &str,
) -> ApiResult<Video> {
    let id = video_id.to_string();
    let video = state
        .db(move |store| {
            store
                .find_video(&id)?
                .ok_or_else(|| ApiError::not_found("Video not found"))
        })
        .await?;
    ensure_owner(&video.owner, user, action)?;
    Ok(video)
}
