use axum::{
    Router,
    extract::{Path, State},
    routing::{get, patch, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    error::{ApiError, ApiResult},
    models::{Playlist, User},
    read_models::{PlaylistContents, PlaylistSummary},
    store::Store,
};

use super::{ApiJson, ApiResponse, AppState, CurrentUser, ensure_owner, parse_id, required};

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/playlists", post(create))
        .route(
            "/api/v1/playlists/{playlist_id}",
            get(get_playlist).patch(update).delete(delete),
        )
        .route(
            "/api/v1/playlists/add/{video_id}/{playlist_id}",
            patch(add_video),
        )
        .route(
            "/api/v1/playlists/remove/{video_id}/{playlist_id}",
            patch(remove_video),
        )
        .route("/api/v1/playlists/user/{user_id}", get(list_for_user))
}

#[derive(Debug, Default, Deserialize)]
pub struct PlaylistRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

async fn create(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<PlaylistRequest>,
) -> ApiResult<ApiResponse<Playlist>> {
    let playlist = create_playlist(&state, &user, input).await?;
    Ok(ApiResponse::created(playlist, "Playlist created successfully"))
}

pub async fn create_playlist(
    state: &AppState,
    user: &User,
    input: PlaylistRequest,
) -> ApiResult<Playlist> {
    let name = required(input.name.as_deref(), "name")?;
    let description = input.description.unwrap_or_default().trim().to_string();
    let owner = user.id.clone();
    state
        .db(move |store| Ok(store.create_playlist(&owner, &name, &description)?))
        .await
}

async fn get_playlist(
    State(state): State<AppState>,
    CurrentUser(_viewer): CurrentUser,
    Path(playlist_id): Path<String>,
) -> ApiResult<ApiResponse<PlaylistContents>> {
    let contents = playlist_contents(&state, &playlist_id).await?;
    Ok(ApiResponse::ok(contents, "Playlist fetched successfully"))
}

pub async fn playlist_contents(state: &AppState, raw_id: &str) -> ApiResult<PlaylistContents> {
    let playlist_id = parse_id(raw_id, "playlistId")?;
    state
        .db(move |store| {
            store
                .playlist_contents(&playlist_id)?
                .ok_or_else(|| ApiError::not_found("Playlist not found"))
        })
        .await
}

async fn update(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(playlist_id): Path<String>,
    ApiJson(input): ApiJson<PlaylistRequest>,
) -> ApiResult<ApiResponse<Playlist>> {
    let playlist = update_playlist(&state, &user, &playlist_id, input).await?;
    Ok(ApiResponse::ok(playlist, "Playlist updated successfully"))
}

/// Renames the playlist. A missing description keeps the current one.
pub async fn update_playlist(
    state: &AppState,
    user: &User,
    raw_id: &str,
    input: PlaylistRequest,
) -> ApiResult<Playlist> {
    let playlist_id = parse_id(raw_id, "playlistId")?;
    let name = required(input.name.as_deref(), "name")?;
    let description = input.description.map(|d| d.trim().to_string());
    let user = user.clone();
    state
        .db(move |store| {
            let existing = owned_playlist(store, &playlist_id, &user, "edit this playlist")?;
            let description = description.unwrap_or(existing.description);
            store
                .update_playlist(&playlist_id, &name, &description)?
                .ok_or_else(|| ApiError::not_found("Playlist not found"))
        })
        .await
}

async fn delete(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(playlist_id): Path<String>,
) -> ApiResult<ApiResponse<Value>> {
    delete_playlist(&state, &user, &playlist_id).await?;
    Ok(ApiResponse::ok(json!({}), "Playlist deleted successfully"))
}

pub async fn delete_playlist(state: &AppState, user: &User, raw_id: &str) -> ApiResult<()> {
    let playlist_id = parse_id(raw_id, "playlistId")?;
    let user = user.clone();
    state
        .db(move |store| {
            owned_playlist(store, &playlist_id, &user, "delete this playlist")?;
            store.delete_playlist(&playlist_id)?;
            Ok(())
        })
        .await
}

async fn add_video(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((video_id, playlist_id)): Path<(String, String)>,
) -> ApiResult<ApiResponse<Playlist>> {
    let playlist = add_video_to_playlist(&state, &user, &video_id, &playlist_id).await?;
    Ok(ApiResponse::ok(playlist, "Video added to playlist successfully"))
}

/// Set-union: adding a video that is already a member changes nothing but
/// `updatedAt`.
pub async fn add_video_to_playlist(
    state: &AppState,
    user: &User,
    raw_video_id: &str,
    raw_playlist_id: &str,
) -> ApiResult<Playlist> {
    let video_id = parse_id(raw_video_id, "videoId")?;
    let playlist_id = parse_id(raw_playlist_id, "playlistId")?;
    let user = user.clone();
    state
        .db(move |store| {
            owned_playlist(store, &playlist_id, &user, "add videos to this playlist")?;
            if store.find_video(&video_id)?.is_none() {
                return Err(ApiError::not_found("Video not found"));
            }
            store
                .add_video_to_playlist(&playlist_id, &video_id)?
                .ok_or_else(|| ApiError::not_found("Playlist not found"))
        })
        .await
}

async fn remove_video(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((video_id, playlist_id)): Path<(String, String)>,
) -> ApiResult<ApiResponse<Playlist>> {
    let playlist = remove_video_from_playlist(&state, &user, &video_id, &playlist_id).await?;
    Ok(ApiResponse::ok(playlist, "Video removed from playlist successfully"))
}

/// Removing works for members whose video has since been deleted.
pub async fn remove_video_from_playlist(
    state: &AppState,
    user: &User,
    raw_video_id: &str,
    raw_playlist_id: &str,
) -> ApiResult<Playlist> {
    let video_id = parse_id(raw_video_id, "videoId")?;
    let playlist_id = parse_id(raw_playlist_id, "playlistId")?;
    let user = user.clone();
    state
        .db(move |store| {
            owned_playlist(store, &playlist_id, &user, "remove videos from this playlist")?;
            store
                .remove_video_from_playlist(&playlist_id, &video_id)?
                .ok_or_else(|| ApiError::not_found("Playlist not found"))
        })
        .await
}

async fn list_for_user(
    State(state): State<AppState>,
    CurrentUser(_viewer): CurrentUser,
    Path(user_id): Path<String>,
) -> ApiResult<ApiResponse<Vec<PlaylistSummary>>> {
    let playlists = user_playlists(&state, &user_id).await?;
    Ok(ApiResponse::ok(playlists, "User playlists fetched successfully"))
}

pub async fn user_playlists(state: &AppState, raw_user_id: &str) -> ApiResult<Vec<PlaylistSummary>> {
    let owner = parse_id(raw_user_id, "userId")?;
    state
        .db(move |store| {
            if store.find_user(&owner)?.is_none() {
                return Err(ApiError::not_found("User not found"));
            }
            Ok(store.user_playlists(&owner)?)
        })
        .await
}

fn owned_playlist(store: &Store, playlist_id: &str, user: &User, action: &str) -> ApiResult<Playlist> {
    let playlist = store
        .find_playlist(playlist_id)?
        .ok_or_else(|| ApiError::not_found("Playlist not found"))?;
    ensure_owner(&playlist.owner, user, action)?;
    Ok(playlist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::TestContext;
    use axum::http::StatusCode;

    fn named(name: &str) -> PlaylistRequest {
        PlaylistRequest {
            name: Some(name.into()),
            description: Some(format!("{name} picks")),
        }
    }

    #[tokio::test]
    async fn adding_the_same_video_twice_keeps_one_entry() {
        let ctx = TestContext::new();
        let alice = ctx.user("alice", "pw");
        let v1 = ctx.video(&alice, "v1");
        let playlist = create_playlist(&ctx.state, &alice, named("mix")).await.unwrap();
        assert!(playlist.videos.is_empty());

        add_video_to_playlist(&ctx.state, &alice, &v1.id, &playlist.id)
            .await
            .unwrap();
        let again = add_video_to_playlist(&ctx.state, &alice, &v1.id, &playlist.id)
            .await
            .unwrap();
        assert_eq!(again.videos, vec![v1.id.clone()]);

        let contents = playlist_contents(&ctx.state, &playlist.id).await.unwrap();
        assert_eq!(contents.total_videos, 1);
        assert_eq!(contents.owner.username, "alice");
    }

    #[tokio::test]
    async fn contents_skip_unpublished_videos() {
        let ctx = TestContext::new();
        let alice = ctx.user("alice", "pw");
        let shown = ctx.video(&alice, "shown");
        let hidden = ctx.video(&alice, "hidden");
        ctx.state.store.increment_views(&shown.id).unwrap();
        ctx.state.store.set_video_published(&hidden.id, false).unwrap();

        let playlist = create_playlist(&ctx.state, &alice, named("mix")).await.unwrap();
        for video in [&shown, &hidden] {
            add_video_to_playlist(&ctx.state, &alice, &video.id, &playlist.id)
                .await
                .unwrap();
        }

        let contents = playlist_contents(&ctx.state, &playlist.id).await.unwrap();
        assert_eq!(contents.total_videos, 1);
        assert_eq!(contents.total_views, 1);
        assert_eq!(contents.videos[0].id, shown.id);
    }

    #[tokio::test]
    async fn membership_changes_are_owner_only() {
        let ctx = TestContext::new();
        let alice = ctx.user("alice", "pw");
        let mallory = ctx.user("mallory", "pw");
        let video = ctx.video(&alice, "clip");
        let playlist = create_playlist(&ctx.state, &alice, named("mix")).await.unwrap();

        let err = add_video_to_playlist(&ctx.state, &mallory, &video.id, &playlist.id)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let err = update_playlist(&ctx.state, &mallory, &playlist.id, named("mine"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let err = delete_playlist(&ctx.state, &mallory, &playlist.id)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let stored = ctx.state.store.find_playlist(&playlist.id).unwrap().unwrap();
        assert_eq!(stored.name, "mix");
        assert!(stored.videos.is_empty());
    }

    #[tokio::test]
    async fn adding_a_missing_video_is_not_found() {
        let ctx = TestContext::new();
        let alice = ctx.user("alice", "pw");
        let playlist = create_playlist(&ctx.state, &alice, named("mix")).await.unwrap();
        let err = add_video_to_playlist(
            &ctx.state,
            &alice,
            &uuid::Uuid::new_v4().to_string(),
            &playlist.id,
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_remove_and_delete() {
        let ctx = TestContext::new();
        let alice = ctx.user("alice", "pw");
        let video = ctx.video(&alice, "clip");
        let playlist = create_playlist(&ctx.state, &alice, named("mix")).await.unwrap();
        add_video_to_playlist(&ctx.state, &alice, &video.id, &playlist.id)
            .await
            .unwrap();

        let renamed = update_playlist(
            &ctx.state,
            &alice,
            &playlist.id,
            PlaylistRequest {
                name: Some("remix".into()),
                description: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(renamed.name, "remix");
        assert_eq!(renamed.description, "mix picks");

        let emptied = remove_video_from_playlist(&ctx.state, &alice, &video.id, &playlist.id)
            .await
            .unwrap();
        assert!(emptied.videos.is_empty());

        let summaries = user_playlists(&ctx.state, &alice.id).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].total_videos, 0);

        delete_playlist(&ctx.state, &alice, &playlist.id).await.unwrap();
        let err = playlist_contents(&ctx.state, &playlist.id).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert!(user_playlists(&ctx.state, &alice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn creating_needs_a_name() {
        let ctx = TestContext::new();
        let alice = ctx.user("alice", "pw");
        let err = create_playlist(&ctx.state, &alice, PlaylistRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "name is required");
    }
}
