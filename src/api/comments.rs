use axum::{
    Router,
    extract::{Path, Query, State},
    routing::{get, patch},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    error::{ApiError, ApiResult},
    models::{Comment, User},
    pagination::{Page, PageParams, PageQuery},
    read_models::CommentView,
};

use super::{ApiJson, ApiResponse, AppState, CurrentUser, ensure_owner, parse_id, required};

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/comments/{video_id}",
            get(list_comments).post(add_comment),
        )
        .route(
            "/api/v1/comments/c/{comment_id}",
            patch(update_comment).delete(delete_comment),
        )
}

#[derive(Debug, Default, Deserialize)]
pub struct CommentRequest {
    pub content: Option<String>,
}

async fn list_comments(
    State(state): State<AppState>,
    CurrentUser(viewer): CurrentUser,
    Path(video_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<ApiResponse<Page<CommentView>>> {
    let comments = video_comments(&state, &viewer, &video_id, PageParams::from(&query)).await?;
    Ok(ApiResponse::ok(comments, "Comments fetched successfully"))
}

pub async fn video_comments(
    state: &AppState,
    viewer: &User,
    raw_video_id: &str,
    page: PageParams,
) -> ApiResult<Page<CommentView>> {
    let video_id = parse_id(raw_video_id, "videoId")?;
    let viewer_id = viewer.id.clone();
    state
        .db(move |store| {
            if store.find_video(&video_id)?.is_none() {
                return Err(ApiError::not_found("Video not found"));
            }
            Ok(store.video_comments(&video_id, &viewer_id, page)?)
        })
        .await
}

async fn add_comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(video_id): Path<String>,
    ApiJson(input): ApiJson<CommentRequest>,
) -> ApiResult<ApiResponse<Comment>> {
    let comment = post_comment(&state, &user, &video_id, input).await?;
    Ok(ApiResponse::created(comment, "Comment added successfully"))
}

pub async fn post_comment(
    state: &AppState,
    user: &User,
    raw_video_id: &str,
    input: CommentRequest,
) -> ApiResult<Comment> {
    let video_id = parse_id(raw_video_id, "videoId")?;
    let content = required(input.content.as_deref(), "content")?;
    let owner = user.id.clone();
    state
        .db(move |store| {
            if store.find_video(&video_id)?.is_none() {
                return Err(ApiError::not_found("Video not found"));
            }
            Ok(store.create_comment(&video_id, &owner, &content)?)
        })
        .await
}

async fn update_comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(comment_id): Path<String>,
    ApiJson(input): ApiJson<CommentRequest>,
) -> ApiResult<ApiResponse<Comment>> {
    let comment = edit_comment(&state, &user, &comment_id, input).await?;
    Ok(ApiResponse::ok(comment, "Comment updated successfully"))
}

pub async fn edit_comment(
    state: &AppState,
    user: &User,
    raw_id: &str,
    input: CommentRequest,
) -> ApiResult<Comment> {
    let comment_id = parse_id(raw_id, "commentId")?;
    let content = required(input.content.as_deref(), "content")?;
    let user = user.clone();
    state
        .db(move |store| {
            let existing = store
                .find_comment(&comment_id)?
                .ok_or_else(|| ApiError::not_found("Comment not found"))?;
            ensure_owner(&existing.owner, &user, "edit this comment")?;
            store
                .update_comment(&comment_id, &content)?
                .ok_or_else(|| ApiError::not_found("Comment not found"))
        })
        .await
}

async fn delete_comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(comment_id): Path<String>,
) -> ApiResult<ApiResponse<Value>> {
    remove_comment(&state, &user, &comment_id).await?;
    Ok(ApiResponse::ok(json!({}), "Comment deleted successfully"))
}

/// Likes on the comment are left in place.
pub async fn remove_comment(state: &AppState, user: &User, raw_id: &str) -> ApiResult<()> {
    let comment_id = parse_id(raw_id, "commentId")?;
    let user = user.clone();
    state
        .db(move |store| {
            let existing = store
                .find_comment(&comment_id)?
                .ok_or_else(|| ApiError::not_found("Comment not found"))?;
            ensure_owner(&existing.owner, &user, "delete this comment")?;
            if !store.delete_comment(&comment_id)? {
                return Err(ApiError::not_found("Comment not found"));
            }
            Ok(())
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{api::test_support::TestContext, models::LikeTarget};
    use axum::http::StatusCode;

    fn content(text: &str) -> CommentRequest {
        CommentRequest {
            content: Some(text.into()),
        }
    }

    #[tokio::test]
    async fn comments_list_newest_first_with_like_flags() {
        let ctx = TestContext::new();
        let alice = ctx.user("alice", "pw");
        let bob = ctx.user("bob", "pw");
        let video = ctx.video(&alice, "clip");

        let first = post_comment(&ctx.state, &alice, &video.id, content("first"))
            .await
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = post_comment(&ctx.state, &bob, &video.id, content("second"))
            .await
            .unwrap();
        ctx.state
            .store
            .create_like(&bob.id, &LikeTarget::Comment(first.id.clone()))
            .unwrap();

        let page = video_comments(&ctx.state, &bob, &video.id, PageParams::default())
            .await
            .unwrap();
        assert_eq!(page.total_items, 2);
        let ids: Vec<_> = page.items.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, [second.id.as_str(), first.id.as_str()]);
        assert_eq!(page.items[1].like_count, 1);
        assert!(page.items[1].is_liked);
        assert!(!page.items[0].is_liked);
        assert_eq!(page.items[0].owner.username, "bob");
    }

    #[tokio::test]
    async fn commenting_needs_content_and_an_existing_video() {
        let ctx = TestContext::new();
        let alice = ctx.user("alice", "pw");
        let video = ctx.video(&alice, "clip");

        let err = post_comment(&ctx.state, &alice, &video.id, content("   "))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let missing = uuid::Uuid::new_v4().to_string();
        let err = post_comment(&ctx.state, &alice, &missing, content("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = video_comments(&ctx.state, &alice, "bogus", PageParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn only_the_author_edits_or_deletes() {
        let ctx = TestContext::new();
        let alice = ctx.user("alice", "pw");
        let mallory = ctx.user("mallory", "pw");
        let video = ctx.video(&alice, "clip");
        let comment = post_comment(&ctx.state, &alice, &video.id, content("mine"))
            .await
            .unwrap();

        let err = edit_comment(&ctx.state, &mallory, &comment.id, content("yours"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let err = remove_comment(&ctx.state, &mallory, &comment.id)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let stored = ctx.state.store.find_comment(&comment.id).unwrap().unwrap();
        assert_eq!(stored.content, "mine");

        let edited = edit_comment(&ctx.state, &alice, &comment.id, content("edited"))
            .await
            .unwrap();
        assert_eq!(edited.content, "edited");
        remove_comment(&ctx.state, &alice, &comment.id).await.unwrap();
        assert!(ctx.state.store.find_comment(&comment.id).unwrap().is_none());
    }
}
