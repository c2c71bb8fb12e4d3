use axum::{
    Router,
    extract::{Path, State},
    routing::{get, patch, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    error::{ApiError, ApiResult},
    models::{Tweet, User},
    read_models::TweetView,
};

use super::{ApiJson, ApiResponse, AppState, CurrentUser, ensure_owner, parse_id, required};

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/tweets", post(create))
        .route("/api/v1/tweets/user/{user_id}", get(list_for_user))
        .route(
            "/api/v1/tweets/{tweet_id}",
            patch(update).delete(delete),
        )
}

#[derive(Debug, Default, Deserialize)]
pub struct TweetRequest {
    pub content: Option<String>,
}

async fn create(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<TweetRequest>,
) -> ApiResult<ApiResponse<Tweet>> {
    let tweet = create_tweet(&state, &user, input).await?;
    Ok(ApiResponse::created(tweet, "Tweet created successfully"))
}

pub async fn create_tweet(state: &AppState, user: &User, input: TweetRequest) -> ApiResult<Tweet> {
    let content = required(input.content.as_deref(), "content")?;
    let owner = user.id.clone();
    state
        .db(move |store| Ok(store.create_tweet(&owner, &content)?))
        .await
}

async fn list_for_user(
    State(state): State<AppState>,
    CurrentUser(viewer): CurrentUser,
    Path(user_id): Path<String>,
) -> ApiResult<ApiResponse<Vec<TweetView>>> {
    let tweets = user_tweets(&state, &viewer, &user_id).await?;
    Ok(ApiResponse::ok(tweets, "Tweets fetched successfully"))
}

pub async fn user_tweets(
    state: &AppState,
    viewer: &User,
    raw_user_id: &str,
) -> ApiResult<Vec<TweetView>> {
    let owner = parse_id(raw_user_id, "userId")?;
    let viewer_id = viewer.id.clone();
    state
        .db(move |store| {
            if store.find_user(&owner)?.is_none() {
                return Err(ApiError::not_found("User not found"));
            }
            Ok(store.user_tweets(&owner, &viewer_id)?)
        })
        .await
}

async fn update(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(tweet_id): Path<String>,
    ApiJson(input): ApiJson<TweetRequest>,
) -> ApiResult<ApiResponse<Tweet>> {
    let tweet = update_tweet(&state, &user, &tweet_id, input).await?;
    Ok(ApiResponse::ok(tweet, "Tweet updated successfully"))
}

pub async fn update_tweet(
    state: &AppState,
    user: &User,
    raw_id: &str,
    input: TweetRequest,
) -> ApiResult<Tweet> {
    let tweet_id = parse_id(raw_id, "tweetId")?;
    let content = required(input.content.as_deref(), "content")?;
    let user = user.clone();
    state
        .db(move |store| {
            let existing = store
                .find_tweet(&tweet_id)?
                .ok_or_else(|| ApiError::not_found("Tweet not found"))?;
            ensure_owner(&existing.owner, &user, "edit this tweet")?;
            store
                .update_tweet(&tweet_id, &content)?
                .ok_or_else(|| ApiError::not_found("Tweet not found"))
        })
        .await
}

async fn delete(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(tweet_id): Path<String>,
) -> ApiResult<ApiResponse<Value>> {
    delete_tweet(&state, &user, &tweet_id).await?;
    Ok(ApiResponse::ok(json!({}), "Tweet deleted successfully"))
}

pub async fn delete_tweet(state: &AppState, user: &User, raw_id: &str) -> ApiResult<()> {
    let tweet_id = parse_id(raw_id, "tweetId")?;
    let user = user.clone();
    state
        .db(move |store| {
            let existing = store
                .find_tweet(&tweet_id)?
                .ok_or_else(|| ApiError::not_found("Tweet not found"))?;
            ensure_owner(&existing.owner, &user, "delete this tweet")?;
            store.delete_tweet(&tweet_id)?;
            Ok(())
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{api::likes::toggle_like, api::test_support::TestContext, models::LikeTarget};
    use axum::http::StatusCode;

    fn tweet(text: &str) -> TweetRequest {
        TweetRequest {
            content: Some(text.into()),
        }
    }

    #[tokio::test]
    async fn tweets_list_newest_first_with_viewer_flags() {
        let ctx = TestContext::new();
        let alice = ctx.user("alice", "pw");
        let bob = ctx.user("bob", "pw");
        let first = create_tweet(&ctx.state, &alice, tweet("first")).await.unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = create_tweet(&ctx.state, &alice, tweet("second")).await.unwrap();
        toggle_like(&ctx.state, &bob, LikeTarget::Tweet(first.id.clone()))
            .await
            .unwrap();

        let as_bob = user_tweets(&ctx.state, &bob, &alice.id).await.unwrap();
        let ids: Vec<_> = as_bob.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, [second.id.as_str(), first.id.as_str()]);
        assert!(as_bob[1].is_liked);
        assert_eq!(as_bob[1].like_count, 1);

        let as_alice = user_tweets(&ctx.state, &alice, &alice.id).await.unwrap();
        assert!(!as_alice[1].is_liked);
        assert_eq!(as_alice[1].like_count, 1);
    }

    #[tokio::test]
    async fn listing_for_unknown_user_is_not_found() {
        let ctx = TestContext::new();
        let alice = ctx.user("alice", "pw");
        let err = user_tweets(&ctx.state, &alice, &uuid::Uuid::new_v4().to_string())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_content_is_rejected() {
        let ctx = TestContext::new();
        let alice = ctx.user("alice", "pw");
        let err = create_tweet(&ctx.state, &alice, TweetRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "content is required");
    }

    #[tokio::test]
    async fn only_the_author_edits_or_deletes() {
        let ctx = TestContext::new();
        let alice = ctx.user("alice", "pw");
        let mallory = ctx.user("mallory", "pw");
        let original = create_tweet(&ctx.state, &alice, tweet("hello")).await.unwrap();

        let err = update_tweet(&ctx.state, &mallory, &original.id, tweet("hijacked"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let err = delete_tweet(&ctx.state, &mallory, &original.id)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ctx.state.store.find_tweet(&original.id).unwrap().unwrap().content,
            "hello"
        );

        let updated = update_tweet(&ctx.state, &alice, &original.id, tweet("hello again"))
            .await
            .unwrap();
        assert_eq!(updated.content, "hello again");
        delete_tweet(&ctx.state, &alice, &original.id).await.unwrap();
        assert!(ctx.state.store.find_tweet(&original.id).unwrap().is_none());
    }
}
