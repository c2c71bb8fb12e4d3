use axum::{
    Router,
    extract::{Path, State},
    routing::get,
};
use serde::Serialize;

use crate::{
    error::{ApiError, ApiResult},
    models::User,
    read_models::{ChannelSubscribers, SubscribedChannel},
};

use super::{ApiResponse, AppState, CurrentUser, parse_id};

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/subscriptions/c/{channel_id}",
            get(list_subscribers).post(toggle),
        )
        .route(
            "/api/v1/subscriptions/u/{subscriber_id}",
            get(list_subscribed_channels),
        )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubscriptionState {
    pub subscribed: bool,
}

async fn toggle(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(channel_id): Path<String>,
) -> ApiResult<ApiResponse<SubscriptionState>> {
    let outcome = toggle_subscription(&state, &user, &channel_id).await?;
    let message = if outcome.subscribed {
        "Subscribed successfully"
    } else {
        "Unsubscribed successfully"
    };
    Ok(ApiResponse::ok(outcome, message))
}

/// Same read-then-write toggle as likes; not atomic.
pub async fn toggle_subscription(
    state: &AppState,
    user: &User,
    raw_channel_id: &str,
) -> ApiResult<SubscriptionState> {
    let channel = parse_id(raw_channel_id, "channelId")?;
    if channel == user.id {
        return Err(ApiError::bad_request("You cannot subscribe to your own channel"));
    }
    let subscriber = user.id.clone();
    state
        .db(move |store| {
            if store.find_user(&channel)?.is_none() {
                return Err(ApiError::not_found("Channel not found"));
            }
            match store.find_subscription(&subscriber, &channel)? {
                Some(existing) => {
                    store.delete_subscription(&existing.id)?;
                    Ok(SubscriptionState { subscribed: false })
                }
                None => {
                    store.create_subscription(&subscriber, &channel)?;
                    Ok(SubscriptionState { subscribed: true })
                }
            }
        })
        .await
}

async fn list_subscribers(
    State(state): State<AppState>,
    CurrentUser(_viewer): CurrentUser,
    Path(channel_id): Path<String>,
) -> ApiResult<ApiResponse<ChannelSubscribers>> {
    let subscribers = channel_subscribers(&state, &channel_id).await?;
    Ok(ApiResponse::ok(subscribers, "Subscribers fetched successfully"))
}

pub async fn channel_subscribers(
    state: &AppState,
    raw_channel_id: &str,
) -> ApiResult<ChannelSubscribers> {
    let channel = parse_id(raw_channel_id, "channelId")?;
    state
        .db(move |store| {
            if store.find_user(&channel)?.is_none() {
                return Err(ApiError::not_found("Channel not found"));
            }
            Ok(store.channel_subscribers(&channel)?)
        })
        .await
}

async fn list_subscribed_channels(
    State(state): State<AppState>,
    CurrentUser(_viewer): CurrentUser,
    Path(subscriber_id): Path<String>,
) -> ApiResult<ApiResponse<Vec<SubscribedChannel>>> {
    let channels = subscribed_channels(&state, &subscriber_id).await?;
    Ok(ApiResponse::ok(channels, "Subscribed channels fetched successfully"))
}

pub async fn subscribed_channels(
    state: &AppState,
    raw_subscriber_id: &str,
) -> ApiResult<Vec<SubscribedChannel>> {
    let subscriber = parse_id(raw_subscriber_id, "subscriberId")?;
    state
        .db(move |store| {
            if store.find_user(&subscriber)?.is_none() {
                return Err(ApiError::not_found("User not found"));
            }
            Ok(store.subscribed_channels(&subscriber)?)
        })
        .await
}
