use axum::{
    Router,
    body::Bytes,
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderName, StatusCode},
    response::AppendHeaders,
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    auth::{TokenPair, hash_password, verify_password},
    error::{ApiError, ApiResult},
    media::StagedFile,
    models::{MediaAsset, User},
    read_models::{ChannelProfile, VideoCard},
    store::NewUser,
};

use super::{
    ApiJson, ApiResponse, AppState, CurrentUser, REFRESH_COOKIE, cookie_value, form, required,
};

type SessionCookies = AppendHeaders<[(HeaderName, String); 2]>;

const DUPLICATE_USER: &str = "User with email or username already exists";

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/users/register", post(register))
        .route("/api/v1/users/login", post(login))
        .route("/api/v1/users/logout", post(logout))
        .route("/api/v1/users/refresh-token", post(refresh_token))
        .route("/api/v1/users/change-password", post(change_password))
        .route("/api/v1/users/current-user", get(current_user))
        .route("/api/v1/users/update-account", patch(update_account))
        .route("/api/v1/users/avatar", patch(update_avatar))
        .route("/api/v1/users/cover-image", patch(update_cover_image))
        .route("/api/v1/users/c/{username}", get(channel_profile))
        .route("/api/v1/users/history", get(watch_history))
}

#[derive(Debug)]
pub struct RegisterForm {
    pub full_name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub avatar: Option<StagedFile>,
    pub cover_image: Option<StagedFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
}

async fn register(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<ApiResponse<User>> {
    let mut form = form::read(&state, multipart).await?;
    let input = RegisterForm {
        full_name: form.text("fullName").map(str::to_string),
        username: form.text("username").map(str::to_string),
        email: form.text("email").map(str::to_string),
        password: form.text("password").map(str::to_string),
        avatar: form.take_file("avatar"),
        cover_image: form.take_file("coverImage"),
    };
    let user = register_user(&state, input).await?;
    Ok(ApiResponse::created(user, "User registered successfully"))
}

/// Creates an account. The avatar and optional cover image are uploaded
/// before the user row is written and removed again if the insert fails.
pub async fn register_user(state: &AppState, input: RegisterForm) -> ApiResult<User> {
    let filled = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let (Some(full_name), Some(username), Some(email), Some(_)) = (
        filled(&input.full_name),
        filled(&input.username),
        filled(&input.email),
        filled(&input.password),
    ) else {
        return Err(ApiError::bad_request("All fields are required"));
    };
    let username = username.to_lowercase();
    let password = input.password.unwrap_or_default();

    let taken = {
        let username = username.clone();
        let email = email.clone();
        state
            .db(move |store| {
                Ok(store
                    .find_user_by_username_or_email(Some(&username), Some(&email))?
                    .is_some())
            })
            .await?
    };
    if taken {
        return Err(ApiError::conflict(DUPLICATE_USER));
    }

    let avatar_file = input
        .avatar
        .ok_or_else(|| ApiError::bad_request("Avatar file is required"))?;
    let avatar = state.upload(&avatar_file).await?.asset();
    let cover_image = match &input.cover_image {
        Some(staged) => state.upload(staged).await?.asset(),
        None => MediaAsset::default(),
    };

    let uploaded = [avatar.clone(), cover_image.clone()];
    let registered = state
        .db(move |store| {
            let password_hash =
                hash_password(&password).map_err(|err| ApiError::internal(err.to_string()))?;
            let created = store
                .create_user(&NewUser {
                    username,
                    email,
                    full_name,
                    password_hash,
                    avatar,
                    cover_image,
                })
                .map_err(|err| ApiError::conflict_on_unique(err, DUPLICATE_USER))?;
            store
                .find_user(&created.id)?
                .ok_or_else(|| ApiError::internal("Something went wrong while registering the user"))
        })
        .await;
    match registered {
        Ok(user) => {
            log::info!("registered user {}", user.username);
            Ok(user)
        }
        Err(err) => {
            for asset in &uploaded {
                state.discard_media(asset).await;
            }
            Err(err)
        }
    }
}

async fn login(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<LoginRequest>,
) -> ApiResult<(SessionCookies, ApiResponse<LoginResponse>)> {
    let (user, pair) = login_user(&state, input).await?;
    let cookies = state.session_cookies(&pair);
    Ok((
        cookies,
        ApiResponse::ok(
            LoginResponse {
                user,
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
            "User logged in successfully",
        ),
    ))
}

/// Checks credentials and starts a session, replacing any refresh token the
/// user already had.
pub async fn login_user(state: &AppState, input: LoginRequest) -> ApiResult<(User, TokenPair)> {
    let username = input
        .username
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_lowercase);
    let email = input
        .email
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    if username.is_none() && email.is_none() {
        return Err(ApiError::bad_request("username or email is required"));
    }
    let password = input
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::bad_request("password is required"))?;

    let tokens = state.tokens.clone();
    state
        .db(move |store| {
            let user = store
                .find_user_by_username_or_email(username.as_deref(), email.as_deref())?
                .ok_or_else(|| ApiError::not_found("User does not exist"))?;
            let valid = verify_password(&password, &user.password_hash)
                .map_err(|err| ApiError::internal(err.to_string()))?;
            if !valid {
                return Err(ApiError::unauthorized("Invalid user credentials"));
            }
            let pair = tokens.issue_pair(&user)?;
            store.set_refresh_token(&user.id, Some(&pair.refresh_token))?;
            Ok((user, pair))
        })
        .await
}

async fn logout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<(SessionCookies, ApiResponse<Value>)> {
    logout_user(&state, &user).await?;
    Ok((
        state.cleared_cookies(),
        ApiResponse::ok(json!({}), "User logged out"),
    ))
}

pub async fn logout_user(state: &AppState, user: &User) -> ApiResult<()> {
    let user_id = user.id.clone();
    state
        .db(move |store| {
            store.set_refresh_token(&user_id, None)?;
            Ok(())
        })
        .await
}

async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(SessionCookies, ApiResponse<TokenPair>)> {
    let incoming = cookie_value(&headers, REFRESH_COOKIE).or_else(|| {
        serde_json::from_slice::<RefreshRequest>(&body)
            .ok()
            .and_then(|request| request.refresh_token)
    });
    let pair = rotate_refresh_token(&state, incoming).await?;
    Ok((
        state.session_cookies(&pair),
        ApiResponse::ok(pair, "Access token refreshed"),
    ))
}

/// Exchanges a live refresh token for a new pair. The presented token must
/// verify and also equal the one persisted on the user; the new refresh
/// token replaces it, so the old one stops working immediately.
pub async fn rotate_refresh_token(state: &AppState, incoming: Option<String>) -> ApiResult<TokenPair> {
    let incoming = incoming
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Unauthorized request"))?;
    let claims = state.tokens.verify_refresh(&incoming).map_err(|err| {
        log::debug!("rejected refresh token: {err}");
        ApiError::unauthorized("Invalid refresh token")
    })?;

    let tokens = state.tokens.clone();
    state
        .db(move |store| {
            let user = store
                .find_user(&claims.sub)?
                .ok_or_else(|| ApiError::unauthorized("Invalid refresh token"))?;
            if user.refresh_token.as_deref() != Some(incoming.as_str()) {
                return Err(ApiError::unauthorized("Refresh token is expired or used"));
            }
            let pair = tokens.issue_pair(&user)?;
            store.set_refresh_token(&user.id, Some(&pair.refresh_token))?;
            Ok(pair)
        })
        .await
}

async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<ChangePasswordRequest>,
) -> ApiResult<ApiResponse<Value>> {
    change_user_password(&state, &user, input).await?;
    Ok(ApiResponse::ok(json!({}), "Password changed successfully"))
}

pub async fn change_user_password(
    state: &AppState,
    user: &User,
    input: ChangePasswordRequest,
) -> ApiResult<()> {
    let old_password = required(input.old_password.as_deref(), "oldPassword")?;
    let new_password = required(input.new_password.as_deref(), "newPassword")?;
    let user_id = user.id.clone();
    state
        .db(move |store| {
            let user = store
                .find_user(&user_id)?
                .ok_or_else(|| ApiError::not_found("User does not exist"))?;
            let valid = verify_password(&old_password, &user.password_hash)
                .map_err(|err| ApiError::internal(err.to_string()))?;
            if !valid {
                return Err(ApiError::bad_request("Invalid old password"));
            }
            let hash =
                hash_password(&new_password).map_err(|err| ApiError::internal(err.to_string()))?;
            store.set_password_hash(&user.id, &hash)?;
            Ok(())
        })
        .await
}

async fn current_user(CurrentUser(user): CurrentUser) -> ApiResult<ApiResponse<User>> {
    Ok(ApiResponse::ok(user, "User fetched successfully"))
}

async fn update_account(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<UpdateAccountRequest>,
) -> ApiResult<ApiResponse<User>> {
    let updated = update_account_details(&state, &user, input).await?;
    Ok(ApiResponse::ok(updated, "Account details updated successfully"))
}

pub async fn update_account_details(
    state: &AppState,
    user: &User,
    input: UpdateAccountRequest,
) -> ApiResult<User> {
    let (Some(full_name), Some(email)) = (
        input.full_name.as_deref().map(str::trim).filter(|v| !v.is_empty()),
        input.email.as_deref().map(str::trim).filter(|v| !v.is_empty()),
    ) else {
        return Err(ApiError::bad_request("All fields are required"));
    };
    let (full_name, email) = (full_name.to_string(), email.to_string());
    let user_id = user.id.clone();
    state
        .db(move |store| {
            if let Some(other) = store.find_user_by_username_or_email(None, Some(&email))? {
                if other.id != user_id {
                    return Err(ApiError::conflict("Email is already in use"));
                }
            }
            store
                .update_account(&user_id, &full_name, &email)
                .map_err(|err| ApiError::conflict_on_unique(err, "Email is already in use"))?
                .ok_or_else(|| ApiError::not_found("User does not exist"))
        })
        .await
}

async fn update_avatar(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    multipart: Multipart,
) -> ApiResult<ApiResponse<User>> {
    let mut form = form::read(&state, multipart).await?;
    let updated = replace_avatar(&state, &user, form.take_file("avatar")).await?;
    Ok(ApiResponse::ok(updated, "Avatar image updated successfully"))
}

pub async fn replace_avatar(
    state: &AppState,
    user: &User,
    file: Option<StagedFile>,
) -> ApiResult<User> {
    let file = file.ok_or_else(|| ApiError::bad_request("Avatar file is missing"))?;
    let asset = state.upload(&file).await?.asset();
    let user_id = user.id.clone();
    let updated = state
        .db(move |store| {
            store
                .update_avatar(&user_id, &asset)?
                .ok_or_else(|| ApiError::not_found("User does not exist"))
        })
        .await?;
    state.discard_media(&user.avatar).await;
    Ok(updated)
}

async fn update_cover_image(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    multipart: Multipart,
) -> ApiResult<ApiResponse<User>> {
    let mut form = form::read(&state, multipart).await?;
    let updated = replace_cover_image(&state, &user, form.take_file("coverImage")).await?;
    Ok(ApiResponse::ok(updated, "Cover image updated successfully"))
}

pub async fn replace_cover_image(
    state: &AppState,
    user: &User,
    file: Option<StagedFile>,
) -> ApiResult<User> {
    let file = file.ok_or_else(|| ApiError::bad_request("Cover image file is missing"))?;
    let asset = state.upload(&file).await?.asset();
    let user_id = user.id.clone();
    let updated = state
        .db(move |store| {
            store
                .update_cover_image(&user_id, &asset)?
                .ok_or_else(|| ApiError::not_found("User does not exist"))
        })
        .await?;
    state.discard_media(&user.cover_image).await;
    Ok(updated)
}

pub(crate) async fn channel_profile(
    State(state): State<AppState>,
    CurrentUser(viewer): CurrentUser,
    Path(username): Path<String>,
) -> ApiResult<ApiResponse<ChannelProfile>> {
    let username = required(Some(username.as_str()), "username")?;
    let profile = state
        .db(move |store| {
            store
                .channel_profile(&username, &viewer.id)?
                .ok_or_else(|| ApiError::not_found("channel does not exist"))
        })
        .await?;
    Ok(ApiResponse::ok(profile, "User channel fetched successfully"))
}

pub(crate) async fn watch_history(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<ApiResponse<Vec<VideoCard>>> {
    let history = state
        .db(move |store| Ok(store.watch_history(&user.id)?))
        .await?;
    Ok(ApiResponse::new(
        StatusCode::OK,
        history,
        "Watch history fetched successfully",
    ))
}
