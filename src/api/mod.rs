//! HTTP surface: shared state, envelopes, extractors and the router.
//!
//! Each resource module exposes plain async handlers that take typed inputs
//! and return [`ApiResponse`]; multipart parsing is split from the operation
//! so the operation can be driven directly.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, FromRequest, FromRequestParts, Request},
    http::{
        HeaderMap, HeaderName, StatusCode,
        header::{AUTHORIZATION, COOKIE, SET_COOKIE},
        request::Parts,
    },
    response::{AppendHeaders, IntoResponse, Response},
};
use cookie::Cookie;
use serde::{Serialize, de::DeserializeOwned};
use tokio::task;
use uuid::Uuid;

use crate::{
    auth::{TokenPair, TokenService},
    error::{ApiError, ApiResult},
    media::{MediaStorage, ResourceKind, StagedFile, UploadedMedia},
    models::{MediaAsset, User},
    store::Store,
};

pub mod comments;
pub mod dashboard;
pub mod healthcheck;
pub mod likes;
pub mod playlists;
pub mod subscriptions;
pub mod tweets;
pub mod users;
pub mod videos;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub media: Arc<dyn MediaStorage>,
    pub tokens: Arc<TokenService>,
    pub upload_dir: Arc<PathBuf>,
    pub cookie_secure: bool,
}

impl AppState {
    pub fn new(
        store: Store,
        media: Arc<dyn MediaStorage>,
        tokens: TokenService,
        upload_dir: impl Into<PathBuf>,
        cookie_secure: bool,
    ) -> Self {
        Self {
            store: Arc::new(store),
            media,
            tokens: Arc::new(tokens),
            upload_dir: Arc::new(upload_dir.into()),
            cookie_secure,
        }
    }

    /// Runs store work on the blocking pool.
    pub(crate) async fn db<F, T>(&self, work: F) -> ApiResult<T>
    where
        F: FnOnce(&Store) -> ApiResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        task::spawn_blocking(move || work(&store))
            .await
            .map_err(|err| ApiError::internal(format!("task join error: {err}")))?
    }

    pub(crate) async fn upload(&self, staged: &StagedFile) -> ApiResult<UploadedMedia> {
        let media = self.media.clone();
        let path = staged.path().to_path_buf();
        let uploaded = task::spawn_blocking(move || media.upload(&path))
            .await
            .map_err(|err| ApiError::internal(format!("task join error: {err}")))??;
        log::debug!(
            "stored upload {:?} ({} bytes) as {} {}",
            staged.original_name().unwrap_or("-"),
            staged.size(),
            uploaded.resource_type,
            uploaded.public_id
        );
        Ok(uploaded)
    }

    /// Best-effort removal of a replaced or orphaned asset. Failures are
    /// logged and never surface to the client. The identifier keeps the
    /// uploaded file's extension, so the kind it was filed under is recovered
    /// from it.
    pub(crate) async fn discard_media(&self, asset: &MediaAsset) {
        if asset.is_empty() {
            return;
        }
        let kind = ResourceKind::from_path(Path::new(&asset.public_id));
        let media = self.media.clone();
        let public_id = asset.public_id.clone();
        let outcome = task::spawn_blocking(move || media.delete(&public_id, kind)).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::warn!("failed to delete {kind} {}: {err:#}", asset.public_id),
            Err(err) => log::warn!("media delete task failed: {err}"),
        }
    }

    /// Each cookie lives exactly as long as the token it carries.
    pub(crate) fn session_cookies(&self, pair: &TokenPair) -> AppendHeaders<[(HeaderName, String); 2]> {
        AppendHeaders([
            (
                SET_COOKIE,
                self.cookie(ACCESS_COOKIE, &pair.access_token, self.tokens.access_ttl()),
            ),
            (
                SET_COOKIE,
                self.cookie(REFRESH_COOKIE, &pair.refresh_token, self.tokens.refresh_ttl()),
            ),
        ])
    }

    pub(crate) fn cleared_cookies(&self) -> AppendHeaders<[(HeaderName, String); 2]> {
        AppendHeaders([
            (SET_COOKIE, self.removal_cookie(ACCESS_COOKIE)),
            (SET_COOKIE, self.removal_cookie(REFRESH_COOKIE)),
        ])
    }

    fn cookie(&self, name: &'static str, value: &str, ttl: chrono::Duration) -> String {
        Cookie::build((name, value.to_string()))
            .http_only(true)
            .secure(self.cookie_secure)
            .path("/")
            .max_age(cookie::time::Duration::seconds(ttl.num_seconds()))
            .build()
            .to_string()
    }

    fn removal_cookie(&self, name: &'static str) -> String {
        let mut cookie = Cookie::build((name, ""))
            .http_only(true)
            .secure(self.cookie_secure)
            .path("/")
            .build();
        cookie.make_removal();
        cookie.to_string()
    }
}

/// Success envelope: `{statusCode, data, message, success}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub status_code: u16,
    pub data: T,
    pub message: String,
    pub success: bool,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(status: StatusCode, data: T, message: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            data,
            message: message.into(),
            success: status.as_u16() < 400,
        }
    }

    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, data, message)
    }

    pub fn created(data: T, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CREATED, data, message)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

/// JSON body extractor whose rejections use the error envelope.
#[derive(Debug, Clone)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::bad_request(rejection.body_text())),
        }
    }
}

/// The authenticated viewer. Resolved from the `accessToken` cookie or an
/// `Authorization: Bearer` header; the user must still exist.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = access_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Unauthorized request"))?;
        let claims = state.tokens.verify_access(&token).map_err(|err| {
            log::debug!("rejected access token: {err}");
            ApiError::unauthorized("Invalid access token")
        })?;
        let user_id = claims.sub;
        let user = state
            .db(move |store| Ok(store.find_user(&user_id)?))
            .await?
            .ok_or_else(|| ApiError::unauthorized("Invalid access token"))?;
        Ok(Self(user))
    }
}

fn access_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = cookie_value(headers, ACCESS_COOKIE) {
        return Some(token);
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

/// Canonical form of an identifier taken from a path or query.
pub(crate) fn parse_id(raw: &str, what: &str) -> ApiResult<String> {
    Uuid::parse_str(raw.trim())
        .map(|id| id.to_string())
        .map_err(|_| ApiError::bad_request(format!("invalid {what}")))
}

pub(crate) fn ensure_owner(owner: &str, viewer: &User, action: &str) -> ApiResult<()> {
    if owner != viewer.id {
        return Err(ApiError::bad_request(format!(
            "only the owner can {action}"
        )));
    }
    Ok(())
}

/// Trimmed, non-empty value of a required text field.
pub(crate) fn required(value: Option<&str>, field: &str) -> ApiResult<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request(format!("{field} is required")))
}

/// Reads a multipart form into text fields and staged files.
pub(crate) mod form {
    use std::collections::HashMap;

    use axum::extract::Multipart;

    use crate::{
        error::{ApiError, ApiResult},
        media::StagedFile,
    };

    use super::AppState;

    #[derive(Debug, Default)]
    pub struct Form {
        pub fields: HashMap<String, String>,
        pub files: HashMap<String, StagedFile>,
    }

    impl Form {
        pub fn text(&self, name: &str) -> Option<&str> {
            self.fields.get(name).map(String::as_str)
        }

        pub fn take_file(&mut self, name: &str) -> Option<StagedFile> {
            self.files.remove(name)
        }
    }

    pub async fn read(state: &AppState, mut multipart: Multipart) -> ApiResult<Form> {
        let mut form = Form::default();
        while let Some(mut field) = multipart
            .next_field()
            .await
            .map_err(|err| ApiError::bad_request(err.body_text()))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let mut staged = StagedFile::create(&state.upload_dir, Some(&file_name))?;
                    let mut writer = staged.writer()?;
                    while let Some(chunk) = field
                        .chunk()
                        .await
                        .map_err(|err| ApiError::bad_request(err.body_text()))?
                    {
                        writer.write_chunk(&chunk).await?;
                    }
                    let written = writer.finish().await?;
                    staged.record_size(written);
                    if written > 0 {
                        form.files.insert(name, staged);
                    }
                }
                None => {
                    let value = field
                        .text()
                        .await
                        .map_err(|err| ApiError::bad_request(err.body_text()))?;
                    form.fields.insert(name, value);
                }
            }
        }
        Ok(form)
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .merge(healthcheck::routes())
        .merge(users::routes())
        .merge(videos::routes())
        .merge(comments::routes())
        .merge(likes::routes())
        .merge(tweets::routes())
        .merge(subscriptions::routes())
        .merge(playlists::routes())
        .merge(dashboard::routes())
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}
