mod common;

use std::net::SocketAddr;

use common::Harness;
use cookie::Cookie;
use reqwest::{
    Client, Response, StatusCode,
    header::{COOKIE, SET_COOKIE},
    multipart::{Form, Part},
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use vidtube::api::{self, ACCESS_COOKIE, REFRESH_COOKIE};

async fn serve(h: &Harness) -> SocketAddr {
    let app = api::router(h.state.clone(), 4 * 1024 * 1024);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn set_cookie(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|raw| Cookie::parse(raw.to_string()).ok())
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
}

#[tokio::test]
async fn healthcheck_uses_the_success_envelope() {
    let h = Harness::new();
    let addr = serve(&h).await;

    let response = Client::new()
        .get(format!("http://{addr}/api/v1/healthcheck"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["statusCode"], 200);
    assert_eq!(body["data"], json!({ "status": "OK" }));
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn protected_routes_reject_anonymous_callers() {
    let h = Harness::new();
    let addr = serve(&h).await;

    let response = Client::new()
        .get(format!("http://{addr}/api/v1/users/current-user"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["statusCode"], 401);
    assert!(body["data"].is_null());
    assert_eq!(body["errors"], json!([]));
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn register_login_refresh_logout_over_http() {
    let h = Harness::new();
    let addr = serve(&h).await;
    let client = Client::new();
    let base = format!("http://{addr}/api/v1/users");

    let form = Form::new()
        .text("fullName", "Dana Scully")
        .text("username", "Dana")
        .text("email", "dana@example.test")
        .text("password", "trust-no-one")
        .part(
            "avatar",
            Part::bytes(b"png-bytes".to_vec()).file_name("avatar.png"),
        );
    let response = client
        .post(format!("{base}/register"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["username"], "dana");
    assert!(body["data"].get("passwordHash").is_none());
    let avatar_id = body["data"]["avatar"]["public_id"].as_str().unwrap();
    assert!(h.media_root().join("image").join(avatar_id).exists());

    let response = client
        .post(format!("{base}/login"))
        .json(&json!({ "email": "dana@example.test", "password": "trust-no-one" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let access = set_cookie(&response, ACCESS_COOKIE).unwrap();
    let refresh = set_cookie(&response, REFRESH_COOKIE).unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["refreshToken"], refresh.as_str());

    let response = client
        .get(format!("{base}/current-user"))
        .header(COOKIE, format!("{ACCESS_COOKIE}={access}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["email"], "dana@example.test");

    // Body-supplied refresh token, as non-browser clients send it.
    let response = client
        .post(format!("{base}/refresh-token"))
        .json(&json!({ "refreshToken": refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let rotated_access = set_cookie(&response, ACCESS_COOKIE).unwrap();
    let rotated_refresh = set_cookie(&response, REFRESH_COOKIE).unwrap();
    assert_ne!(rotated_refresh, refresh);

    let response = client
        .post(format!("{base}/refresh-token"))
        .header(COOKIE, format!("{REFRESH_COOKIE}={refresh}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client
        .post(format!("{base}/logout"))
        .header(COOKIE, format!("{ACCESS_COOKIE}={rotated_access}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(set_cookie(&response, ACCESS_COOKIE), Some(String::new()));

    let response = client
        .post(format!("{base}/refresh-token"))
        .json(&json!({ "refreshToken": rotated_refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_identifiers_are_bad_requests() {
    let h = Harness::new();
    h.register("erin").await;
    let addr = serve(&h).await;
    let client = Client::new();

    let response = client
        .post(format!("http://{addr}/api/v1/users/login"))
        .json(&json!({ "username": "erin", "password": Harness::password("erin") }))
        .send()
        .await
        .unwrap();
    let access = set_cookie(&response, ACCESS_COOKIE).unwrap();

    let response = client
        .post(format!("http://{addr}/api/v1/likes/toggle/t/not-an-id"))
        .header(COOKIE, format!("{ACCESS_COOKIE}={access}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "invalid tweetId");
}
