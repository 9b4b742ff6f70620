mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use common::{body_json, json_request, test_router, BASE_URL};
use serde_json::json;
use tower::ServiceExt;

async fn shorten(router: &Router, original_url: &str) -> serde_json::Value {
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/shorten",
            json!({ "original_url": original_url }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn get(router: &Router, uri: &str, cookie: Option<&str>) -> axum::response::Response {
    let mut request = Request::get(uri);
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    router
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

/// Registers and logs in `username`, returning the `Cookie` header value.
async fn login(router: &Router, username: &str) -> String {
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/register",
            json!({
                "username": username,
                "password": "test123",
                "email": format!("{username}@example.com"),
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/login",
            json!({ "username": username, "password": "test123" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let set_cookie = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("session_token="))
        .expect("login should set the session cookie")
        .to_string();
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));

    set_cookie.split(';').next().unwrap().to_string()
}

#[tokio::test]
async fn shorten_then_redirect() {
    let app = test_router().await;

    let body = shorten(&app.router, "https://example.com/page").await;
    let code = body["code"].as_str().unwrap();

    assert_eq!(body["original_url"], "https://example.com/page");
    assert_eq!(body["short_url"], format!("{BASE_URL}/{code}"));
    assert_eq!(code.len(), 7);

    let response = get(&app.router, &format!("/{code}"), None).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers()[header::LOCATION],
        "https://example.com/page"
    );
}

#[tokio::test]
async fn same_url_twice_gets_two_codes() {
    let app = test_router().await;

    let first = shorten(&app.router, "https://example.com").await;
    let second = shorten(&app.router, "https://example.com").await;

    assert_ne!(first["code"], second["code"]);
}

#[tokio::test]
async fn empty_url_is_rejected() {
    let app = test_router().await;

    for body in [json!({ "original_url": "" }), json!({ "original_url": "   " }), json!({})] {
        let response = app
            .router
            .clone()
            .oneshot(json_request("POST", "/shorten", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "URL is required");
    }
}

#[tokio::test]
async fn invalid_url_is_rejected() {
    let app = test_router().await;

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/shorten",
            json!({ "original_url": "javascript:alert(1)" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"]
        .as_str()
        .unwrap()
        .contains("unsupported scheme"));
}

#[tokio::test]
async fn malformed_body_is_a_bad_request() {
    let app = test_router().await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::post("/shorten")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].is_string());
}

#[tokio::test]
async fn unknown_code_is_not_found() {
    let app = test_router().await;

    let response = get(&app.router, "/abc123", None).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()["x-error"], "Link not found");
    assert_eq!(body_json(response).await["error"], "Short link not found");
}

#[tokio::test]
async fn health_check_responds() {
    let app = test_router().await;

    let response = get(&app.router, "/health", None).await;

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn links_are_listed_in_pages() {
    let app = test_router().await;
    for n in 0..3 {
        shorten(&app.router, &format!("https://example.com/{n}")).await;
    }

    let page = body_json(get(&app.router, "/links?limit=2", None).await).await;
    let data = page["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(page["last"], data[1]["code"]);

    let last = page["last"].as_str().unwrap();
    let rest = body_json(get(&app.router, &format!("/links?after={last}"), None).await).await;
    assert_eq!(rest["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn me_requires_a_session() {
    let app = test_router().await;

    let response = get(&app.router, "/me", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = get(&app.router, "/me", Some("session_token=bogus")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_cookie_identifies_the_user() {
    let app = test_router().await;
    let cookie = login(&app.router, "test").await;

    let response = get(&app.router, "/me", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["user"]["username"], "test");
    assert_eq!(body["user"]["email"], "test@example.com");
    assert_eq!(body["user"]["is_active"], true);
}

#[tokio::test]
async fn bearer_token_is_accepted() {
    let app = test_router().await;
    let cookie = login(&app.router, "test").await;
    let token = cookie.trim_start_matches("session_token=");

    let response = app
        .router
        .clone()
        .oneshot(
            Request::get("/me")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let app = test_router().await;
    login(&app.router, "test").await;

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/register",
            json!({ "username": "test", "password": "other" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error"],
        "Username or email already exists"
    );
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let app = test_router().await;
    login(&app.router, "test").await;

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/login",
            json!({ "username": "test", "password": "wrong" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn authenticated_links_are_owned() {
    let app = test_router().await;
    let cookie = login(&app.router, "test").await;

    shorten(&app.router, "https://anonymous.example").await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::post("/shorten")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::COOKIE, &cookie)
                .body(Body::from(
                    json!({ "original_url": "https://mine.example" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mine = body_json(get(&app.router, "/me/links", Some(&cookie)).await).await;
    let data = mine["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["original_url"], "https://mine.example");

    let all = body_json(get(&app.router, "/links", None).await).await;
    assert_eq!(all["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let app = test_router().await;
    let cookie = login(&app.router, "test").await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::post("/logout")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cleared = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.starts_with("session_token=") && value.contains("Max-Age=0"));
    assert!(cleared);

    let response = get(&app.router, "/me", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_without_password_is_a_bad_request() {
    let app = test_router().await;

    let response = app
        .router
        .clone()
        .oneshot(json_request("POST", "/register", json!({ "username": "test" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/json"
    );
    assert!(body_json(response).await["error"]
        .as_str()
        .unwrap()
        .contains("password"));
}

#[tokio::test]
async fn login_with_invalid_json_is_a_bad_request() {
    let app = test_router().await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::post("/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{bad"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].is_string());
}
