use std::sync::Arc;
use serde_json::Value;
use warp::http::StatusCode;
use crate::handlers::handle_rejection;
use crate::models::{AppState, AuthResponse, PublicUser};
use crate::{routes, Config, GatewayError};

async fn rejection_status(err: GatewayError) -> StatusCode {
    let response = handle_rejection(warp::reject::custom(err)).await.unwrap();
    response.status()
}

fn test_state() -> Arc<AppState> {
    Arc::new(AppState::new(Config {
        jwt_secret: "handler-tests".to_string(),
        bcrypt_cost: 4,
        ..Config::default()
    }))
}

#[tokio::test]
async fn test_handle_not_found_rejection() {
    let rejection = warp::reject::not_found();
    let response = handle_rejection(rejection).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_handle_gateway_errors() {
    assert_eq!(rejection_status(GatewayError::BadRequest("x".into())).await, StatusCode::BAD_REQUEST);
    assert_eq!(rejection_status(GatewayError::Unauthorized("x".into())).await, StatusCode::UNAUTHORIZED);
    assert_eq!(rejection_status(GatewayError::Forbidden("x".into())).await, StatusCode::FORBIDDEN);
    assert_eq!(rejection_status(GatewayError::NotFound("x".into())).await, StatusCode::NOT_FOUND);
    assert_eq!(rejection_status(GatewayError::Conflict("x".into())).await, StatusCode::CONFLICT);
    assert_eq!(rejection_status(GatewayError::RateLimitExceeded).await, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(rejection_status(GatewayError::Timeout).await, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(rejection_status(GatewayError::Upstream("refused".into())).await, StatusCode::BAD_GATEWAY);
    assert_eq!(
        rejection_status(GatewayError::Internal("Unknown error".into())).await,
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[tokio::test]
async fn test_error_envelope_hides_internal_detail() {
    let rejection = warp::reject::custom(GatewayError::Internal("db password leaked".to_string()));
    let response = handle_rejection(rejection).await.unwrap();
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(json["status"], "error");
    assert_eq!(json["statusCode"], 500);
    assert_eq!(json["message"], "Internal server error");
}

#[tokio::test]
async fn test_health() {
    let filter = routes(test_state());
    let response = warp::test::request().method("GET").path("/health").reply(&filter).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(response.headers().get("x-content-type-options").unwrap(), "nosniff");
}

#[tokio::test]
async fn test_unknown_path_is_json_404() {
    let filter = routes(test_state());
    let response = warp::test::request().method("GET").path("/nope").reply(&filter).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(json["statusCode"], 404);
}

#[tokio::test]
async fn test_preflight() {
    let filter = routes(test_state());
    let response = warp::test::request()
        .method("OPTIONS")
        .path("/api/apk/analyze")
        .header("origin", "http://localhost:3000")
        .reply(&filter)
        .await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers().get("access-control-allow-origin").unwrap(), "*");
}

#[tokio::test]
async fn test_register_login_me() {
    let filter = routes(test_state());

    let response = warp::test::request()
        .method("POST")
        .path("/auth/register")
        .json(&serde_json::json!({
            "username": "alice",
            "email": "alice@example.com",
            "password": "correct-horse",
            "full_name": "Alice Liddell"
        }))
        .reply(&filter)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let registered: AuthResponse = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(registered.user.full_name.as_deref(), Some("Alice Liddell"));
    assert!(!String::from_utf8_lossy(response.body()).contains("password"));

    let response = warp::test::request()
        .method("POST")
        .path("/auth/login")
        .json(&serde_json::json!({ "username": "alice", "password": "correct-horse" }))
        .reply(&filter)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let logged_in: AuthResponse = serde_json::from_slice(response.body()).unwrap();

    let response = warp::test::request()
        .method("GET")
        .path("/auth/me")
        .header("authorization", format!("Bearer {}", logged_in.token))
        .reply(&filter)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let me: PublicUser = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(me.id, registered.user.id);
}

#[tokio::test]
async fn test_login_with_wrong_password_is_400() {
    let filter = routes(test_state());
    warp::test::request()
        .method("POST")
        .path("/auth/register")
        .json(&serde_json::json!({
            "username": "alice",
            "email": "alice@example.com",
            "password": "correct-horse"
        }))
        .reply(&filter)
        .await;

    let response = warp::test::request()
        .method("POST")
        .path("/auth/login")
        .json(&serde_json::json!({ "username": "alice", "password": "battery-staple" }))
        .reply(&filter)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(json["message"], "Invalid credentials");
}

#[tokio::test]
async fn test_malformed_body_is_400() {
    let filter = routes(test_state());
    let response = warp::test::request()
        .method("POST")
        .path("/auth/register")
        .header("content-type", "application/json")
        .body(r#"{"username": "alice"}"#)
        .reply(&filter)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_me_requires_token() {
    let filter = routes(test_state());

    let response = warp::test::request().method("GET").path("/auth/me").reply(&filter).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(json["message"], "No token provided");

    let response = warp::test::request()
        .method("GET")
        .path("/auth/me")
        .header("authorization", "Bearer not-a-jwt")
        .reply(&filter)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_list_users_requires_admin() {
    let filter = routes(test_state());
    let mut tokens = Vec::new();
    for (name, email) in [("root", "root@example.com"), ("bob", "bob@example.com")] {
        let response = warp::test::request()
            .method("POST")
            .path("/auth/register")
            .json(&serde_json::json!({ "username": name, "email": email, "password": "correct-horse" }))
            .reply(&filter)
            .await;
        let body: AuthResponse = serde_json::from_slice(response.body()).unwrap();
        tokens.push(body.token);
    }

    let response = warp::test::request()
        .method("GET")
        .path("/auth/users")
        .header("authorization", format!("Bearer {}", tokens[1]))
        .reply(&filter)
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = warp::test::request()
        .method("GET")
        .path("/auth/users")
        .header("authorization", format!("Bearer {}", tokens[0]))
        .reply(&filter)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let users: Vec<PublicUser> = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[0].username, "root");
}

#[tokio::test]
async fn test_proxy_requires_token() {
    let filter = routes(test_state());
    let response = warp::test::request().method("GET").path("/api/apk/analyses").reply(&filter).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = warp::test::request().method("GET").path("/api/unknown").reply(&filter).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

async fn login_statuses(state: Arc<AppState>, remote: &str, forwarded_for: &[&str]) -> Vec<StatusCode> {
    let filter = routes(state);
    let mut statuses = Vec::new();
    for hop in forwarded_for {
        let response = warp::test::request()
            .method("POST")
            .path("/auth/login")
            .remote_addr(remote.parse().unwrap())
            .header("x-forwarded-for", *hop)
            .json(&serde_json::json!({ "username": "ghost", "password": "whatever-pass" }))
            .reply(&filter)
            .await;
        statuses.push(response.status());
    }
    statuses
}

fn limited_state(trust_proxy: bool) -> Arc<AppState> {
    Arc::new(AppState::new(Config {
        rate_limit_max: 2,
        trust_proxy,
        bcrypt_cost: 4,
        ..Config::default()
    }))
}

#[tokio::test]
async fn test_auth_is_rate_limited() {
    let statuses = login_statuses(limited_state(false), "198.51.100.4:50000", &["198.51.100.4"; 3]).await;
    assert_eq!(statuses, vec![StatusCode::BAD_REQUEST, StatusCode::BAD_REQUEST, StatusCode::TOO_MANY_REQUESTS]);
}

#[tokio::test]
async fn test_forged_forwarded_for_does_not_reset_budget() {
    let hops = ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"];
    let statuses = login_statuses(limited_state(false), "198.51.100.4:50000", &hops).await;
    assert_eq!(statuses[2], StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(statuses[3], StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_trusted_proxy_keys_on_last_hop() {
    // Behind a trusted proxy the client can only vary the hops in front of the one the proxy appended.
    let hops = ["10.0.0.1, 203.0.113.7", "10.0.0.2, 203.0.113.7", "10.0.0.3, 203.0.113.7"];
    let statuses = login_statuses(limited_state(true), "127.0.0.1:50000", &hops).await;
    assert_eq!(statuses, vec![StatusCode::BAD_REQUEST, StatusCode::BAD_REQUEST, StatusCode::TOO_MANY_REQUESTS]);
}

#[tokio::test]
async fn test_gateway_error_converts_into_rejection() {
    fn upstream_call() -> Result<(), warp::Rejection> {
        Err(GatewayError::Timeout)?;
        Ok(())
    }

    let rejection = upstream_call().unwrap_err();
    let response = handle_rejection(rejection).await.unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}
