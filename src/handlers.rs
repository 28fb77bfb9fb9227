use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use bytes::Bytes;
use chrono::Utc;
use hyper::{HeaderMap, Method, StatusCode};
use serde_json::json;
use warp::{path::FullPath, reply::Response, Rejection, Reply};
use crate::errors::{ErrorBody, GatewayError};
use crate::middleware::client_ip;
use crate::models::{AppState, Claims, LoginRequest, PublicUser, RegisterRequest, Role};
use crate::services::{require_role, ForwardRequest, ProxyRoute};

#[cfg(test)]
mod tests;

pub fn health() -> Response {
    warp::reply::json(&json!({
        "status": "ok",
        "service": "gateway",
        "timestamp": Utc::now().to_rfc3339(),
    }))
    .into_response()
}

pub async fn register(body: RegisterRequest, state: Arc<AppState>) -> Result<Response, Rejection> {
    let response = state.auth.register(body).await?;
    Ok(warp::reply::with_status(warp::reply::json(&response), StatusCode::CREATED).into_response())
}

pub async fn login(body: LoginRequest, state: Arc<AppState>) -> Result<Response, Rejection> {
    let response = state.auth.login(body).await?;
    Ok(warp::reply::json(&response).into_response())
}

pub async fn me(claims: Claims, state: Arc<AppState>) -> Result<Response, Rejection> {
    let user = state.auth.current_user(&claims).await?;
    Ok(warp::reply::json(&PublicUser::from(&user)).into_response())
}

pub async fn list_users(claims: Claims, state: Arc<AppState>) -> Result<Response, Rejection> {
    require_role(&claims, Role::Admin)?;
    let users: Vec<PublicUser> = state
        .auth
        .users()
        .list()
        .await
        .iter()
        .map(PublicUser::from)
        .collect();
    Ok(warp::reply::json(&users).into_response())
}

#[allow(clippy::too_many_arguments)]
pub async fn proxy(
    route: ProxyRoute,
    claims: Claims,
    method: Method,
    full_path: FullPath,
    query: String,
    headers: HeaderMap,
    remote: Option<SocketAddr>,
    body: Bytes,
    state: Arc<AppState>,
) -> Result<Response, Rejection> {
    tracing::debug!(
        service = route.name,
        user_id = %claims.sub,
        method = %method,
        path = full_path.as_str(),
        "Proxying request"
    );

    let response = state
        .proxy
        .forward(
            &route,
            ForwardRequest {
                method,
                path: full_path.as_str().to_string(),
                query,
                headers,
                body,
                client_ip: client_ip(remote),
            },
        )
        .await?;

    Ok(response)
}

/// Turn every rejection into the JSON error envelope.
pub async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (code, message) = if let Some(e) = err.find::<GatewayError>() {
        (e.status(), e.public_message())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e))
    } else if let Some(e) = err.find::<warp::reject::MissingHeader>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidHeader>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        (StatusCode::BAD_REQUEST, "Invalid query string".to_string())
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "Content-Length required".to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Payload too large".to_string())
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Unsupported media type".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        tracing::error!(rejection = ?err, "Unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
    };

    if code.is_server_error() {
        let detail = err.find::<GatewayError>().map(|e| e.to_string());
        tracing::error!(status = code.as_u16(), detail = ?detail, "Request failed");
    } else {
        tracing::debug!(status = code.as_u16(), message = %message, "Request rejected");
    }

    Ok(warp::reply::with_status(warp::reply::json(&ErrorBody::new(code, message)), code).into_response())
}
