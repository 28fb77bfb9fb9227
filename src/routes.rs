use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use hyper::{HeaderMap, Method, StatusCode};
use warp::{reply::Response, Filter, Rejection, Reply};
use bytes::Bytes;
use crate::config::MAX_JSON_BODY_BYTES;
use crate::errors::GatewayError;
use crate::handlers;
use crate::middleware::{add_cors_headers, add_security_headers, client_key, log_request};
use crate::models::{AppState, Claims};
use crate::services::{bearer_token, proxy::collect_body, ProxyRoute};

/// The full gateway: health, auth, proxied services, CORS preflight, error recovery,
/// response hardening and access logging.
pub fn routes(state: Arc<AppState>) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let cors_origins = state.config.cors_origins.clone();

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(handlers::health);

    let api = preflight()
        .or(health)
        .unify()
        .or(auth_routes(state.clone()))
        .unify()
        .or(proxy_routes(state))
        .unify()
        .recover(handlers::handle_rejection)
        .unify();

    warp::header::headers_cloned()
        .and(api)
        .map(move |request_headers: HeaderMap, mut response: Response| {
            let origin = request_headers
                .get(hyper::header::ORIGIN)
                .and_then(|o| o.to_str().ok());
            add_cors_headers(response.headers_mut(), origin, &cors_origins);
            add_security_headers(response.headers_mut());
            response
        })
        .with(warp::log::custom(log_request))
}

fn with_state(state: Arc<AppState>) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// `OPTIONS` on any path. Rejects with not-found otherwise so it never shadows a 404.
fn preflight() -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::method().and_then(|method: Method| async move {
        if method == Method::OPTIONS {
            Ok(StatusCode::NO_CONTENT.into_response())
        } else {
            Err(warp::reject::not_found())
        }
    })
}

fn rate_limited(state: Arc<AppState>) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    with_state(state)
        .and(warp::header::headers_cloned())
        .and(warp::addr::remote())
        .and_then(|state: Arc<AppState>, headers: HeaderMap, remote: Option<SocketAddr>| async move {
            let key = client_key(&headers, remote, state.config.trust_proxy);
            if state.rate_limiter.check(&key).await {
                Ok(())
            } else {
                tracing::warn!(client = %key, "Rate limit exceeded");
                Err(warp::reject::custom(GatewayError::RateLimitExceeded))
            }
        })
        .untuple_one()
}

fn authenticated(state: Arc<AppState>) -> impl Filter<Extract = (Claims,), Error = Rejection> + Clone {
    with_state(state)
        .and(warp::header::headers_cloned())
        .and_then(|state: Arc<AppState>, headers: HeaderMap| async move {
            let token = bearer_token(&headers)?;
            let claims = state.auth.verify_token(token)?;
            Ok::<Claims, Rejection>(claims)
        })
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_JSON_BODY_BYTES).and(warp::body::json())
}

fn auth_routes(state: Arc<AppState>) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let register = warp::path("register")
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::register);

    let login = warp::path("login")
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::login);

    let me = warp::path("me")
        .and(warp::path::end())
        .and(warp::get())
        .and(authenticated(state.clone()))
        .and(with_state(state.clone()))
        .and_then(handlers::me);

    let users = warp::path("users")
        .and(warp::path::end())
        .and(warp::get())
        .and(authenticated(state.clone()))
        .and(with_state(state.clone()))
        .and_then(handlers::list_users);

    warp::path("auth")
        .and(rate_limited(state))
        .and(register.or(login).unify().or(me).unify().or(users).unify())
}

/// Resolve the backend mounted at the request path.
fn mounted_route(state: Arc<AppState>) -> impl Filter<Extract = (ProxyRoute,), Error = Rejection> + Clone {
    warp::path::full()
        .and(with_state(state))
        .and_then(|path: warp::path::FullPath, state: Arc<AppState>| async move {
            state
                .proxy
                .route_for(path.as_str())
                .cloned()
                .ok_or_else(warp::reject::not_found)
        })
}

/// Reject a declared `Content-Length` over `limit` before reading anything.
fn body_limit(limit: u64) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<u64>("content-length")
        .and_then(move |length: Option<u64>| async move {
            match length {
                Some(n) if n > limit => Err(warp::reject::custom(GatewayError::PayloadTooLarge)),
                _ => Ok(()),
            }
        })
        .untuple_one()
}

/// The request body, capped at `limit` bytes however it is framed.
fn limited_body(limit: u64) -> impl Filter<Extract = (Bytes,), Error = Rejection> + Clone {
    body_limit(limit)
        .and(warp::body::stream())
        .and_then(move |body| async move { collect_body(body, limit).await.map_err(warp::reject::custom) })
}

fn raw_query() -> impl Filter<Extract = (String,), Error = Infallible> + Clone {
    warp::query::raw().or_else(|_| async { Ok::<(String,), Infallible>((String::new(),)) })
}

fn proxy_routes(state: Arc<AppState>) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let upload_limit = state.config.max_upload_bytes;
    warp::path("api")
        .and(mounted_route(state.clone()))
        .and(rate_limited(state.clone()))
        .and(authenticated(state.clone()))
        .and(warp::method())
        .and(warp::path::full())
        .and(raw_query())
        .and(warp::header::headers_cloned())
        .and(warp::addr::remote())
        .and(limited_body(upload_limit))
        .and(with_state(state))
        .and_then(handlers::proxy)
}
