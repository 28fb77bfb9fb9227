use std::net::{IpAddr, SocketAddr};
use hyper::{HeaderMap, header::{HeaderName, HeaderValue}};

#[cfg(test)]
mod tests;

const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, PATCH, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Authorization";

/// Add CORS headers for `origin`. With `*` in the allow-list every origin is accepted;
/// otherwise only listed origins are echoed back.
pub fn add_cors_headers(headers: &mut HeaderMap, origin: Option<&str>, allowed_origins: &[String]) {
    if allowed_origins.iter().any(|o| o == "*") {
        headers.insert(
            HeaderName::from_static("access-control-allow-origin"),
            HeaderValue::from_static("*"),
        );
    } else {
        headers.insert(hyper::header::VARY, HeaderValue::from_static("Origin"));
        let allowed = origin
            .filter(|o| allowed_origins.iter().any(|a| a == o))
            .and_then(|o| HeaderValue::from_str(o).ok());
        match allowed {
            Some(value) => {
                headers.insert(HeaderName::from_static("access-control-allow-origin"), value);
            }
            None => {
                headers.remove("access-control-allow-origin");
            }
        }
    }

    headers.insert(
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-headers"),
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
}

/// Baseline hardening headers, applied to every response.
pub fn add_security_headers(headers: &mut HeaderMap) {
    const SECURITY_HEADERS: [(&str, &str); 7] = [
        ("x-content-type-options", "nosniff"),
        ("x-frame-options", "SAMEORIGIN"),
        ("x-xss-protection", "0"),
        ("referrer-policy", "no-referrer"),
        ("strict-transport-security", "max-age=15552000; includeSubDomains"),
        ("x-dns-prefetch-control", "off"),
        ("cross-origin-opener-policy", "same-origin"),
    ];

    for (name, value) in SECURITY_HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    headers.remove("x-powered-by");
}

/// Rate-limit key: the socket peer. With `trust_proxy`, the right-most `x-forwarded-for`
/// hop instead, which is the address our own reverse proxy saw. Earlier hops are client-supplied.
pub fn client_key(headers: &HeaderMap, remote: Option<SocketAddr>, trust_proxy: bool) -> String {
    let forwarded = if trust_proxy {
        headers
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.rsplit(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
    } else {
        None
    };

    forwarded
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn client_ip(remote: Option<SocketAddr>) -> Option<IpAddr> {
    remote.map(|addr| addr.ip())
}

pub fn log_request(info: warp::log::Info<'_>) {
    let remote = info
        .remote_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "-".to_string());

    tracing::info!(
        target: "analysis_gateway::access",
        method = %info.method(),
        path = info.path(),
        status = info.status().as_u16(),
        elapsed_ms = info.elapsed().as_millis() as u64,
        remote = %remote,
        user_agent = info.user_agent().unwrap_or("-"),
        "{} {} {}",
        info.method(),
        info.path(),
        info.status().as_u16()
    );
}
