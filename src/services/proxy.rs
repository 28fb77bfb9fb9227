use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{pin_mut, Stream, TryStreamExt};
use hyper::client::HttpConnector;
use hyper::header::{HeaderName, HeaderValue, HOST};
use hyper::{Body, Client, HeaderMap, Method, Request, Response, Uri};
use lazy_static::lazy_static;
use tokio::time::timeout;
use crate::errors::GatewayError;

lazy_static! {
    /// Connection-scoped headers that must not be forwarded in either direction.
    static ref HOP_BY_HOP_HEADERS: HashSet<&'static str> = [
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailer",
        "transfer-encoding",
        "upgrade",
    ]
    .into_iter()
    .collect();
}

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// A backend service mounted under a path prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    pub name: &'static str,
    pub mount: &'static str,
    pub target: String,
    /// Prefix that replaces `mount` on the forwarded path.
    pub rewrite_to: &'static str,
}

impl ProxyRoute {
    pub fn new(name: &'static str, mount: &'static str, target: &str, rewrite_to: &'static str) -> Self {
        Self {
            name,
            mount,
            target: target.trim_end_matches('/').to_string(),
            rewrite_to,
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.mount) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Upstream URL for a gateway path and raw query string.
    pub fn rewrite(&self, path: &str, query: &str) -> String {
        let rest = path.strip_prefix(self.mount).unwrap_or(path);
        let mut uri = format!("{}{}{}", self.target, self.rewrite_to, rest);
        if !query.is_empty() {
            uri.push('?');
            uri.push_str(query);
        }
        uri
    }
}

/// An inbound request, as handed to the proxy.
pub struct ForwardRequest {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_ip: Option<IpAddr>,
}

pub struct Proxy {
    client: Client<HttpConnector>,
    routes: Vec<ProxyRoute>,
    timeout: Duration,
}

impl Proxy {
    pub fn new(routes: Vec<ProxyRoute>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            routes,
            timeout,
        }
    }

    pub fn route_for(&self, path: &str) -> Option<&ProxyRoute> {
        self.routes.iter().find(|r| r.matches(path))
    }

    pub async fn forward(&self, route: &ProxyRoute, request: ForwardRequest) -> Result<Response<Body>, GatewayError> {
        let uri_str = route.rewrite(&request.path, &request.query);
        let uri: Uri = uri_str.parse().map_err(|e: hyper::http::uri::InvalidUri| {
            tracing::error!(uri = %uri_str, error = %e, "Failed to parse upstream URI");
            GatewayError::InvalidUri(e.to_string())
        })?;

        let mut upstream = Request::builder()
            .method(request.method.clone())
            .uri(uri)
            .body(Body::from(request.body))
            .map_err(|e| {
                tracing::error!(error = %e, "Error building upstream request");
                GatewayError::Internal(e.to_string())
            })?;
        *upstream.headers_mut() = forwarded_headers(&request.headers, request.client_ip);

        let response = match timeout(self.timeout, self.client.request(upstream)).await {
            Ok(result) => result.map_err(|e| {
                tracing::error!(service = route.name, uri = %uri_str, error = %e, "Error forwarding request");
                GatewayError::Upstream(e.to_string())
            })?,
            Err(_) => {
                tracing::warn!(service = route.name, uri = %uri_str, timeout_secs = self.timeout.as_secs(), "Upstream timed out");
                return Err(GatewayError::Timeout);
            }
        };

        tracing::debug!(
            service = route.name,
            method = %request.method,
            uri = %uri_str,
            status = response.status().as_u16(),
            "Upstream responded"
        );

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, body))
    }
}

/// Buffer a request body, failing with 413 as soon as it grows past `limit` bytes.
/// Chunked uploads declare no length up front, so the cap is enforced while reading.
pub async fn collect_body<S, B, E>(body: S, limit: u64) -> Result<Bytes, GatewayError>
where
    S: Stream<Item = Result<B, E>>,
    B: Buf,
    E: std::fmt::Display,
{
    pin_mut!(body);
    let mut collected = BytesMut::new();
    while let Some(chunk) = body
        .try_next()
        .await
        .map_err(|e| GatewayError::BadRequest(format!("Failed to read request body: {}", e)))?
    {
        if (collected.len() + chunk.remaining()) as u64 > limit {
            tracing::warn!(limit, received = collected.len(), "Request body over the upload limit");
            return Err(GatewayError::PayloadTooLarge);
        }
        collected.put(chunk);
    }
    Ok(collected.freeze())
}

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(name.as_str())
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let names: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_hop_by_hop(name))
        .cloned()
        .collect();
    for name in names {
        headers.remove(&name);
    }
}

/// Headers for the upstream request: inbound ones minus hop-by-hop and `host`,
/// plus the `x-forwarded-*` set. `authorization` is kept for the backends' own checks.
pub fn forwarded_headers(inbound: &HeaderMap, client_ip: Option<IpAddr>) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len() + 3);
    for (name, value) in inbound.iter() {
        if *name != HOST && !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    if let Some(ip) = client_ip {
        let forwarded_for = match inbound.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(prior) if !prior.trim().is_empty() => format!("{}, {}", prior.trim(), ip),
            _ => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    if let Some(host) = inbound.get(HOST) {
        headers.insert(X_FORWARDED_HOST, host.clone());
    }
    if !headers.contains_key(X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }

    headers
}
