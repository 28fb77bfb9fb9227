use std::net::SocketAddr;
use hyper::HeaderMap;
use crate::middleware::{add_cors_headers, add_security_headers, client_key};

#[test]
fn test_add_cors_headers_any_origin() {
    let mut headers = HeaderMap::new();
    add_cors_headers(&mut headers, Some("http://evil.example"), &["*".to_string()]);

    assert_eq!(
        headers.get("access-control-allow-origin").unwrap(),
        "*"
    );
    assert_eq!(
        headers.get("access-control-allow-methods").unwrap(),
        "GET, POST, PUT, DELETE, PATCH, OPTIONS"
    );
    assert_eq!(
        headers.get("access-control-allow-headers").unwrap(),
        "Content-Type, Authorization"
    );
}

#[test]
fn test_add_cors_headers_allow_list() {
    let allowed = vec!["http://localhost:3000".to_string()];

    let mut headers = HeaderMap::new();
    add_cors_headers(&mut headers, Some("http://localhost:3000"), &allowed);
    assert_eq!(
        headers.get("access-control-allow-origin").unwrap(),
        "http://localhost:3000"
    );
    assert_eq!(headers.get("vary").unwrap(), "Origin");

    let mut headers = HeaderMap::new();
    headers.insert("access-control-allow-origin", "*".parse().unwrap());
    add_cors_headers(&mut headers, Some("http://evil.example"), &allowed);
    assert!(headers.get("access-control-allow-origin").is_none());

    let mut headers = HeaderMap::new();
    add_cors_headers(&mut headers, None, &allowed);
    assert!(headers.get("access-control-allow-origin").is_none());
}

#[test]
fn test_add_security_headers() {
    let mut headers = HeaderMap::new();
    headers.insert("x-powered-by", "FastAPI".parse().unwrap());
    add_security_headers(&mut headers);

    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "SAMEORIGIN");
    assert!(headers.get("strict-transport-security").is_some());
    assert!(headers.get("x-powered-by").is_none());
}

#[test]
fn test_client_key() {
    let remote: SocketAddr = "192.168.0.10:51234".parse().unwrap();
    let mut headers = HeaderMap::new();

    assert_eq!(client_key(&headers, None, false), "unknown");
    assert_eq!(client_key(&headers, Some(remote), false), "192.168.0.10");

    // Forwarded hops are ignored unless the proxy is trusted
    headers.insert("x-forwarded-for", "203.0.113.5, 10.0.0.1".parse().unwrap());
    assert_eq!(client_key(&headers, Some(remote), false), "192.168.0.10");
    assert_eq!(client_key(&headers, Some(remote), true), "10.0.0.1");

    headers.insert("x-forwarded-for", "203.0.113.5,".parse().unwrap());
    assert_eq!(client_key(&headers, Some(remote), true), "192.168.0.10");

    headers.remove("x-forwarded-for");
    assert_eq!(client_key(&headers, Some(remote), true), "192.168.0.10");
}
