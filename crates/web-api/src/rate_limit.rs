//! 按客户端地址限流的中间件

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::{error::ApiError, state::AppState};

const UNKNOWN_CLIENT: &str = "unknown";

pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(limiter) = state.rate_limiter.as_ref() {
        let key = client_key(request.headers(), request.extensions().get::<ConnectInfo<SocketAddr>>());
        limiter.check(&key)?;
    }
    Ok(next.run(request).await)
}

/// `X-Forwarded-For` 的第一个地址优先，其次是对端地址
fn client_key(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_owned)
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn forwarded_header_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"));
        let peer = ConnectInfo("127.0.0.1:5000".parse::<SocketAddr>().unwrap());

        assert_eq!(client_key(&headers, Some(&peer)), "203.0.113.7");
    }

    #[test]
    fn peer_ip_without_port() {
        let peer = ConnectInfo("192.168.1.20:41234".parse::<SocketAddr>().unwrap());
        assert_eq!(client_key(&HeaderMap::new(), Some(&peer)), "192.168.1.20");
    }

    #[test]
    fn unknown_when_nothing_available() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("   "));
        assert_eq!(client_key(&headers, None), UNKNOWN_CLIENT);
    }
}
