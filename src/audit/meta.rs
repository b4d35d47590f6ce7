use std::{convert::Infallible, net::IpAddr};

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};

const MAX_USER_AGENT: usize = 255;

/// Caller address and agent, stored alongside audit entries and tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientMeta {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            ip_address: client_ip(headers).map(|ip| ip.to_string()),
            user_agent: headers
                .get(axum::http::header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(|ua| ua.chars().take(MAX_USER_AGENT).collect()),
        }
    }
}

/// First parseable address from `X-Forwarded-For`, then `X-Real-IP`.
fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok());

    forwarded.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    })
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientMeta {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientMeta::from_headers(&parts.headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_for_wins_over_real_ip() {
        let mut h = HeaderMap::new();
        h.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        h.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(
            ClientMeta::from_headers(&h).ip_address.as_deref(),
            Some("203.0.113.7")
        );
    }

    #[test]
    fn garbage_addresses_are_dropped() {
        let mut h = HeaderMap::new();
        h.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        h.insert("x-real-ip", HeaderValue::from_static("::1"));
        assert_eq!(ClientMeta::from_headers(&h).ip_address.as_deref(), Some("::1"));

        let empty = ClientMeta::from_headers(&HeaderMap::new());
        assert_eq!(empty, ClientMeta::default());
    }

    #[test]
    fn user_agent_is_truncated() {
        let mut h = HeaderMap::new();
        let long = "a".repeat(400);
        h.insert("user-agent", HeaderValue::from_str(&long).unwrap());
        let meta = ClientMeta::from_headers(&h);
        assert_eq!(meta.user_agent.unwrap().len(), MAX_USER_AGENT);
    }
}
