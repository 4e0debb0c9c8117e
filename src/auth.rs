//! Authorization check for mutating management calls
//!
//! The bridge only asks "is this caller allowed to change the registry?".
//! How that is decided is up to the [`AdminAuth`] implementation. Read
//! endpoints and the proxy path are never gated, and a service's
//! `auth_required` flag is not enforced here.

use hyper::header::AUTHORIZATION;
use hyper::HeaderMap;

pub trait AdminAuth: Send + Sync {
    fn authorize(&self, headers: &HeaderMap) -> bool;
}

/// Accepts every caller
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAccess;

impl AdminAuth for OpenAccess {
    fn authorize(&self, _headers: &HeaderMap) -> bool {
        true
    }
}

/// Accepts `Authorization: Bearer <token>` or the bare token
#[derive(Debug, Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl AdminAuth for StaticToken {
    fn authorize(&self, headers: &HeaderMap) -> bool {
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|auth| auth.strip_prefix("Bearer ").unwrap_or(auth).eq(&self.token))
            .unwrap_or(false)
    }
}
