//! Wire-level data model shared by the broker, engines and transports.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one named cache inside a session's engine.
pub type CacheIdentifier = u64;

/// Client-chosen correlation token, echoed back on the response.
pub type RequestIdentifier = u64;

/// Identifier of one stored record inside a cache.
pub type RecordIdentifier = u64;

/// Number of outstanding references a connection holds on a cache.
pub type LockCount = u64;

const EPHEMERAL_SESSION_MASK: u64 = 1 << 63;

/// Opaque browsing-session token. Scopes cache identifiers and locks.
///
/// The high bit marks an ephemeral (private browsing) session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn ephemeral(value: u64) -> Self {
        Self(value | EPHEMERAL_SESSION_MASK)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }

    pub const fn is_ephemeral(&self) -> bool {
        self.0 & EPHEMERAL_SESSION_MASK != 0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ephemeral() {
            write!(f, "ephemeral:{}", self.0 & !EPHEMERAL_SESSION_MASK)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// The pair of origins a cache is partitioned by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientOrigin {
    pub top_origin: String,
    pub client_origin: String,
}

impl ClientOrigin {
    pub fn new(top_origin: impl Into<String>, client_origin: impl Into<String>) -> Self {
        Self {
            top_origin: top_origin.into(),
            client_origin: client_origin.into(),
        }
    }

    /// Origin where the top-level document and the client are the same.
    pub fn same_origin(origin: impl Into<String>) -> Self {
        let origin = origin.into();
        Self {
            top_origin: origin.clone(),
            client_origin: origin,
        }
    }
}

impl fmt::Display for ClientOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.top_origin == self.client_origin {
            f.write_str(&self.client_origin)
        } else {
            write!(f, "{} (in {})", self.client_origin, self.top_origin)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub identifier: CacheIdentifier,
    pub name: String,
}

/// Ordered cache listing of one origin at a given generation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheInfos {
    pub infos: Vec<CacheInfo>,
    pub update_counter: u64,
}

/// Answer to a list-caches request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CacheListing {
    /// The client's generation is current; nothing to resend.
    Unchanged { update_counter: u64 },
    Updated(CacheInfos),
}

impl CacheListing {
    pub fn update_counter(&self) -> u64 {
        match self {
            Self::Unchanged { update_counter } => *update_counter,
            Self::Updated(infos) => infos.update_counter,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Unchanged { .. } => 0,
            Self::Updated(infos) => infos.infos.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type HeaderList = Vec<(String, String)>;

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRequest {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HeaderList,
}

impl CacheRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: Vec::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheResponse {
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: HeaderList,
}

impl CacheResponse {
    pub fn ok() -> Self {
        Self {
            status: 200,
            status_text: "OK".to_string(),
            headers: Vec::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// A stored request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Zero for records that were never stored.
    #[serde(default)]
    pub identifier: RecordIdentifier,
    #[serde(default)]
    pub update_response_counter: u64,
    pub request: CacheRequest,
    pub response: CacheResponse,
    #[serde(default)]
    pub body: Vec<u8>,
}

impl Record {
    pub fn new(request: CacheRequest, response: CacheResponse, body: impl Into<Vec<u8>>) -> Self {
        Self {
            identifier: 0,
            update_response_counter: 0,
            request,
            response,
            body: body.into(),
        }
    }

    pub fn body_size(&self) -> u64 {
        self.body.len() as u64
    }
}

/// Options narrowing request matching, as in `CacheQueryOptions` of the Cache API.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheQueryOptions {
    pub ignore_search: bool,
    pub ignore_method: bool,
    pub ignore_vary: bool,
    pub cache_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ephemeral_session_flag() {
        let regular = SessionId::new(42);
        let private = SessionId::ephemeral(42);

        assert!(!regular.is_ephemeral());
        assert!(private.is_ephemeral());
        assert_ne!(regular, private);
        assert_eq!(private.to_string(), "ephemeral:42");
        assert_eq!(regular.to_string(), "42");
    }

    #[test]
    fn test_session_id_is_transparent_on_the_wire() {
        let json = serde_json::to_string(&SessionId::new(7)).unwrap();
        assert_eq!(json, "7");
        let back: SessionId = serde_json::from_str("7").unwrap();
        assert_eq!(back, SessionId::new(7));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut request = CacheRequest::get("https://example.com/a");
        request
            .headers
            .push(("Accept-Language".to_string(), "nl".to_string()));

        assert_eq!(request.header("accept-language"), Some("nl"));
        assert_eq!(request.header("accept"), None);
    }

    #[test]
    fn test_request_method_defaults_to_get() {
        let request: CacheRequest =
            serde_json::from_str(r#"{"url":"https://example.com/"}"#).unwrap();
        assert_eq!(request.method, "GET");
        assert!(request.headers.is_empty());
    }

    #[test]
    fn test_listing_counter() {
        let unchanged = CacheListing::Unchanged { update_counter: 3 };
        assert_eq!(unchanged.update_counter(), 3);
        assert!(unchanged.is_empty());

        let updated = CacheListing::Updated(CacheInfos {
            infos: vec![CacheInfo {
                identifier: 1,
                name: "v1".to_string(),
            }],
            update_counter: 4,
        });
        assert_eq!(updated.update_counter(), 4);
        assert_eq!(updated.len(), 1);
    }
}
