//! Connection authentication.
//!
//! The broker never decides who may connect. An [`Authenticator`] resolves a
//! stable user identifier from the upgrade request before anything is
//! registered; a rejected request never gets a handle.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio_tungstenite::tungstenite::handshake::server::Request;
use url::form_urlencoded;

use crate::error::{Error, Result};
use crate::identifiers::UserId;

// ============================================================================
// Constants
// ============================================================================

/// Query parameter read by [`QueryParamAuthenticator::default`].
pub const DEFAULT_USER_ID_PARAM: &str = "user_id";

// ============================================================================
// ConnectRequest
// ============================================================================

/// Transport-independent view of a WebSocket upgrade request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Request path, without the query string.
    path: String,
    /// Decoded query pairs, in request order.
    query: Vec<(String, String)>,
    /// Header pairs with lowercase names.
    headers: Vec<(String, String)>,
}

impl ConnectRequest {
    /// Creates a request from a path and a raw (still encoded) query string.
    #[must_use]
    pub fn new(path: impl Into<String>, raw_query: &str) -> Self {
        let query = form_urlencoded::parse(raw_query.as_bytes())
            .into_owned()
            .collect();

        Self {
            path: path.into(),
            query,
            headers: Vec::new(),
        }
    }

    /// Adds a header. Names are matched case-insensitively.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    /// Captures the parts of a handshake request an authenticator may need.
    ///
    /// Headers whose value is not valid visible ASCII are skipped.
    pub(crate) fn from_handshake(request: &Request) -> Self {
        let uri = request.uri();
        let mut connect = Self::new(uri.path(), uri.query().unwrap_or_default());

        for (name, value) in request.headers() {
            if let Ok(value) = value.to_str() {
                connect.headers.push((name.as_str().to_owned(), value.to_owned()));
            }
        }

        connect
    }

    /// Returns the request path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the first value of a query parameter.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Returns the first value of a header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

// ============================================================================
// Authenticator
// ============================================================================

/// Resolves the user behind an upgrade request.
///
/// Implementations typically verify a token and map it to a user ID.
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    /// Returns the verified user ID for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegistrationRejected`] when no identity can be
    /// resolved. Other errors are treated the same way.
    async fn authenticate(&self, request: &ConnectRequest) -> Result<UserId>;
}

// ============================================================================
// QueryParamAuthenticator
// ============================================================================

/// Trusts a user ID passed as a query parameter.
///
/// Only suitable behind a gateway that has already verified the caller.
#[derive(Debug, Clone)]
pub struct QueryParamAuthenticator {
    param: String,
}

impl QueryParamAuthenticator {
    /// Reads the user ID from the query parameter `param`.
    #[must_use]
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
        }
    }

    /// Returns the query parameter name.
    #[inline]
    #[must_use]
    pub fn param(&self) -> &str {
        &self.param
    }
}

impl Default for QueryParamAuthenticator {
    fn default() -> Self {
        Self::new(DEFAULT_USER_ID_PARAM)
    }
}

#[async_trait]
impl Authenticator for QueryParamAuthenticator {
    async fn authenticate(&self, request: &ConnectRequest) -> Result<UserId> {
        request
            .query_param(&self.param)
            .and_then(UserId::new)
            .ok_or_else(|| {
                Error::registration_rejected(format!("missing or blank `{}` parameter", self.param))
            })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_is_decoded() {
        let request = ConnectRequest::new("/ws", "user_id=a%20b&x=1&user_id=second");
        assert_eq!(request.path(), "/ws");
        assert_eq!(request.query_param("user_id"), Some("a b"));
        assert_eq!(request.query_param("x"), Some("1"));
        assert_eq!(request.query_param("missing"), None);
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let request = ConnectRequest::new("/", "").with_header("Authorization", "Bearer t");
        assert_eq!(request.header("authorization"), Some("Bearer t"));
        assert_eq!(request.header("AUTHORIZATION"), Some("Bearer t"));
    }

    #[test]
    fn test_from_handshake() {
        let request = Request::builder()
            .uri("/ws?user_id=u1")
            .header("X-Request-Id", "abc")
            .body(())
            .unwrap();

        let connect = ConnectRequest::from_handshake(&request);
        assert_eq!(connect.path(), "/ws");
        assert_eq!(connect.query_param("user_id"), Some("u1"));
        assert_eq!(connect.header("x-request-id"), Some("abc"));
    }

    #[tokio::test]
    async fn test_query_param_authenticator() {
        let auth = QueryParamAuthenticator::default();
        assert_eq!(auth.param(), "user_id");

        let user = auth
            .authenticate(&ConnectRequest::new("/ws", "user_id=u1"))
            .await
            .unwrap();
        assert_eq!(user.as_str(), "u1");
    }

    #[tokio::test]
    async fn test_missing_or_blank_user_is_rejected() {
        let auth = QueryParamAuthenticator::default();
        for query in ["", "user_id=", "user_id=%20%20", "other=u1"] {
            let err = auth
                .authenticate(&ConnectRequest::new("/ws", query))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::RegistrationRejected { .. }), "query {query:?}");
        }
    }

    #[tokio::test]
    async fn test_custom_param() {
        let auth = QueryParamAuthenticator::new("uid");
        let user = auth
            .authenticate(&ConnectRequest::new("/", "uid=u9"))
            .await
            .unwrap();
        assert_eq!(user.as_str(), "u9");
    }
}
