//! HTTP transport against the matchsync server.

use super::RemoteTransport;
use crate::error::{SyncError, SyncResult};
use crate::identity::IdentityProvider;
use async_trait::async_trait;
use matchsync_engine::{Cursor, PullResponse, PushRequest, PushResponse};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Header carrying the user mutations are attributed to.
pub const USER_HEADER: &str = "x-matchsync-user";

/// JSON-over-HTTP transport.
///
/// `POST {base}/sync/push` and `GET {base}/sync/pull?cursor=..&limit=..`.
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    client: Client,
    token: Option<String>,
    /// Asked for the attribution header on every request
    identity: Option<Arc<dyn IdentityProvider>>,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("has_token", &self.token.is_some())
            .field("has_identity", &self.identity.is_some())
            .finish()
    }
}

impl HttpTransport {
    /// Creates a transport with a 30 second request timeout.
    pub fn new(base_url: impl Into<String>) -> SyncResult<Self> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::TransientNetwork(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            token: None,
            identity: None,
        })
    }

    /// Sets the bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Attributes requests to whoever `identity` reports as signed in at
    /// the time of each request. Usually the provider given to the engine.
    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let user = self.identity.as_ref().and_then(|i| i.current_user());
        if let Some(user) = user {
            request = request.header(USER_HEADER, user);
        }
        request
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> SyncResult<T> {
        let response = self.authorize(request).send().await?;
        let response = classify(response).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| SyncError::MalformedResponse(e.to_string()))
    }
}

/// Map an HTTP status onto the error taxonomy.
async fn classify(response: Response) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = format!("{status}: {body}");
    tracing::warn!(%status, "remote store returned an error");

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::Authorization(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            SyncError::TransientNetwork(message)
        }
        s if s.is_server_error() => SyncError::TransientNetwork(message),
        _ => SyncError::MalformedResponse(message),
    })
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        let url = format!("{}/sync/push", self.base_url);
        self.send(self.client.post(url).json(request)).await
    }

    async fn pull(&self, cursor: &Cursor, limit: usize) -> SyncResult<PullResponse> {
        let url = format!("{}/sync/pull", self.base_url);
        let limit = limit.to_string();
        let query = [("cursor", cursor.as_str()), ("limit", limit.as_str())];
        self.send(self.client.get(url).query(&query)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash() {
        let transport = HttpTransport::new("http://localhost:3000/").unwrap();
        assert_eq!(transport.base_url(), "http://localhost:3000");
    }

    #[test]
    fn attribution_follows_the_signed_in_user() {
        let signed_in = Arc::new(parking_lot::Mutex::new(Some("alice".to_string())));
        let current = signed_in.clone();
        let identity = move || current.lock().clone();
        let transport = HttpTransport::new("http://localhost:3000")
            .unwrap()
            .with_token("secret")
            .with_identity(Arc::new(identity));

        let user_header = |transport: &HttpTransport| {
            let request = transport
                .authorize(transport.client.get("http://localhost:3000/sync/pull"))
                .build()
                .unwrap();
            request
                .headers()
                .get(USER_HEADER)
                .map(|v| v.to_str().unwrap().to_string())
        };

        assert_eq!(user_header(&transport).as_deref(), Some("alice"));
        *signed_in.lock() = Some("bob".to_string());
        assert_eq!(user_header(&transport).as_deref(), Some("bob"));
        *signed_in.lock() = None;
        assert_eq!(user_header(&transport), None);
    }

    #[tokio::test]
    async fn unreachable_server_is_transient() {
        // Port 9 (discard) is closed on test machines
        let transport =
            HttpTransport::with_timeout("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = transport.pull(&Cursor::beginning(), 10).await.unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err}");
    }
}
