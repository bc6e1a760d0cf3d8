//! HTTP transport implementation.
//!
//! The sync endpoints are plain request/response JSON exchanges, so the
//! actual HTTP client is abstracted behind [`HttpClient`]. [`LoopbackClient`]
//! routes requests straight into an in-process server.

use crate::error::{SyncError, SyncResult};
use crate::transport::PeerTransport;
use notesync_protocol::{
    decode, encode, ApplyOutcome, ChangeRecord, CheckResponse, Entity, EntityResponse,
    EntityType, ErrorResponse, SourceId, UpdateRequest,
};
use parking_lot::RwLock;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use url::{form_urlencoded, Url};

/// Host that bare request paths are resolved against.
const LOOPBACK_BASE: &str = "http://loopback/";

/// Bytes escaped when an entity id becomes a path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
}

impl Method {
    /// Returns the method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }
}

/// An HTTP-shaped request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method.
    pub method: Method,
    /// Absolute URL or path, with query string.
    pub url: String,
    /// Bearer token, if any.
    pub token: Option<String>,
    /// JSON body.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Creates a request without a body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            token: None,
            body: Vec::new(),
        }
    }

    /// Sets the body.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Sets the bearer token.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Parses the request target. A bare path is resolved against a
    /// loopback host.
    pub fn parse_url(&self) -> Result<Url, url::ParseError> {
        match Url::parse(&self.url) {
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Url::parse(LOOPBACK_BASE)?.join(&self.url)
            }
            parsed => parsed,
        }
    }

    /// The percent-encoded path, without scheme, authority or query.
    /// Falls back to the raw target when it does not parse.
    pub fn path(&self) -> String {
        self.parse_url()
            .map(|url| url.path().to_string())
            .unwrap_or_else(|_| self.url.clone())
    }
}

/// An HTTP-shaped response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// JSON body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// Returns true for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. This allows
/// using different HTTP libraries or an in-process loopback.
pub trait HttpClient: Send + Sync {
    /// Sends a request. `Err` means the request never got a response.
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based peer transport.
///
/// Uses JSON bodies and the endpoint layout served by the sync server
/// (`{base_url}/check`, `{base_url}/changed?lastSyncId=N`, ...).
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the peer's sync endpoints (e.g. "http://peer:8080/api/sync").
    base_url: String,
    /// HTTP client implementation.
    client: C,
    /// Token sent with every request.
    token: Option<String>,
    /// Connection state.
    connected: AtomicBool,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            token: None,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Sets the token sent with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the HTTP client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn set_error(&self, err: &str) {
        *self.last_error.write() = Some(err.to_string());
    }

    fn request<Res: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Vec<u8>,
    ) -> SyncResult<Res> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let url = format!("{}{}", self.base_url, endpoint);
        let request = HttpRequest::new(method, url)
            .with_body(body)
            .with_token(self.token.clone());

        let response = self.client.send(request).map_err(|e| {
            self.set_error(&e);
            SyncError::transport_retryable(e)
        })?;

        if !response.is_success() {
            let message = decode::<ErrorResponse>(&response.body)
                .map(|body| body.error)
                .unwrap_or_else(|_| format!("status {}", response.status));
            self.set_error(&message);
            return Err(status_error(response.status, message));
        }

        *self.last_error.write() = None;
        Ok(decode(&response.body)?)
    }
}

/// Maps a non-success status onto the error taxonomy.
fn status_error(status: u16, message: String) -> SyncError {
    match status {
        400 | 403 => SyncError::Rejected(message),
        401 => SyncError::transport_fatal(format!("unauthorized: {message}")),
        408 => SyncError::Timeout,
        409 | 500..=599 => SyncError::ServerError(message),
        _ => SyncError::transport_fatal(format!("unexpected status {status}: {message}")),
    }
}

impl<C: HttpClient> PeerTransport for HttpTransport<C> {
    fn check(&self) -> SyncResult<CheckResponse> {
        self.request(Method::Get, "/check", Vec::new())
    }

    fn changed(&self, last_sync_id: u64) -> SyncResult<Vec<ChangeRecord>> {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("lastSyncId", &last_sync_id.to_string())
            .finish();
        self.request(Method::Get, &format!("/changed?{query}"), Vec::new())
    }

    fn fetch_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> SyncResult<Option<Entity>> {
        let response: EntityResponse = self.request(
            Method::Get,
            &format!("/{}/{}", entity_type, utf8_percent_encode(entity_id, SEGMENT)),
            Vec::new(),
        )?;
        Ok(response.into_entity(entity_type)?)
    }

    fn push_entity(&self, entity: &Entity, source_id: &SourceId) -> SyncResult<ApplyOutcome> {
        let body = encode(&UpdateRequest::new(entity, source_id.clone())?)?;
        self.request(Method::Put, &format!("/{}", entity.entity_type()), body)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles one request.
    fn handle(&self, request: &HttpRequest) -> HttpResponse;
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for std::sync::Arc<S> {
    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        (**self).handle(request)
    }
}

/// A loopback HTTP client that routes requests directly to a sync server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    healthy: AtomicBool,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            healthy: AtomicBool::new(true),
        }
    }

    /// Simulates the peer becoming unreachable (or reachable again).
    pub fn set_reachable(&self, reachable: bool) {
        self.healthy.store(reachable, Ordering::SeqCst);
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err("connection refused".into());
        }
        Ok(self.server.handle(&request))
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
