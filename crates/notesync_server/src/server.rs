//! Main sync server.

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::{HandlerContext, RequestHandler};
use notesync_engine::{HttpRequest, HttpResponse, LoopbackServer, Replica};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The sync server.
///
/// Serves the sync endpoints of one replica. Requests arrive as
/// [`HttpRequest`] values, so the server can sit behind any HTTP front end
/// or be driven in-process through a [`notesync_engine::LoopbackClient`].
///
/// # Example
///
/// ```
/// use notesync_engine::{HttpTransport, LoopbackClient, PeerTransport, Replica};
/// use notesync_server::{ServerConfig, SyncServer};
/// use notesync_store::Store;
/// use std::sync::Arc;
///
/// let replica = Arc::new(Replica::open(Arc::new(Store::open_in_memory())).unwrap());
/// let server = Arc::new(SyncServer::new(ServerConfig::default(), replica));
///
/// let transport = HttpTransport::new("/api/sync", LoopbackClient::new(server));
/// assert_eq!(transport.check().unwrap().max_sync_id, 0);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a server for a replica with no peer of its own.
    pub fn new(config: ServerConfig, replica: Arc<Replica>) -> Self {
        Self::with_context(HandlerContext::new(config, replica))
    }

    /// Creates a server from a prepared context (runner, scheduler).
    pub fn with_context(context: HandlerContext) -> Self {
        info!(
            bind_addr = %context.config.bind_addr,
            base_path = %context.config.base_path,
            source_id = %context.replica.source_id(),
            auth = context.config.require_auth,
            "sync endpoints ready"
        );
        let context = Arc::new(context);
        let handler = RequestHandler::new(Arc::clone(&context));
        Self { handler, context }
    }

    /// Handles one request, returning the JSON body on success.
    pub fn handle_request(&self, request: &HttpRequest) -> ServerResult<Vec<u8>> {
        self.handler.handle(request)
    }

    /// Returns the handler context.
    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.context
    }

    /// Returns the served replica.
    pub fn replica(&self) -> &Arc<Replica> {
        &self.context.replica
    }
}

impl LoopbackServer for SyncServer {
    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        match self.handle_request(request) {
            Ok(body) => HttpResponse::new(200, body),
            Err(err) => {
                if err.is_server_error() {
                    warn!(path = %request.path(), error = %err, "sync request failed");
                } else {
                    debug!(path = %request.path(), error = %err, "sync request refused");
                }
                err.to_response()
            }
        }
    }
}

impl std::fmt::Debug for SyncServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServer")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notesync_engine::{Method, SyncConfig};
    use notesync_protocol::{decode, ErrorResponse, SourceId};
    use notesync_store::Store;

    fn server() -> SyncServer {
        let replica = Arc::new(Replica::with_config(
            Arc::new(Store::open_in_memory()),
            SyncConfig::new(SourceId::new("server")),
        ));
        SyncServer::new(ServerConfig::default(), replica)
    }

    #[test]
    fn success_is_200_with_body() {
        let response = server().handle(&HttpRequest::new(Method::Get, "/api/sync/check"));
        assert_eq!(response.status, 200);
        assert!(!response.body.is_empty());
    }

    #[test]
    fn errors_carry_status_and_message() {
        let server = server();
        let response = server.handle(&HttpRequest::new(Method::Get, "/api/sync/options/theme"));
        assert_eq!(response.status, 403);
        let body: ErrorResponse = decode(&response.body).unwrap();
        assert_eq!(body.error, "This option can't be synced.");

        let response = server.handle(&HttpRequest::new(Method::Post, "/api/sync/now"));
        assert_eq!(response.status, 409);
    }

    #[test]
    fn custom_base_path() {
        let replica = server().replica().clone();
        let server = SyncServer::new(ServerConfig::default().with_base_path("/sync"), replica);
        let response = server.handle(&HttpRequest::new(Method::Get, "/sync/check"));
        assert_eq!(response.status, 200);
        let response = server.handle(&HttpRequest::new(Method::Get, "/api/sync/check"));
        assert_eq!(response.status, 404);
    }
}
