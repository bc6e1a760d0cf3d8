//! Request handlers for sync endpoints.

use crate::auth::{AuthConfig, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use notesync_engine::{HttpRequest, Method, Replica, SyncRunner, SyncScheduler};
use notesync_protocol::{decode, encode, Ack, EntityResponse, EntityType, UpdateRequest};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything the handlers need to answer requests for one replica.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// The replica served by this endpoint surface.
    pub replica: Arc<Replica>,
    /// Runs cycles for `/now` (absent when no peer is configured).
    runner: Option<Arc<dyn SyncRunner>>,
    /// Background scheduler used by `/force-full-sync`, if running.
    scheduler: Option<Arc<SyncScheduler>>,
    /// Token validator (present when auth is required).
    validator: Option<TokenValidator>,
}

impl HandlerContext {
    /// Creates a handler context for a replica.
    pub fn new(config: ServerConfig, replica: Arc<Replica>) -> Self {
        let validator = match (&config.auth_secret, config.require_auth) {
            (Some(secret), true) => Some(TokenValidator::new(
                AuthConfig::new(secret.clone()).with_expiry(config.token_expiry),
            )),
            (None, true) => {
                warn!("auth is required but no secret is configured; refusing all requests");
                None
            }
            _ => None,
        };

        Self {
            config,
            replica,
            runner: None,
            scheduler: None,
            validator,
        }
    }

    /// Attaches the engine that runs cycles against this replica's peer.
    pub fn with_runner(mut self, runner: Arc<dyn SyncRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Attaches a background scheduler.
    pub fn with_scheduler(mut self, scheduler: Arc<SyncScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// The token validator, when auth is enabled.
    pub fn validator(&self) -> Option<&TokenValidator> {
        self.validator.as_ref()
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("config", &self.config)
            .field("source_id", self.replica.source_id())
            .field("has_runner", &self.runner.is_some())
            .field("has_scheduler", &self.scheduler.is_some())
            .finish_non_exhaustive()
    }
}

/// Handler for sync requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Authenticates, routes and answers one request with a JSON body.
    pub fn handle(&self, request: &HttpRequest) -> ServerResult<Vec<u8>> {
        self.authenticate(request)?;

        let url = request
            .parse_url()
            .map_err(|e| ServerError::InvalidRequest(format!("invalid request url: {e}")))?;
        let path = url.path();
        let route = path
            .strip_prefix(self.context.config.base_path.as_str())
            .filter(|rest| rest.starts_with('/'))
            .ok_or_else(|| ServerError::NotFound(path.to_string()))?;
        let decoded = route[1..]
            .split('/')
            .map(decode_segment)
            .collect::<ServerResult<Vec<_>>>()?;
        let segments: Vec<&str> = decoded.iter().map(|segment| segment.as_ref()).collect();

        debug!(method = request.method.as_str(), path, "sync request");
        match (request.method, segments.as_slice()) {
            (Method::Get, ["check"]) => self.handle_check(),
            (Method::Post, ["now"]) => self.handle_now(),
            (Method::Post, ["force-full-sync"]) => self.handle_force_full_sync(),
            (Method::Post, ["fill-sync-rows"]) => self.handle_fill_sync_rows(),
            (Method::Get, ["changed"]) => {
                let last_sync_id = url
                    .query_pairs()
                    .find(|(key, _)| key == "lastSyncId")
                    .map(|(_, value)| value.into_owned());
                self.handle_changed(last_sync_id.as_deref())
            }
            (Method::Get, ["options", name]) => self.handle_option(name),
            (Method::Get, [entity_type, entity_id]) => self.handle_entity(entity_type, entity_id),
            (Method::Put, [entity_type]) => self.handle_update(entity_type, &request.body),
            _ => Err(ServerError::NotFound(format!(
                "{} {}",
                request.method.as_str(),
                path
            ))),
        }
    }

    fn authenticate(&self, request: &HttpRequest) -> ServerResult<()> {
        if !self.context.config.require_auth {
            return Ok(());
        }
        let Some(validator) = &self.context.validator else {
            return Err(ServerError::NotAuthorized(
                "auth is required but no secret is configured".into(),
            ));
        };
        let token = request
            .token
            .as_deref()
            .ok_or_else(|| ServerError::NotAuthorized("missing token".into()))?;
        let replica_id = validator.validate_token(token).map_err(|err| {
            warn!(error = %err, "rejected sync request token");
            err
        })?;
        debug!(replica_id = %replica_id, "authenticated sync request");
        Ok(())
    }

    /// `GET /check`
    pub fn handle_check(&self) -> ServerResult<Vec<u8>> {
        json(&self.context.replica.check()?)
    }

    /// `POST /now`: runs one cycle (or joins the one in flight) and waits.
    pub fn handle_now(&self) -> ServerResult<Vec<u8>> {
        let runner = self.runner()?;
        json(&runner.run_cycle()?)
    }

    /// `POST /force-full-sync`: queues a watermark reset plus cycle and
    /// returns without waiting for either.
    pub fn handle_force_full_sync(&self) -> ServerResult<Vec<u8>> {
        if let Some(scheduler) = &self.context.scheduler {
            scheduler.force_full_sync()?;
            return json(&Ack::default());
        }

        let runner = self.runner()?;
        info!("forcing full sync");
        std::thread::Builder::new()
            .name("notesync-full-sync".into())
            .spawn(move || match runner.run_full_cycle() {
                Ok(result) => info!(
                    pulled = result.pulled,
                    pushed = result.pushed,
                    "full sync finished"
                ),
                Err(err) => warn!(error = %err, "full sync failed"),
            })
            .map_err(|e| ServerError::Internal(format!("cannot spawn sync thread: {e}")))?;
        json(&Ack::default())
    }

    /// `POST /fill-sync-rows`
    pub fn handle_fill_sync_rows(&self) -> ServerResult<Vec<u8>> {
        json(&self.context.replica.repair()?)
    }

    /// `GET /changed?lastSyncId=N`
    pub fn handle_changed(&self, last_sync_id: Option<&str>) -> ServerResult<Vec<u8>> {
        let last_sync_id = last_sync_id
            .ok_or_else(|| ServerError::InvalidRequest("missing lastSyncId".into()))?;
        let last_sync_id: u64 = last_sync_id.parse().map_err(|_| {
            ServerError::InvalidRequest(format!("invalid lastSyncId {last_sync_id:?}"))
        })?;
        json(&self.context.replica.changed(last_sync_id))
    }

    /// `GET /options/{name}`: 403 for options outside the allow-list.
    pub fn handle_option(&self, name: &str) -> ServerResult<Vec<u8>> {
        let option = self.context.replica.option(name)?;
        json(&EntityResponse::from_entity(option.as_ref())?)
    }

    /// `GET /{entityType}/{id}`
    pub fn handle_entity(&self, entity_type: &str, entity_id: &str) -> ServerResult<Vec<u8>> {
        let entity_type: EntityType = entity_type.parse()?;
        let entity = self.context.replica.entity(entity_type, entity_id);
        json(&EntityResponse::from_entity(entity.as_ref())?)
    }

    /// `PUT /{entityType}`
    pub fn handle_update(&self, entity_type: &str, body: &[u8]) -> ServerResult<Vec<u8>> {
        let entity_type: EntityType = entity_type.parse()?;
        let request: UpdateRequest = decode(body)?;
        let (entity, source_id) = request.into_entity(entity_type)?;
        json(&self.context.replica.apply(entity, &source_id)?)
    }

    fn runner(&self) -> ServerResult<Arc<dyn SyncRunner>> {
        self.context
            .runner
            .clone()
            .ok_or_else(|| ServerError::Unavailable("no sync peer configured".into()))
    }
}

fn json<T: Serialize>(body: &T) -> ServerResult<Vec<u8>> {
    Ok(encode(body)?)
}

fn decode_segment(segment: &str) -> ServerResult<Cow<'_, str>> {
    percent_decode_str(segment)
        .decode_utf8()
        .map_err(|_| ServerError::InvalidRequest(format!("path segment {segment:?} is not UTF-8")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use notesync_engine::{SyncConfig, OPTION_NOT_SYNCED};
    use notesync_protocol::{
        ApplyOutcome, ChangeRecord, CheckResponse, Entity, OptionEntry, SourceId,
    };
    use notesync_store::Store;

    fn replica() -> Arc<Replica> {
        Arc::new(Replica::with_config(
            Arc::new(Store::open_in_memory()),
            SyncConfig::new(SourceId::new("server")),
        ))
    }

    fn handler_for(replica: Arc<Replica>) -> RequestHandler {
        RequestHandler::new(Arc::new(HandlerContext::new(ServerConfig::default(), replica)))
    }

    fn get(path: &str) -> HttpRequest {
        HttpRequest::new(Method::Get, format!("/api/sync{path}"))
    }

    fn option(name: &str, value: &str) -> OptionEntry {
        OptionEntry {
            opt_name: name.into(),
            opt_value: value.into(),
            date_modified: Utc::now(),
        }
    }

    #[test]
    fn check_reports_identity() {
        let handler = handler_for(replica());
        let body = handler.handle(&get("/check")).unwrap();
        let check: CheckResponse = decode(&body).unwrap();
        assert_eq!(check.source_id.as_str(), "server");
        assert_eq!(check.max_sync_id, 0);
    }

    #[test]
    fn changed_requires_last_sync_id() {
        let replica = replica();
        replica.save_local(option("username", "alice")).unwrap();
        replica.save_local(option("username", "bob")).unwrap();
        let handler = handler_for(replica);

        let body = handler.handle(&get("/changed?lastSyncId=1")).unwrap();
        let records: Vec<ChangeRecord> = decode(&body).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 2);

        let missing = handler.handle(&get("/changed")).unwrap_err();
        assert_eq!(missing.status_code(), 400);
        let garbage = handler.handle(&get("/changed?lastSyncId=x")).unwrap_err();
        assert_eq!(garbage.status_code(), 400);
    }

    #[test]
    fn option_route_rejects_local_options() {
        let replica = replica();
        replica.save_local(option("theme", "dark")).unwrap();
        replica.save_local(option("username", "alice")).unwrap();
        let handler = handler_for(replica);

        let err = handler.handle(&get("/options/theme")).unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.to_string(), OPTION_NOT_SYNCED);

        let body = handler.handle(&get("/options/username")).unwrap();
        let response: EntityResponse = decode(&body).unwrap();
        let entity = response.into_entity(EntityType::Option).unwrap().unwrap();
        assert_eq!(entity.entity_id(), "username");
    }

    #[test]
    fn entity_route_decodes_ids() {
        let replica = replica();
        replica
            .save_local(notesync_protocol::RecentNote {
                note_tree_id: "a b".into(),
                note_path: "root/a b".into(),
                date_accessed: Utc::now(),
                is_deleted: false,
            })
            .unwrap();
        let handler = handler_for(replica);

        let body = handler.handle(&get("/recent_notes/a%20b")).unwrap();
        let response: EntityResponse = decode(&body).unwrap();
        assert!(response.entity.is_some());

        let body = handler.handle(&get("/notes/missing")).unwrap();
        let response: EntityResponse = decode(&body).unwrap();
        assert!(response.entity.is_none());

        let err = handler.handle(&get("/attributes/x")).unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn update_applies_with_origin() {
        let replica = replica();
        let handler = handler_for(replica.clone());
        let entity = Entity::Option(option("username", "alice"));
        let body = encode(&UpdateRequest::new(&entity, SourceId::new("peer")).unwrap()).unwrap();
        let request = HttpRequest::new(Method::Put, "/api/sync/options").with_body(body);

        let outcome: ApplyOutcome = decode(&handler.handle(&request).unwrap()).unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
        let outcome: ApplyOutcome = decode(&handler.handle(&request).unwrap()).unwrap();
        assert_eq!(outcome, ApplyOutcome::Skipped);

        let records = replica.changed(0);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_id.as_str(), "peer");

        let bad = HttpRequest::new(Method::Put, "/api/sync/options").with_body(b"{".to_vec());
        assert_eq!(handler.handle(&bad).unwrap_err().status_code(), 400);
    }

    #[test]
    fn cycle_routes_need_a_peer() {
        let handler = handler_for(replica());
        let now = HttpRequest::new(Method::Post, "/api/sync/now");
        assert_eq!(handler.handle(&now).unwrap_err().status_code(), 409);
        let force = HttpRequest::new(Method::Post, "/api/sync/force-full-sync");
        assert_eq!(handler.handle(&force).unwrap_err().status_code(), 409);
    }

    #[test]
    fn fill_sync_rows_reports_counts() {
        let replica = replica();
        replica
            .store()
            .transaction(|txn| {
                txn.upsert(Entity::Option(option("username", "alice")));
                Ok::<_, notesync_store::StoreError>(())
            })
            .unwrap();
        let handler = handler_for(replica);

        let request = HttpRequest::new(Method::Post, "/api/sync/fill-sync-rows");
        let report: serde_json::Value = decode(&handler.handle(&request).unwrap()).unwrap();
        assert_eq!(report["created"], 1);
        assert_eq!(report["removed"], 0);
    }

    #[test]
    fn unknown_routes() {
        let handler = handler_for(replica());
        for request in [
            HttpRequest::new(Method::Get, "/other/check"),
            HttpRequest::new(Method::Get, "/api/syncx/check"),
            HttpRequest::new(Method::Post, "/api/sync/check"),
            HttpRequest::new(Method::Get, "/api/sync/a/b/c"),
        ] {
            assert_eq!(handler.handle(&request).unwrap_err().status_code(), 404);
        }
    }

    #[test]
    fn auth_is_enforced_when_required() {
        let config = ServerConfig::default().with_auth(b"secret".to_vec());
        let context = Arc::new(HandlerContext::new(config, replica()));
        let token = context.validator().unwrap().create_token("peer").unwrap();
        let handler = RequestHandler::new(context);

        let err = handler.handle(&get("/check")).unwrap_err();
        assert_eq!(err.status_code(), 401);
        let err = handler
            .handle(&get("/check").with_token(Some("peer.1.00".into())))
            .unwrap_err();
        assert_eq!(err.status_code(), 401);
        assert!(handler.handle(&get("/check").with_token(Some(token))).is_ok());
    }

    #[test]
    fn auth_without_secret_refuses_everything() {
        let config = ServerConfig {
            require_auth: true,
            ..ServerConfig::default()
        };
        let context = Arc::new(HandlerContext::new(config, replica()));
        assert!(context.validator().is_none());
        let handler = RequestHandler::new(context);

        let err = handler.handle(&get("/check")).unwrap_err();
        assert_eq!(err.status_code(), 401);
        let err = handler
            .handle(&get("/check").with_token(Some("peer.1.00".into())))
            .unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn changed_reads_last_sync_id_among_other_params() {
        let replica = replica();
        replica.save_local(option("username", "alice")).unwrap();
        replica.save_local(option("username", "bob")).unwrap();
        let handler = handler_for(replica);

        let body = handler
            .handle(&get("/changed?x=1&lastSyncId=%31"))
            .unwrap();
        let records: Vec<ChangeRecord> = decode(&body).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 2);
    }

    #[test]
    fn malformed_escapes_stay_verbatim() {
        let replica = replica();
        replica
            .save_local(notesync_protocol::RecentNote {
                note_tree_id: "%+1".into(),
                note_path: "root".into(),
                date_accessed: Utc::now(),
                is_deleted: false,
            })
            .unwrap();
        let handler = handler_for(replica);

        for path in ["/recent_notes/%+1", "/recent_notes/%25%2B1"] {
            let body = handler.handle(&get(path)).unwrap();
            let response: EntityResponse = decode(&body).unwrap();
            let entity = response.into_entity(EntityType::RecentNote).unwrap().unwrap();
            assert_eq!(entity.entity_id(), "%+1", "{path}");
        }

        let err = handler.handle(&get("/recent_notes/%FF")).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
