//! # NoteSync Server
//!
//! The sync endpoints a NoteSync replica exposes to its peers.
//!
//! This crate provides:
//! - Routing for the endpoints under `/api/sync` (check, changed, entity
//!   fetch and apply, now, force-full-sync, fill-sync-rows)
//! - Authentication (HMAC-SHA256 tokens)
//! - Mapping of engine and storage errors onto HTTP statuses
//!
//! # Architecture
//!
//! The server owns no state of its own. Every request is answered from the
//! served [`notesync_engine::Replica`]; `/now` and `/force-full-sync` go to
//! the engine that syncs that replica with its own peer, when one is
//! configured.
//!
//! # Authentication
//!
//! ```rust,ignore
//! use notesync_server::{AuthConfig, ServerConfig, TokenValidator};
//!
//! let secret = b"my-secure-secret".to_vec();
//! let config = ServerConfig::default().with_auth(secret.clone());
//!
//! // Mint a token for a peer replica
//! let validator = TokenValidator::new(AuthConfig::new(secret));
//! let token = validator.create_token("replica-a")?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod server;

pub use auth::{AuthConfig, TokenValidator};
pub use config::{ServerConfig, DEFAULT_BASE_PATH};
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use server::SyncServer;
