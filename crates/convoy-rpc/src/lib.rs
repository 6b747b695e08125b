#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

//! Authenticated JSON-RPC runtime for convoy agents.
//!
//! Frames are single JSON documents on a WebSocket; every request carries an
//! `auth` block signed over the canonical JSON of its payload, so a server
//! can verify the caller from the identifier alone. The runtime provides:
//!
//! - [`RpcClient`]: request/response correlation, directory-based target
//!   resolution, per-request timeouts, and auto-reconnect with backoff
//! - [`RpcServer`]: connection management, authentication, a composable
//!   middleware chain, notifications/broadcasts, and heartbeats
//! - Event relay: attach a [`convoy_events::EventStream`] to a server and
//!   remote subscribers get buffered replay plus live, filtered fan-out

mod auth;
mod client;
mod config;
mod envelope;
mod error;
mod middleware;
mod server;

pub use auth::{sign_full_request, sign_payload, verify_request, SignaturePolicy};
pub use client::{ClientEvent, RpcClient};
pub use config::{RpcClientConfig, RpcServerConfig};
pub use envelope::{
    classify_frame, code, Auth, ErrorObject, Frame, Request, RequestId, Response,
};
pub use error::{Error, Result};
pub use middleware::{Middleware, Next, RateLimit, RequestContext, RequestLog};
pub use server::{HandlerResult, RpcServer, ServerEvent};
