//! Middleware chain wrapping RPC dispatch
//!
//! Middleware runs left to right; each stage either short-circuits with a
//! response or hands the context to the rest of the chain via [`Next`].
//! `Next` is consumed by value, so invoking the tail twice is
//! unrepresentable rather than a runtime failure.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use convoy_core::{time, Aid};
use dashmap::DashMap;
use serde_json::Value;

use crate::envelope::{ErrorObject, Request, Response};
use crate::server::MethodTable;

/// Per-request context flowing through the chain.
pub struct RequestContext {
    pub request: Request,
    /// Authenticated caller, when known.
    pub from: Option<Aid>,
    /// Unix milliseconds at which the frame was received.
    pub received_at: u64,
    /// Scratch space shared along the chain.
    pub metadata: HashMap<String, Value>,
}

/// One stage of the middleware chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> Response;
}

/// The remainder of the chain plus the final dispatcher.
pub struct Next<'a> {
    pub(crate) chain: &'a [Arc<dyn Middleware>],
    pub(crate) table: &'a MethodTable,
}

impl Next<'_> {
    /// Run the rest of the chain, ending at method dispatch.
    pub async fn run(self, ctx: &mut RequestContext) -> Response {
        match self.chain.split_first() {
            Some((middleware, rest)) => {
                let next = Next {
                    chain: rest,
                    table: self.table,
                };
                middleware.handle(ctx, next).await
            }
            None => self.table.dispatch(ctx).await,
        }
    }
}

/// Sliding-window rate limiter keyed by authenticated caller.
///
/// Counts request arrival times per identity over the trailing window;
/// over-limit requests short-circuit with `RATE_LIMIT_EXCEEDED` and never
/// reach the handler.
pub struct RateLimit {
    max_requests: usize,
    window_ms: u64,
    arrivals: DashMap<String, VecDeque<u64>>,
}

impl RateLimit {
    pub fn new(max_requests: usize, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
            arrivals: DashMap::new(),
        }
    }
}

#[async_trait]
impl Middleware for RateLimit {
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> Response {
        let key = ctx
            .from
            .as_ref()
            .map(|aid| aid.as_str().to_string())
            .unwrap_or_else(|| "<unauthenticated>".to_string());
        let now = time::now_millis();

        let allowed = {
            let mut window = self.arrivals.entry(key).or_default();
            while window
                .front()
                .is_some_and(|t| now.saturating_sub(*t) >= self.window_ms)
            {
                window.pop_front();
            }
            if window.len() >= self.max_requests {
                false
            } else {
                window.push_back(now);
                true
            }
        };

        if !allowed {
            tracing::debug!(
                from = ctx.from.as_ref().map(|a| a.as_str()).unwrap_or("-"),
                method = %ctx.request.method,
                "rate limit exceeded"
            );
            return Response::failure(ctx.request.id.clone(), ErrorObject::rate_limit_exceeded());
        }
        next.run(ctx).await
    }
}

/// Logs method, caller, and elapsed time for every request.
///
/// Purely observational; the response passes through untouched.
#[derive(Default)]
pub struct RequestLog;

#[async_trait]
impl Middleware for RequestLog {
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> Response {
        let started = std::time::Instant::now();
        let method = ctx.request.method.clone();
        let from = ctx
            .from
            .as_ref()
            .map(|aid| aid.to_string())
            .unwrap_or_else(|| "-".to_string());

        let response = next.run(ctx).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &response.error {
            Some(error) => {
                tracing::debug!(%method, %from, code = error.code, elapsed_ms, "rpc request failed")
            }
            None => tracing::debug!(%method, %from, elapsed_ms, "rpc request"),
        }
        response
    }
}
