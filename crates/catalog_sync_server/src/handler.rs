//! Request handlers for sync endpoints.
//!
//! Handlers take already verified, already parsed requests. Signature
//! checking and body decoding live in [`crate::SyncServer`].

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use catalog_sync_engine::{ApplyEngine, ApplyOutcome, EntityStore};
use catalog_sync_protocol::{
    Change, ConflictReport, Entity, HealthResponse, PullQuery, PullResponse, PushResponse,
    RejectedChange, SyncRequest,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Context for request handling.
pub struct HandlerContext<S: EntityStore> {
    /// Server configuration.
    pub config: ServerConfig,
    /// Engine over the served store (shared with the local agent).
    pub engine: Arc<ApplyEngine<S>>,
}

impl<S: EntityStore> HandlerContext<S> {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, engine: Arc<ApplyEngine<S>>) -> Self {
        Self { config, engine }
    }
}

/// Handler for sync requests.
pub struct RequestHandler<S: EntityStore> {
    context: Arc<HandlerContext<S>>,
}

impl<S: EntityStore> RequestHandler<S> {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext<S>>) -> Self {
        Self { context }
    }

    /// Returns the handler context.
    pub fn context(&self) -> &Arc<HandlerContext<S>> {
        &self.context
    }

    /// Handles a push request.
    ///
    /// Each change commits on its own; a store failure midway leaves the
    /// earlier changes applied, which a retransmission then finds unchanged.
    pub fn handle_push(&self, request: SyncRequest) -> ServerResult<PushResponse> {
        let max = self.context.config.max_push_batch;
        if request.changes.len() > max {
            return Err(ServerError::BatchTooLarge {
                size: request.changes.len(),
                max,
            });
        }

        let engine = &self.context.engine;
        let current_rev = engine
            .store()
            .current_revision()
            .map_err(|e| ServerError::Sync(e.into()))?;
        if request.client_rev > current_rev {
            debug!(
                client_id = %request.client_id,
                client_rev = request.client_rev,
                current_rev,
                "client reports a revision ahead of this replica"
            );
        }

        let mut response = PushResponse {
            success: true,
            ..PushResponse::default()
        };
        let received = request.changes.len();

        for change in request.changes {
            let result = engine.apply_change(change)?;
            match result.outcome {
                ApplyOutcome::Applied | ApplyOutcome::Unchanged => response.applied_count += 1,
                ApplyOutcome::Conflict(reason) => response.conflicts.push(ConflictReport {
                    id: result.id,
                    reason,
                    current: result.winner,
                }),
                ApplyOutcome::Rejected(reason) => response.rejected.push(RejectedChange {
                    id: result.id,
                    reason,
                }),
            }
        }

        response.server_rev = engine
            .store()
            .current_revision()
            .map_err(|e| ServerError::Sync(e.into()))?;

        info!(
            client_id = %request.client_id,
            received,
            applied = response.applied_count,
            conflicts = response.conflicts.len(),
            rejected = response.rejected.len(),
            server_rev = response.server_rev,
            "push processed"
        );
        Ok(response)
    }

    /// Handles a pull request.
    ///
    /// The page is cut after `limit` changes but never between two entities
    /// sharing a revision, so continuing from the last returned revision
    /// skips nothing.
    pub fn handle_pull(&self, query: PullQuery) -> ServerResult<PullResponse> {
        let max = self.context.config.max_pull_page;
        let limit = query.limit.unwrap_or(max).min(max).max(1) as usize;

        let (entities, current_rev) = self.context.engine.changes_since(query.since_rev)?;
        let (page, has_more) = page_by_rev(entities, limit);

        let kind = self.context.engine.kind();
        let changes: Vec<Change> = page
            .into_iter()
            .map(|entity| Change::new(kind, entity))
            .collect();

        debug!(
            since_rev = query.since_rev,
            returned = changes.len(),
            current_rev,
            has_more,
            "pull served"
        );
        Ok(PullResponse {
            changes,
            current_rev,
            has_more,
        })
    }

    /// Handles a health check.
    pub fn health(&self) -> ServerResult<HealthResponse> {
        let current_rev = self
            .context
            .engine
            .store()
            .current_revision()
            .map_err(|e| ServerError::Sync(e.into()))?;
        Ok(HealthResponse {
            status: "ok".into(),
            origin: self.context.config.origin,
            current_rev,
        })
    }
}

fn page_by_rev(mut entities: Vec<Entity>, limit: usize) -> (Vec<Entity>, bool) {
    if entities.len() <= limit {
        return (entities, false);
    }
    let boundary = entities[limit - 1].rev;
    let cut = entities[limit..]
        .iter()
        .position(|e| e.rev != boundary)
        .map_or(entities.len(), |extra| limit + extra);
    let has_more = cut < entities.len();
    entities.truncate(cut);
    (entities, has_more)
}
