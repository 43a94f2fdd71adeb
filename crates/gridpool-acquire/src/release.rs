//! Release/delete protocol.
//!
//! Deleting a grid races every concurrent searcher: between a search hit
//! and its lock write, the grid may vanish. The two-phase guard closes
//! that window — the deleting flag is written and confirmed before the
//! delete call goes out, so searchers (which exclude flagged grids)
//! stop finding it first. A plain release just clears the lock label and
//! keeps the grid for the next caller.

use tracing::info;

use gridpool_compute::types::keys;
use gridpool_compute::{Labels, Metadata};

use crate::context::AcquireCtx;
use crate::error::{AcquireError, AcquireResult};

/// One release/delete request from the API surface.
#[derive(Debug, Clone)]
pub struct ReleaseRequest {
    pub zone: String,
    pub name: String,
    /// Delete immediately, skipping any reuse consideration.
    pub no_rush: bool,
    /// The caller's workflow still requires running VMs in the pool.
    pub require_running_vm: bool,
    /// Session id to clear from the grid's metadata on release.
    pub session_id: Option<String>,
}

impl ReleaseRequest {
    /// Whether this request deletes the grid at all, or merely releases
    /// the caller's hold for the next build to reuse.
    fn wants_delete(&self) -> bool {
        self.no_rush || self.require_running_vm
    }
}

/// What the protocol did with the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The grid was deleted; the delete operation reported success.
    Deleted,
    /// The lock was cleared and the grid kept for reuse.
    Released,
}

/// Run the release/delete protocol against one grid.
pub async fn release_grid(ctx: &AcquireCtx, req: &ReleaseRequest) -> AcquireResult<ReleaseOutcome> {
    let mut instance = ctx.fetch_required(&req.zone, &req.name).await?;

    // Already flagged by an earlier pass: no searcher can find it any
    // more, delete directly.
    if instance.is_deleting() {
        info!(
            correlation = %ctx.correlation(),
            grid = %req.name,
            "grid already flagged for deletion; deleting directly"
        );
        return delete_now(ctx, req).await;
    }

    if req.wants_delete() {
        // Two-phase: flag first and wait for the write to land, so a
        // concurrent searcher cannot lock a grid that is about to
        // disappear.
        let flag = Labels::from([(keys::DELETING.to_string(), "true".to_string())]);
        let op = ctx.updater.update_labels(&mut instance, &flag).await?;
        let done = ctx.await_label_write(op).await?;
        if !done.succeeded() {
            return Err(AcquireError::DeleteFailed { operation: done });
        }
        return delete_now(ctx, req).await;
    }

    // Merely releasing the hold: clear the lock back to the unlocked
    // sentinel (no need to block) and drop the session id.
    let unlock = Labels::from([(
        keys::LOCKED_BY.to_string(),
        keys::UNLOCKED.to_string(),
    )]);
    ctx.updater.update_labels(&mut instance, &unlock).await?;
    if req.session_id.is_some() {
        let clear_session = Metadata::from([(
            keys::SESSION_ID.to_string(),
            keys::UNLOCKED.to_string(),
        )]);
        ctx.updater
            .update_metadata(&mut instance, &clear_session)
            .await?;
    }
    info!(
        correlation = %ctx.correlation(),
        grid = %req.name,
        "released grid for reuse"
    );
    Ok(ReleaseOutcome::Released)
}

async fn delete_now(ctx: &AcquireCtx, req: &ReleaseRequest) -> AcquireResult<ReleaseOutcome> {
    let op = ctx
        .driver
        .execute_once("delete_instance", || {
            ctx.backend.delete_instance(&req.zone, &req.name)
        })
        .await?;
    let done = ctx
        .driver
        .block_until_complete(op, ctx.settings.poll_interval, ctx.settings.delete_timeout)
        .await?;
    if !done.succeeded() {
        return Err(AcquireError::DeleteFailed { operation: done });
    }
    info!(
        correlation = %ctx.correlation(),
        grid = %req.name,
        zone = %req.zone,
        "grid deleted"
    );
    Ok(ReleaseOutcome::Deleted)
}
