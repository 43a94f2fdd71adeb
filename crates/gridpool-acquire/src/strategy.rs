//! Acquisition strategies and their orchestration.
//!
//! Per request the state machine is SEARCHING → LOCKING → RECONCILING →
//! VERIFYING → DONE, with a give-up terminal the orchestrator catches to
//! try the next strategy: reuse a running grid, wake a stopped one,
//! generate a fresh one. Only a strategy's own give-up signal triggers
//! the fallback — hard failures and invariant violations propagate.

use tracing::info;

use gridpool_compute::{Image, Instance, InstanceStatus};

use crate::context::{AcquireCtx, GridRequest, LockAttempt};
use crate::error::{AcquireError, AcquireResult, GiveUpReason, InvariantViolation};

/// Outcome of one strategy: a ready, exclusively-owned grid, or a
/// declared give-up the orchestrator may catch.
#[derive(Debug)]
pub enum Acquisition {
    Acquired(Instance),
    GiveUp(GiveUpReason),
}

/// Reuse an already-running, unlocked grid.
///
/// Bounded retry loop over search → in-process reservation → remote
/// lock. The reservation only stops two workers in this process from
/// racing the same search hit; the remote lock label decides ownership.
pub async fn reuse_running(ctx: &AcquireCtx, req: &GridRequest) -> AcquireResult<Acquisition> {
    let attempts = ctx.settings.reuse_attempts;
    for attempt in 1..=attempts {
        let Some(mut candidate) = ctx
            .searcher
            .search_free_instance(&req.profile, &req.zone, InstanceStatus::Running)
            .await
            .map_err(|e| ctx.annotate(e))?
        else {
            return Ok(Acquisition::GiveUp(GiveUpReason::NoRunningGrid));
        };

        if !ctx.reservations.claim(candidate.id, ctx.correlation()) {
            info!(
                correlation = %ctx.correlation(),
                grid = %candidate.name,
                attempt,
                "candidate reserved by another worker; retrying search"
            );
            continue;
        }

        let lock = ctx.try_lock(&mut candidate).await;
        ctx.reservations
            .release_if_held(candidate.id, ctx.correlation());

        match lock? {
            LockAttempt::Contended => {
                info!(
                    correlation = %ctx.correlation(),
                    grid = %candidate.name,
                    attempt,
                    "lost the lock race; retrying search"
                );
                continue;
            }
            LockAttempt::Locked => {
                let verified = ctx.fetch_required(&candidate.zone, &candidate.name).await?;
                if verified.lock_holder() == ctx.correlation().as_str()
                    && !verified.is_deleting()
                    && verified.status == InstanceStatus::Running
                {
                    info!(
                        correlation = %ctx.correlation(),
                        grid = %verified.name,
                        attempt,
                        "reusing running grid"
                    );
                    return Ok(Acquisition::Acquired(verified));
                }
                info!(
                    correlation = %ctx.correlation(),
                    grid = %verified.name,
                    holder = %verified.lock_holder(),
                    deleting = verified.is_deleting(),
                    status = ?verified.status,
                    "locked grid no longer usable; retrying search"
                );
            }
        }
    }
    Ok(Acquisition::GiveUp(GiveUpReason::ContentionExhausted {
        attempts,
    }))
}

/// Wake a stopped grid: lock first, reconcile and start, then verify
/// ownership survived the asynchronous start window.
pub async fn start_stopped(ctx: &AcquireCtx, req: &GridRequest) -> AcquireResult<Acquisition> {
    let Some(mut candidate) = ctx
        .searcher
        .search_free_instance(&req.profile, &req.zone, InstanceStatus::Terminated)
        .await
        .map_err(|e| ctx.annotate(e))?
    else {
        return Ok(Acquisition::GiveUp(GiveUpReason::NoStoppedGrid));
    };

    // Lock before anything else to shrink the window in which another
    // caller can grab the same instance.
    match ctx.try_lock(&mut candidate).await? {
        LockAttempt::Contended => {
            return Ok(Acquisition::GiveUp(GiveUpReason::LockContended(
                candidate.name,
            )));
        }
        LockAttempt::Locked => {}
    }

    ctx.starter.start(&mut candidate, &req.desired).await?;

    // The start ran for a while; make sure nothing raced us meanwhile.
    let verified = ctx.fetch_required(&candidate.zone, &candidate.name).await?;
    if verified.lock_holder() != ctx.correlation().as_str() {
        return Err(InvariantViolation::OccupiedByOther {
            grid: verified.name.clone(),
            holder: verified.lock_holder().to_string(),
        }
        .into());
    }
    if verified.is_deleting() {
        return Err(InvariantViolation::BeingDeleted {
            grid: verified.name.clone(),
        }
        .into());
    }
    if verified.status != InstanceStatus::Running {
        return Err(InvariantViolation::NotRunningAfterStart {
            grid: verified.name.clone(),
            status: verified.status,
        }
        .into());
    }

    info!(
        correlation = %ctx.correlation(),
        grid = %verified.name,
        "started stopped grid"
    );
    Ok(Acquisition::Acquired(verified))
}

/// Generate a fresh grid from a source image. Has no give-up outcome:
/// a missing image is a configuration problem and generation failures
/// are hard errors.
pub async fn generate_new(ctx: &AcquireCtx, req: &GridRequest) -> AcquireResult<Instance> {
    let image = resolve_image(ctx, req).await?;
    let generated = ctx
        .generator
        .create(&req.desired, &image, &req.zone)
        .await?;

    let mut created = ctx
        .fetch_required(&generated.zone, &generated.name)
        .await?;

    // Freshly created grids are owned by construction; the lock label is
    // applied as a follow-up so release and verification treat every
    // acquisition path the same way.
    match ctx.try_lock(&mut created).await? {
        LockAttempt::Locked => {}
        LockAttempt::Contended => {
            return Err(InvariantViolation::OccupiedByOther {
                grid: created.name.clone(),
                holder: "unknown".to_string(),
            }
            .into());
        }
    }

    ctx.fetch_required(&generated.zone, &generated.name).await
}

async fn resolve_image(ctx: &AcquireCtx, req: &GridRequest) -> AcquireResult<Image> {
    if let Some(family) = &req.source_image_family {
        return ctx
            .backend
            .get_image_from_family(family)
            .await
            .map_err(|e| ctx.annotate(e))?
            .ok_or_else(|| AcquireError::ImageNotFound(format!("family {family}")));
    }
    ctx.searcher
        .search_image(&req.profile)
        .await
        .map_err(|e| ctx.annotate(e))?
        .ok_or_else(|| {
            AcquireError::ImageNotFound(format!(
                "profile os={} browser={} shots={}",
                req.profile.os, req.profile.browser, req.profile.shots
            ))
        })
}

/// Top-level orchestration: reuse-running, then start-stopped, then
/// generate-new. Falls through on declared give-ups only.
pub async fn acquire_grid(ctx: &AcquireCtx, req: &GridRequest) -> AcquireResult<Instance> {
    if !req.no_rush {
        match reuse_running(ctx, req).await? {
            Acquisition::Acquired(grid) => return Ok(grid),
            Acquisition::GiveUp(reason) => {
                info!(
                    correlation = %ctx.correlation(),
                    %reason,
                    "reuse-running gave up; trying start-stopped"
                );
            }
        }
        match start_stopped(ctx, req).await? {
            Acquisition::Acquired(grid) => return Ok(grid),
            Acquisition::GiveUp(reason) => {
                info!(
                    correlation = %ctx.correlation(),
                    %reason,
                    "start-stopped gave up; generating a new grid"
                );
            }
        }
    } else {
        info!(
            correlation = %ctx.correlation(),
            "no-rush request; skipping reuse searches"
        );
    }
    generate_new(ctx, req).await
}

// Coverage for the strategies lives in tests/acquire_flow.rs, where the
// full context is assembled against the mock backend.
