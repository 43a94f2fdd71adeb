//! gridpool-api — REST surface for grid acquisition and release.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/v1/zones/{zone}/grids` | Acquire a ready grid for a capability profile |
//! | DELETE | `/v1/zones/{zone}/grids/{name}` | Release or delete a grid |
//! | GET | `/healthz` | Liveness probe |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use gridpool_acquire::GridPool;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub pool: GridPool,
}

/// Build the complete API router.
pub fn build_router(pool: GridPool) -> Router {
    let state = ApiState { pool };
    Router::new()
        .route("/v1/zones/{zone}/grids", post(handlers::create_grid))
        .route(
            "/v1/zones/{zone}/grids/{name}",
            axum::routing::delete(handlers::delete_grid),
        )
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
}
