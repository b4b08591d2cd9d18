// HTTP API routes
//
// This module contains the route handlers for the public API. Each submodule
// exposes a `routes` function; `project_routes` assembles everything that lives
// under /api/project/:project_id behind the membership guard.

pub mod common;
pub mod events;
pub mod members;
pub mod projects;
pub mod resources;
pub mod tasks;
pub mod users;

// Re-export common types
pub use common::{ErrorResponse, ListResponse};

use axum::{middleware::from_fn_with_state, routing::get, Router};

use crate::access::{
    project_membership, Environments, Inventories, Keys, Repositories, Tasks, Templates,
};
use crate::state::AppState;

/// Routes nested under /api/project/:project_id. Every route requires
/// membership of the project.
pub fn project_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(projects::get_project))
        .merge(events::project_routes())
        .merge(members::routes(state.clone()))
        .merge(resources::routes::<Keys>(state.clone()))
        .merge(resources::routes::<Inventories>(state.clone()))
        .merge(resources::routes::<Environments>(state.clone()))
        .merge(resources::routes::<Templates>(state.clone()))
        .merge(resources::routes::<Repositories>(state.clone()))
        .merge(resources::routes::<Tasks>(state.clone()))
        .merge(tasks::routes(state.clone()))
        .layer(from_fn_with_state(state, project_membership))
}
