// Project resource API routes (keys, inventory, environment, templates,
// repositories, tasks)
// Decision: One set of generic handlers per resource kind; item routes sit
// behind resource_guard::<K>, so handlers only ever see in-project rows
// Decision: Resource bodies are opaque JSON objects

use axum::{
    extract::State,
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use conductor_storage::{CreateResourceRow, ResourceRow, UpdateResource};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::common::{required_name, ListResponse};
use super::events;
use crate::access::{resource_guard, ProjectResource, ProjectScope, Scoped};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Resource {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    /// Kind-specific settings
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ResourceRow> for Resource {
    fn from(row: ResourceRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            name: row.name,
            data: row.data,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateResourceRequest {
    pub name: String,
    #[serde(default = "empty_object")]
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateResourceRequest {
    pub name: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub data: Option<serde_json::Value>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn require_object(data: &serde_json::Value) -> Result<(), ApiError> {
    if !data.is_object() {
        return Err(ApiError::BadRequest("data must be a JSON object".to_string()));
    }
    Ok(())
}

/// Collection and item routes for resource kind `K`
/// (nested under /api/project/:project_id)
pub fn routes<K: ProjectResource>(state: AppState) -> Router<AppState> {
    let item = Router::new()
        .route(
            &format!("/{}/:{}", K::COLLECTION, K::PATH_PARAM),
            get(get_resource::<K>)
                .put(update_resource::<K>)
                .delete(delete_resource::<K>),
        )
        .route_layer(from_fn_with_state(state, resource_guard::<K>));

    Router::new()
        .route(
            &format!("/{}", K::COLLECTION),
            get(list_resources::<K>).post(create_resource::<K>),
        )
        .merge(item)
}

pub async fn list_resources<K: ProjectResource>(
    State(state): State<AppState>,
    scope: ProjectScope,
) -> Result<Json<ListResponse<Resource>>, ApiError> {
    let rows = state.store.list_resources(K::KIND, scope.project.id).await?;
    Ok(Json(ListResponse::new(
        rows.into_iter().map(Resource::from).collect(),
    )))
}

pub async fn create_resource<K: ProjectResource>(
    State(state): State<AppState>,
    user: AuthUser,
    scope: ProjectScope,
    Json(req): Json<CreateResourceRequest>,
) -> Result<(StatusCode, Json<Resource>), ApiError> {
    let name = required_name("name", &req.name)?;
    require_object(&req.data)?;

    let row = state
        .store
        .create_resource(
            K::KIND,
            CreateResourceRow {
                project_id: scope.project.id,
                name,
                data: req.data,
            },
        )
        .await?;

    let kind = K::KIND;
    tracing::debug!(
        resource_kind = %kind,
        resource_id = row.id,
        project_id = scope.project.id,
        "Resource created"
    );
    events::record(
        &state,
        scope.project.id,
        user.id,
        kind.table(),
        Some(row.id),
        format!("{} {} created", kind.label(), row.name),
    )
    .await;
    Ok((StatusCode::CREATED, Json(row.into())))
}

pub async fn get_resource<K: ProjectResource>(resource: Scoped<K>) -> Json<Resource> {
    Json(resource.row.into())
}

pub async fn update_resource<K: ProjectResource>(
    State(state): State<AppState>,
    user: AuthUser,
    scope: ProjectScope,
    resource: Scoped<K>,
    Json(req): Json<UpdateResourceRequest>,
) -> Result<Json<Resource>, ApiError> {
    let name = req
        .name
        .as_deref()
        .map(|v| required_name("name", v))
        .transpose()?;
    if let Some(data) = &req.data {
        require_object(data)?;
    }

    let row = state
        .store
        .update_resource(
            K::KIND,
            resource.row.id,
            scope.project.id,
            UpdateResource {
                name,
                data: req.data,
            },
        )
        .await?
        .ok_or_else(|| ApiError::not_found(K::KIND.label()))?;

    events::record(
        &state,
        scope.project.id,
        user.id,
        K::KIND.table(),
        Some(row.id),
        format!("{} {} updated", K::KIND.label(), row.name),
    )
    .await;
    Ok(Json(row.into()))
}

pub async fn delete_resource<K: ProjectResource>(
    State(state): State<AppState>,
    user: AuthUser,
    scope: ProjectScope,
    resource: Scoped<K>,
) -> Result<StatusCode, ApiError> {
    let deleted = state
        .store
        .delete_resource(K::KIND, resource.row.id, scope.project.id)
        .await?;
    if !deleted {
        return Err(ApiError::not_found(K::KIND.label()));
    }

    events::record(
        &state,
        scope.project.id,
        user.id,
        K::KIND.table(),
        Some(resource.row.id),
        format!("{} {} deleted", K::KIND.label(), resource.row.name),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}
