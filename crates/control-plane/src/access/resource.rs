// Resource guards for project sub-resources
// Decision: One generic guard; the marker type picks the lookup kind and the
// route parameter
// Decision: The lookup is always constrained by the in-scope project id, so a
// resource of another project is indistinguishable from a missing one

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use conductor_storage::{ResourceKind, ResourceRow};
use std::marker::PhantomData;

use super::{path_id, scope_value, PathParams, ProjectScope};
use crate::error::ApiError;
use crate::state::AppState;

/// A kind of resource owned by a project
pub trait ProjectResource: Send + Sync + 'static {
    const KIND: ResourceKind;
    /// Route parameter holding the resource id
    const PATH_PARAM: &'static str;
    /// Collection path segment under `/project/:project_id`
    const COLLECTION: &'static str;
}

pub struct Keys;
pub struct Inventories;
pub struct Environments;
pub struct Templates;
pub struct Repositories;
pub struct Tasks;

impl ProjectResource for Keys {
    const KIND: ResourceKind = ResourceKind::AccessKey;
    const PATH_PARAM: &'static str = "key_id";
    const COLLECTION: &'static str = "keys";
}

impl ProjectResource for Inventories {
    const KIND: ResourceKind = ResourceKind::Inventory;
    const PATH_PARAM: &'static str = "inventory_id";
    const COLLECTION: &'static str = "inventory";
}

impl ProjectResource for Environments {
    const KIND: ResourceKind = ResourceKind::Environment;
    const PATH_PARAM: &'static str = "environment_id";
    const COLLECTION: &'static str = "environment";
}

impl ProjectResource for Templates {
    const KIND: ResourceKind = ResourceKind::Template;
    const PATH_PARAM: &'static str = "template_id";
    const COLLECTION: &'static str = "templates";
}

impl ProjectResource for Repositories {
    const KIND: ResourceKind = ResourceKind::Repository;
    const PATH_PARAM: &'static str = "repository_id";
    const COLLECTION: &'static str = "repositories";
}

impl ProjectResource for Tasks {
    const KIND: ResourceKind = ResourceKind::Task;
    const PATH_PARAM: &'static str = "task_id";
    const COLLECTION: &'static str = "tasks";
}

/// A resource of kind `K` verified to belong to the in-scope project
pub struct Scoped<K> {
    pub row: ResourceRow,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Scoped<K> {
    fn new(row: ResourceRow) -> Self {
        Self {
            row,
            _kind: PhantomData,
        }
    }
}

impl<K> Clone for Scoped<K> {
    fn clone(&self) -> Self {
        Self::new(self.row.clone())
    }
}

impl<K> std::fmt::Debug for Scoped<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scoped").field("row", &self.row).finish()
    }
}

/// Require `K::PATH_PARAM` to name a resource of kind `K` in the in-scope
/// project; attach `Scoped<K>`
pub async fn resource_guard<K: ProjectResource>(
    State(state): State<AppState>,
    params: PathParams,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let scope: ProjectScope = scope_value(request.extensions(), ApiError::project_not_found)?;
    let kind = K::KIND;
    let not_found = || ApiError::not_found(kind.label());

    let Some(resource_id) = path_id(&params, K::PATH_PARAM) else {
        tracing::debug!(resource_kind = %kind, "Unparseable resource id");
        return Err(not_found());
    };

    let row = state
        .credentials
        .find_resource(kind, resource_id, scope.project.id)
        .await?;
    let Some(row) = row else {
        tracing::debug!(
            resource_kind = %kind,
            resource_id,
            project_id = scope.project.id,
            "Resource not found in project"
        );
        return Err(not_found());
    };

    request.extensions_mut().insert(Scoped::<K>::new(row));
    Ok(next.run(request).await)
}

#[axum::async_trait]
impl<S, K> FromRequestParts<S> for Scoped<K>
where
    S: Send + Sync,
    K: ProjectResource,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        scope_value(&parts.extensions, || ApiError::not_found(K::KIND.label()))
    }
}
