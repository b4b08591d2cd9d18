// OpenAPI specification generation
//
// This module defines the OpenAPI spec for the Conductor API.
// It is used by both the API server (for Swagger UI) and the export-openapi
// binary (for static spec generation).
//
// The generic resource handlers (keys, inventory, environment, templates,
// repositories, tasks) share the Resource schemas listed below.

use crate::api;
use crate::api::ListResponse;
use crate::auth::routes as auth_routes;
use utoipa::OpenApi;

/// OpenAPI documentation for the Conductor API
#[derive(OpenApi)]
#[openapi(
    paths(
        auth_routes::login,
        auth_routes::logout,
        auth_routes::get_current_user,
        auth_routes::list_api_tokens,
        auth_routes::create_api_token,
        auth_routes::expire_api_token,
        api::users::list_users,
        api::users::create_user,
        api::users::update_user,
        api::users::update_password,
        api::projects::list_projects,
        api::projects::create_project,
        api::projects::get_project,
        api::members::list_members,
        api::members::add_member,
        api::members::make_admin,
        api::members::revoke_admin,
        api::members::remove_member,
        api::tasks::get_task_output,
        api::tasks::append_task_output,
        api::events::list_events,
        api::events::list_project_events,
    ),
    components(
        schemas(
            api::ErrorResponse,
            auth_routes::LoginRequest,
            auth_routes::ApiToken,
            auth_routes::CreatedApiToken,
            auth_routes::CreateApiTokenRequest,
            ListResponse<auth_routes::ApiToken>,
            api::users::User,
            api::users::CreateUserRequest,
            api::users::UpdateUserRequest,
            api::users::UpdatePasswordRequest,
            ListResponse<api::users::User>,
            api::projects::Project,
            api::projects::ProjectView,
            api::projects::CreateProjectRequest,
            ListResponse<api::projects::Project>,
            api::members::ProjectUser,
            api::members::AddMemberRequest,
            ListResponse<api::members::ProjectUser>,
            api::resources::Resource,
            api::resources::CreateResourceRequest,
            api::resources::UpdateResourceRequest,
            ListResponse<api::resources::Resource>,
            api::tasks::TaskOutput,
            api::tasks::AppendOutputRequest,
            ListResponse<api::tasks::TaskOutput>,
            api::events::Event,
            ListResponse<api::events::Event>,
        )
    ),
    tags(
        (name = "auth", description = "Login, logout and API tokens"),
        (name = "users", description = "User management endpoints"),
        (name = "projects", description = "Project endpoints"),
        (name = "members", description = "Project membership endpoints"),
        (name = "tasks", description = "Task output endpoints"),
        (name = "events", description = "Project event log")
    ),
    info(
        title = "Conductor API",
        version = "0.1.0",
        description = "API for managing automation projects, their members and resources",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI spec as a pretty-printed JSON string
    pub fn to_json() -> Result<String, serde_json::Error> {
        Self::openapi().to_pretty_json()
    }
}
