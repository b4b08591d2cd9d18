// Project-scoped authorization guards
// Decision: Each guard is axum middleware that either rejects the request or
// inserts one typed value into request extensions
// Decision: Ids that do not parse are reported as not found, never as 500
//
// Order for a project route:
//   authenticate -> project_membership -> require_project_admin
//   -> project_user_guard -> resource_guard::<K> -> handler

pub mod member;
pub mod membership;
pub mod resource;

pub use member::{project_user_guard, user_target_guard, ProjectMember, TargetUser};
pub use membership::{project_membership, require_project_admin, ProjectScope};
pub use resource::{
    resource_guard, Environments, Inventories, Keys, ProjectResource, Repositories, Scoped,
    Tasks, Templates,
};

use axum::extract::Path;
use std::collections::HashMap;

/// Route parameters as seen by a guard. `None` when the route has none.
pub(crate) type PathParams = Option<Path<HashMap<String, String>>>;

/// Numeric id from a named route parameter
pub(crate) fn path_id(params: &PathParams, name: &str) -> Option<i64> {
    params.as_ref()?.get(name)?.parse().ok()
}

/// Read a value a guard attached to the request, failing closed
pub(crate) fn scope_value<T>(
    extensions: &axum::http::Extensions,
    rejection: impl FnOnce() -> crate::error::ApiError,
) -> Result<T, crate::error::ApiError>
where
    T: Clone + Send + Sync + 'static,
{
    extensions.get::<T>().cloned().ok_or_else(rejection)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> PathParams {
        Some(Path(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ))
    }

    #[test]
    fn test_path_id() {
        assert_eq!(path_id(&params(&[("project_id", "7")]), "project_id"), Some(7));
        assert_eq!(path_id(&params(&[("project_id", "7x")]), "project_id"), None);
        assert_eq!(path_id(&params(&[("project_id", "")]), "project_id"), None);
        assert_eq!(path_id(&params(&[("key_id", "3")]), "project_id"), None);
        assert_eq!(path_id(&None, "project_id"), None);
        assert_eq!(
            path_id(&params(&[("project_id", "99999999999999999999")]), "project_id"),
            None
        );
    }
}
