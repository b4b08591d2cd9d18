// Authentication: who is making the request
//
// - session: sealed session cookie codec
// - api_token: bearer token generation and format checks
// - identity: cookie/token resolution to a user id
// - middleware: authentication guard and AuthUser extractor
// - routes: login, logout, current user and token management

pub mod api_token;
pub mod identity;
pub mod middleware;
pub mod routes;
pub mod session;

pub use identity::{AuthMethod, Identity, IdentityResolver};
pub use middleware::{authenticate, AuthUser};
pub use session::{SessionClaims, SessionCodec, SessionError, SESSION_COOKIE};
