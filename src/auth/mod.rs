//! Sign-in completion and session guarding
//!
//! Handles:
//! - Grant parsing and redirect policy
//! - Client session exchange, guard and signout
//! - Server callback, signout and route guard
//! - Session cookies

mod callback;
pub mod cancel;
pub mod client;
pub mod cookie;
pub mod grant;
pub mod guard;
mod middleware;
pub mod pkce;
pub mod provider;
pub mod redirect;
mod routes;
pub mod session;
mod signout;

pub use cancel::CancelToken;
pub use cookie::SessionCookies;
pub use grant::{AuthCompletionRequest, GrantSubtype};
pub use guard::GuardDecision;
pub use middleware::{CurrentSession, require_session};
pub use provider::{GoTrueHandle, ProviderError, ProviderHandle, SessionProvider};
pub use redirect::{RedirectDecision, RedirectTarget};
pub use routes::auth_router;
pub use session::Session;
