//! Authentication and session issuance.
//!
//! ## Flows
//!
//! Signup, login and password reset are two-step: the first call checks the
//! identity (and password, for login) and sends a one-time code, the second
//! call checks the code. Signup and login confirmations issue a session.
//!
//! ## Sessions
//!
//! The `pollagent` cookie carries `token.signature`. The server keeps the
//! SHA-256 hash of the token together with the identity claim
//! `{email?, phone?}` the agent confirmed with. Every protected route resolves
//! that claim back to a directory record through one of three [`Strategy`]
//! values before the handler runs.
//!
//! Password resets revoke every session of the agent.

mod error;
mod flows;
pub mod password;
pub mod session;
mod state;
mod strategy;
pub mod types;

pub use error::{AuthError, ErrorBody};
pub use flows::IssuedSession;
pub use session::{Sessions, SESSION_COOKIE_NAME};
pub use state::{AuthConfig, AuthState, DEFAULT_SESSION_TTL_SECONDS, MIN_COOKIE_SECRET_BYTES};
pub use strategy::{Principal, Strategy};
