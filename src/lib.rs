//! # Pollgate (Poll Agent Authentication)
//!
//! `pollgate` onboards and authenticates field agents organized in a strict
//! electoral hierarchy (for example `country -> region -> constituency ->
//! pollingStation`).
//!
//! ## Identity
//!
//! Agents are pre-approved by an administrative process and identified by
//! email or phone. Signup, login and password reset are all two-factor: a
//! password plus a short one-time code with a bounded acceptance window.
//!
//! - **Top tier:** the two highest levels sign up with email and receive their
//!   codes directly.
//! - **Subordinates:** agents with a supervisor receive 4-digit codes; phone-only
//!   agents have theirs relayed through the supervisor's inbox.
//!
//! ## Authorization
//!
//! Sessions are server-side. The `pollagent` cookie carries an opaque token plus
//! an HMAC signature; the stored session holds the identity claim used at login.
//! Each request resolves the claim back to an agent record and checks one of
//! three role strategies (any agent, supervisor, subagent) against the current
//! hierarchy snapshot.

pub mod api;
pub mod auth;
pub mod cli;
pub mod clock;
pub mod hierarchy;
pub mod notify;
pub mod otp;
pub mod store;
pub mod supervisor;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
