//! Maps validated CLI matches to the action the binary runs.

use crate::cli::actions::{server::Args, Action, StoreBackend};
use crate::cli::commands::{auth, notify};
use crate::hierarchy::ElectoralHierarchy;
use anyhow::{Context, Result};
use std::path::PathBuf;

/// # Errors
/// Returns an error if required arguments are missing or malformed.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);

    let store = if matches.get_flag("memory-store") {
        StoreBackend::Memory
    } else {
        let dsn = matches
            .get_one::<String>("dsn")
            .cloned()
            .context("missing required argument: --dsn")?;
        StoreBackend::Postgres { dsn }
    };

    let electoral_levels = matches
        .get_one::<String>("electoral-levels")
        .map(|raw| ElectoralHierarchy::parse_list(raw))
        .transpose()
        .context("invalid --electoral-levels")?
        .map(|hierarchy| hierarchy.levels().to_vec())
        .unwrap_or_default();

    let electoral_areas = matches.get_one::<PathBuf>("electoral-areas").cloned();

    let auth_opts = auth::Options::parse(matches)?;
    let notify_opts = notify::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        store,
        electoral_levels,
        electoral_areas,
        cookie_secret: auth_opts.cookie_secret,
        cookie_secure: auth_opts.cookie_secure,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        otp_verify_window_seconds: auth_opts.otp_verify_window_seconds,
        otp_single_use: auth_opts.otp_single_use,
        notify_webhook_url: notify_opts.webhook_url,
        notify_sender: notify_opts.sender,
    }))
}
