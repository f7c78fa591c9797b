use crate::{auth::DEFAULT_SESSION_TTL_SECONDS, otp::DEFAULT_VERIFY_WINDOW_SECONDS};
use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Options {
    pub cookie_secret: SecretString,
    pub cookie_secure: bool,
    pub session_ttl_seconds: i64,
    pub otp_verify_window_seconds: i64,
    pub otp_single_use: bool,
}

impl Options {
    /// # Errors
    /// Returns an error if the cookie secret is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let cookie_secret = matches
            .get_one::<String>("cookie-secret")
            .cloned()
            .map(SecretString::from)
            .context("missing required argument: --cookie-secret")?;
        Ok(Self {
            cookie_secret,
            cookie_secure: matches.get_flag("cookie-secure"),
            session_ttl_seconds: matches
                .get_one::<i64>("session-ttl-seconds")
                .copied()
                .unwrap_or(DEFAULT_SESSION_TTL_SECONDS),
            otp_verify_window_seconds: matches
                .get_one::<i64>("otp-verify-window-seconds")
                .copied()
                .unwrap_or(DEFAULT_VERIFY_WINDOW_SECONDS),
            otp_single_use: matches.get_flag("otp-single-use"),
        })
    }
}

pub fn with_args(command: Command) -> Command {
    let command = with_cookie_args(command);
    with_otp_args(command)
}

fn with_cookie_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("cookie-secret")
                .long("cookie-secret")
                .help("Key used to sign session cookies (at least 32 bytes)")
                .env("POLLGATE_COOKIE_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("cookie-secure")
                .long("cookie-secure")
                .help("Mark session cookies Secure (HTTPS only)")
                .env("POLLGATE_COOKIE_SECURE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("session-ttl-seconds")
                .long("session-ttl-seconds")
                .help("Session lifetime in seconds")
                .env("POLLGATE_SESSION_TTL_SECONDS")
                .default_value("15811200")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
}

fn with_otp_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("otp-verify-window-seconds")
                .long("otp-verify-window-seconds")
                .help("How long an issued code is accepted")
                .env("POLLGATE_OTP_VERIFY_WINDOW_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new("otp-single-use")
                .long("otp-single-use")
                .help("Consume a code once it has been accepted")
                .env("POLLGATE_OTP_SINGLE_USE")
                .action(ArgAction::SetTrue),
        )
}
