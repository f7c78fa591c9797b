use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use url::Url;

pub const DEFAULT_SENDER: &str = "no-reply@pollgate.dev";

#[derive(Debug)]
pub struct Options {
    pub webhook_url: Option<Url>,
    pub sender: String,
}

impl Options {
    /// # Errors
    /// Returns an error if the webhook URL does not parse.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let webhook_url = matches
            .get_one::<String>("notify-webhook-url")
            .map(|raw| Url::parse(raw))
            .transpose()
            .context("invalid --notify-webhook-url")?;
        let sender = matches
            .get_one::<String>("notify-sender")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SENDER.to_string());
        Ok(Self {
            webhook_url,
            sender,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("notify-webhook-url")
                .long("notify-webhook-url")
                .help("Relay that delivers verification codes; codes are only logged when unset")
                .env("POLLGATE_NOTIFY_WEBHOOK_URL"),
        )
        .arg(
            Arg::new("notify-sender")
                .long("notify-sender")
                .help("From address passed to the relay")
                .env("POLLGATE_NOTIFY_SENDER")
                .default_value(DEFAULT_SENDER),
        )
}
