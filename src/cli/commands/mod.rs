pub mod auth;
pub mod logging;
pub mod notify;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ArgAction, ColorChoice, Command,
};
use std::path::PathBuf;

pub const DEFAULT_ELECTORAL_LEVELS: &str = "country,region,constituency,pollingStation";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("pollgate")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("POLLGATE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("dsn")
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .env("POLLGATE_DSN")
                .required_unless_present("memory-store"),
        )
        .arg(
            Arg::new("memory-store")
                .long("memory-store")
                .help("Keep all state in process memory (development only)")
                .env("POLLGATE_MEMORY_STORE")
                .action(ArgAction::SetTrue)
                .conflicts_with("dsn"),
        )
        .arg(
            Arg::new("electoral-levels")
                .long("electoral-levels")
                .help("Comma separated electoral levels, top first")
                .long_help(
                    "Comma separated electoral levels, top first. Seeds the store when it holds no levels yet.",
                )
                .env("POLLGATE_ELECTORAL_LEVELS")
                .default_value(DEFAULT_ELECTORAL_LEVELS),
        )
        .arg(
            Arg::new("electoral-areas")
                .long("electoral-areas")
                .help("JSON file of electoral areas to load at startup")
                .long_help(
                    "JSON array of {id, name, level, parent_id} objects. Each area is inserted or updated in the store at startup.",
                )
                .env("POLLGATE_ELECTORAL_AREAS")
                .value_parser(clap::value_parser!(PathBuf)),
        );

    let command = auth::with_args(command);
    let command = notify::with_args(command);
    logging::with_args(command)
}
