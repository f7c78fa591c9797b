use crate::{
    api,
    auth::{AuthConfig, AuthState},
    cli::telemetry,
    hierarchy::{ElectoralHierarchy, HierarchyCache},
    notify::{LogNotifier, Notifier, WebhookNotifier},
    otp::OtpPolicy,
    store::{memory::MemoryStore, postgres::PgStore, ElectoralArea, LevelSource, Store},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{fmt, path::PathBuf, sync::Arc};
use tracing::{info, warn};
use url::Url;

#[derive(Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres { dsn: String },
}

impl fmt::Debug for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("Memory"),
            Self::Postgres { dsn } => f
                .debug_struct("Postgres")
                .field("dsn", &redact_dsn(dsn))
                .finish(),
        }
    }
}

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub store: StoreBackend,
    pub electoral_levels: Vec<String>,
    pub electoral_areas: Option<PathBuf>,
    pub cookie_secret: SecretString,
    pub cookie_secure: bool,
    pub session_ttl_seconds: i64,
    pub otp_verify_window_seconds: i64,
    pub otp_single_use: bool,
    pub notify_webhook_url: Option<Url>,
    pub notify_sender: String,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the store, the configuration or the listener cannot be set up.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let config = AuthConfig::new(args.cookie_secret)?
        .with_cookie_secure(args.cookie_secure)
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_otp_policy(
            OtpPolicy::new()
                .with_verify_window_seconds(args.otp_verify_window_seconds)
                .with_single_use(args.otp_single_use),
        );

    let store = open_store(&args.store, &args.electoral_levels).await?;

    if let Some(path) = &args.electoral_areas {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Could not read {}", path.display()))?;
        let areas = parse_areas(&raw)
            .with_context(|| format!("invalid --electoral-areas file {}", path.display()))?;
        load_areas(store.as_ref(), areas, &args.electoral_levels).await?;
    }

    let hierarchy = Arc::new(HierarchyCache::new(ElectoralHierarchy::default()));
    hierarchy
        .reload(store.as_ref())
        .await
        .context("Could not load electoral levels")?;

    let notifier: Arc<dyn Notifier> = match args.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url, args.notify_sender)?),
        None => {
            warn!("No --notify-webhook-url set, verification codes are only logged");
            Arc::new(LogNotifier)
        }
    };

    let auth_state = Arc::new(AuthState::new(config, store, hierarchy, notifier));

    let result = api::new(args.port, auth_state).await;
    telemetry::shutdown_tracer();
    result
}

/// Open the configured store and seed the level list when it holds none.
async fn open_store(backend: &StoreBackend, levels: &[String]) -> Result<Arc<dyn Store>> {
    match backend {
        StoreBackend::Memory => {
            info!("Using in-memory store, state is lost on exit");
            Ok(Arc::new(MemoryStore::with_levels(levels.iter().cloned())))
        }
        StoreBackend::Postgres { dsn } => {
            let store = PgStore::connect(dsn).await?;
            store.migrate().await?;

            let stored = store.load_levels().await?;
            if stored.is_empty() && !levels.is_empty() {
                info!(?levels, "Seeding electoral levels");
                store.save_levels(levels).await?;
            }
            Ok(Arc::new(store))
        }
    }
}

fn parse_areas(raw: &str) -> Result<Vec<ElectoralArea>> {
    let areas: Vec<ElectoralArea> = serde_json::from_str(raw)?;
    for area in &areas {
        if area.id.trim().is_empty() || area.name.trim().is_empty() || area.level.trim().is_empty()
        {
            anyhow::bail!("electoral areas need an id, a name and a level");
        }
    }
    Ok(areas)
}

/// Upsert `areas` top level first so every parent exists before its children.
async fn load_areas(
    store: &dyn Store,
    mut areas: Vec<ElectoralArea>,
    levels: &[String],
) -> Result<()> {
    areas.sort_by_key(|area| {
        levels
            .iter()
            .position(|level| *level == area.level)
            .unwrap_or(levels.len())
    });
    for area in &areas {
        store
            .upsert_area(area)
            .await
            .with_context(|| format!("Could not store electoral area {}", area.id))?;
    }
    info!(count = areas.len(), "Electoral areas loaded");
    Ok(())
}

fn log_startup_args(args: &Args) {
    let store = match &args.store {
        StoreBackend::Memory => "memory".to_string(),
        StoreBackend::Postgres { dsn } => redact_dsn(dsn),
    };
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("store", store),
        ("electoral_levels", args.electoral_levels.join(",")),
        (
            "electoral_areas",
            args.electoral_areas
                .as_ref()
                .map_or_else(|| "none".to_string(), |path| path.display().to_string()),
        ),
        ("cookie_secure", args.cookie_secure.to_string()),
        ("session_ttl_seconds", args.session_ttl_seconds.to_string()),
        (
            "otp_verify_window_seconds",
            args.otp_verify_window_seconds.to_string(),
        ),
        ("otp_single_use", args.otp_single_use.to_string()),
        (
            "notify_webhook_url",
            args.notify_webhook_url
                .as_ref()
                .map_or_else(|| "none (log only)".to_string(), Url::to_string),
        ),
        ("notify_sender", args.notify_sender.clone()),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\n{title}:", banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn banner() -> String {
    format!(
        "P O L L G A T E - {} - {}",
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    )
}

fn short_commit(hash: &str) -> String {
    hash.trim().chars().take(7).collect()
}
