use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use directories::ProjectDirs;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    auth::require_session,
    broadcast::system_events,
    handlers::{
        approve, audit_events, complaint_stats, create_complaint, delete_complaint,
        edit_complaint, get_complaint, health, list_complaints, list_users, login, me, register,
        system_status, toggle_system, transition_complaint, update_profile,
    },
    mailer::{LogMailer, Mailer, RelayMailer},
    store::{crypto, Store},
    tokens::{TokenService, DEFAULT_APPROVAL_TTL, DEFAULT_SESSION_TTL},
    AppState,
};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    /// Session signing secret ($PLAINT_SESSION_SECRET).
    pub session_secret: Option<String>,
    /// File holding the session signing secret ($PLAINT_SESSION_SECRET_FILE).
    pub session_secret_file: Option<PathBuf>,
    pub session_ttl: Duration,
    pub approval_ttl: Duration,
    /// Receives approval requests; auto-approved on register and login.
    pub super_admin_email: Option<String>,
    /// Externally reachable base URL used in approval links.
    pub public_url: Option<String>,
    pub mail_relay_url: Option<String>,
    pub mail_relay_secret: Option<String>,
    pub mail_from: String,
    pub cors_origins: Option<String>,
    pub audit_retention_days: u64,
    pub sweep_interval: Duration,
}

fn env_duration(name: &str, default: Duration) -> Duration {
    match std::env::var(name) {
        Ok(v) => humantime::parse_duration(v.trim()).unwrap_or_else(|e| {
            warn!(var = name, value = %v, error = %e, "invalid duration; using default");
            default
        }),
        Err(_) => default,
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("PLAINT_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("PLAINT_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5000),
            data_dir: std::env::var("PLAINT_DATA_DIR").ok().map(PathBuf::from),
            session_secret: std::env::var("PLAINT_SESSION_SECRET").ok(),
            session_secret_file: std::env::var("PLAINT_SESSION_SECRET_FILE")
                .ok()
                .map(PathBuf::from),
            session_ttl: env_duration("PLAINT_SESSION_TTL", DEFAULT_SESSION_TTL),
            approval_ttl: env_duration("PLAINT_APPROVAL_TTL", DEFAULT_APPROVAL_TTL),
            super_admin_email: std::env::var("PLAINT_SUPER_ADMIN_EMAIL").ok(),
            public_url: std::env::var("PLAINT_PUBLIC_URL").ok(),
            mail_relay_url: std::env::var("PLAINT_MAIL_RELAY_URL").ok(),
            mail_relay_secret: std::env::var("PLAINT_MAIL_RELAY_SECRET").ok(),
            mail_from: std::env::var("PLAINT_MAIL_FROM")
                .unwrap_or_else(|_| "Plaint <noreply@localhost>".into()),
            cors_origins: std::env::var("PLAINT_CORS_ORIGINS").ok(),
            audit_retention_days: std::env::var("PLAINT_AUDIT_RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

/// Read a secret from a file, trimming surrounding whitespace.
/// Fails if the file cannot be read or is empty after trimming.
pub fn read_key_file(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read key file: {}", path.display()))?;
    let key = content.trim().to_string();
    if key.is_empty() {
        anyhow::bail!("key file is empty: {}", path.display());
    }
    Ok(key)
}

/// Resolve and create the data directory.
///
/// Priority: the explicit path, then `PLAINT_DATA_DIR`, then the platform
/// data dir (`~/.local/share/plaint/`, etc.).
pub fn resolve_data_dir(data_dir: Option<&PathBuf>) -> Result<PathBuf> {
    let path = match data_dir {
        Some(d) => d.clone(),
        None => match std::env::var("PLAINT_DATA_DIR") {
            Ok(d) => PathBuf::from(d),
            Err(_) => ProjectDirs::from("", "", "plaint")
                .context("could not determine platform data directory")?
                .data_dir()
                .to_owned(),
        },
    };
    std::fs::create_dir_all(&path)
        .with_context(|| format!("create data dir: {}", path.display()))?;
    Ok(path)
}

/// Session signing key: secret file, then env secret, then a key generated
/// once and persisted as `plaint.key` in the data directory.
fn resolve_session_key(cfg: &ServerConfig, data_dir: &Path) -> Result<crypto::SigningKey> {
    if let Some(ref path) = cfg.session_secret_file {
        if cfg.session_secret.is_some() {
            warn!("both PLAINT_SESSION_SECRET and PLAINT_SESSION_SECRET_FILE are set; using file");
        }
        let secret = read_key_file(path)?;
        return crypto::SigningKey::from_bytes(secret.as_bytes())
            .context("session secret file is empty");
    }
    if let Some(ref secret) = cfg.session_secret {
        return crypto::SigningKey::from_bytes(secret.as_bytes())
            .context("PLAINT_SESSION_SECRET is empty");
    }
    load_or_create_key(data_dir)
}

fn load_or_create_key(data_dir: &Path) -> Result<crypto::SigningKey> {
    let key_path = data_dir.join("plaint.key");
    if key_path.exists() {
        let bytes = std::fs::read(&key_path).context("read plaint.key")?;
        crypto::SigningKey::from_bytes(&bytes).context("plaint.key is empty")
    } else {
        let key = crypto::generate_signing_key();
        std::fs::write(&key_path, key.as_bytes()).context("write plaint.key")?;
        info!("generated new session signing key");
        Ok(key)
    }
}

fn build_mailer(cfg: &ServerConfig) -> Result<Arc<dyn Mailer>> {
    match cfg.mail_relay_url {
        Some(ref url) => {
            info!(relay = %url, "delivering mail through HTTP relay");
            let mailer = RelayMailer::new(
                url.clone(),
                cfg.mail_from.clone(),
                cfg.mail_relay_secret.clone(),
            )?;
            Ok(Arc::new(mailer))
        }
        None => {
            warn!("PLAINT_MAIL_RELAY_URL not set; approval links will be written to the log");
            Ok(Arc::new(LogMailer))
        }
    }
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
    info!(data_dir = %data_dir.display(), "using data directory");

    let key = resolve_session_key(&cfg, &data_dir)?;
    let tokens = TokenService::new(&key, cfg.session_ttl, cfg.approval_ttl);

    let store = Store::open(&data_dir.join("plaint.db")).context("open store")?;
    store.clone().spawn_approval_sweep(cfg.sweep_interval);
    let retention_secs = (cfg.audit_retention_days * 86400) as i64;
    store
        .clone()
        .spawn_audit_sweep(cfg.sweep_interval, retention_secs);

    if cfg.super_admin_email.is_none() {
        warn!("PLAINT_SUPER_ADMIN_EMAIL not set; administrator approvals go to the fallback address");
    }

    let mailer = build_mailer(&cfg)?;
    let state = AppState::new(
        store,
        tokens,
        mailer,
        cfg.super_admin_email.clone(),
        cfg.public_url.clone(),
    );
    let app = build_router(state, cfg.cors_origins.as_deref());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "plaint server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")
}

pub fn build_router(state: AppState, cors_origins: Option<&str>) -> Router {
    // Public routes (no session required).
    let public = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/approve/{token}", get(approve))
        .route("/system/status", get(system_status))
        .route("/system/events", get(system_events));

    // Protected routes (bearer session token required).
    let protected = Router::new()
        .route("/auth/me", get(me))
        .route("/auth/update-profile", put(update_profile))
        .route("/auth/users", get(list_users))
        .route("/complaints", get(list_complaints).post(create_complaint))
        .route("/complaints/stats", get(complaint_stats))
        .route(
            "/complaints/{id}",
            get(get_complaint)
                .put(transition_complaint)
                .delete(delete_complaint),
        )
        .route("/complaints/{id}/update", put(edit_complaint))
        .route("/system/toggle", put(toggle_system))
        .route("/audit", get(audit_events))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
        .layer(build_cors(cors_origins))
        .layer(TraceLayer::new_for_http())
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PUT,
            http::Method::DELETE,
            http::Method::OPTIONS,
        ])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}
