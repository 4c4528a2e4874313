//! Journalisation du serveur : buffer circulaire des derniers événements,
//! diffusion SSE en direct, et niveau ajustable à chaud via l'API `log_setup`.

mod sselayer;

pub use sselayer::SseLayer;

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, RwLock},
};

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use chrono::{DateTime, Utc};
use pmoconfig::Config;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::Level;
use tracing_subscriber::{
    Registry, filter::LevelFilter, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

const LEVEL_NAMES: [&str; 5] = ["ERROR", "WARN", "INFO", "DEBUG", "TRACE"];

/// Une entrée du journal
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub message: String,
}

type ReloadHandle = reload::Handle<LevelFilter, Registry>;

/// État partagé du journal : buffer borné et canal de diffusion.
#[derive(Clone)]
pub struct LogState {
    buffer: Arc<Mutex<VecDeque<LogEntry>>>,
    capacity: usize,
    tx: broadcast::Sender<LogEntry>,
    max_level: Arc<RwLock<Level>>,
    reload_handle: Option<ReloadHandle>,
}

impl LogState {
    /// Crée un état sans filtre rechargeable (niveau appliqué aux seuls flux SSE).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            tx: broadcast::channel(1000).0,
            max_level: Arc::new(RwLock::new(Level::TRACE)),
            reload_handle: None,
        }
    }

    fn with_reload(mut self, handle: ReloadHandle, level: Level) -> Self {
        self.reload_handle = Some(handle);
        *self.max_level.write().unwrap_or_else(|e| e.into_inner()) = level;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_max_level(&self, level: Level) {
        *self.max_level.write().unwrap_or_else(|e| e.into_inner()) = level;

        if let Some(handle) = &self.reload_handle {
            if let Err(e) = handle.reload(LevelFilter::from_level(level)) {
                eprintln!("❌ Failed to reload log level filter: {}", e);
            }
        }
    }

    pub fn get_max_level(&self) -> Level {
        *self.max_level.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn push(&self, entry: LogEntry) {
        {
            let mut buf = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            while buf.len() >= self.capacity {
                buf.pop_front();
            }
            buf.push_back(entry.clone());
        }
        // personne n'écoute : sans importance
        let _ = self.tx.send(entry);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }

    pub fn dump(&self) -> Vec<LogEntry> {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

/// Query params pour /log-sse
#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub error: Option<bool>,
    #[serde(default)]
    pub warn: Option<bool>,
    #[serde(default)]
    pub info: Option<bool>,
    #[serde(default)]
    pub debug: Option<bool>,
    #[serde(default)]
    pub trace: Option<bool>,
    #[serde(default)]
    pub search: Option<String>,
}

impl LogQuery {
    fn level_flags(&self) -> [(Option<bool>, &'static str); 5] {
        [
            (self.error, "ERROR"),
            (self.warn, "WARN"),
            (self.info, "INFO"),
            (self.debug, "DEBUG"),
            (self.trace, "TRACE"),
        ]
    }
}

/// Handler SSE : l'historique filtré, puis les nouvelles entrées en direct.
pub async fn log_sse(
    State(state): State<LogState>,
    Query(params): Query<LogQuery>,
) -> impl IntoResponse {
    let mut rx = state.subscribe();
    let history = state.dump();

    let stream = async_stream::stream! {
        for entry in history {
            if accepts(&state, &entry, &params) {
                if let Ok(json) = serde_json::to_string(&entry) {
                    yield Ok::<_, axum::Error>(Event::default().data(json));
                }
            }
        }

        loop {
            match rx.recv().await {
                Ok(entry) => {
                    if !accepts(&state, &entry, &params) {
                        continue;
                    }
                    if let Ok(json) = serde_json::to_string(&entry) {
                        yield Ok::<_, axum::Error>(Event::default().data(json));
                    }
                }
                // client trop lent : on saute les entrées perdues
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Handler REST (dump JSON du buffer)
pub async fn log_dump(State(state): State<LogState>) -> impl IntoResponse {
    Json(state.dump())
}

fn accepts(state: &LogState, entry: &LogEntry, params: &LogQuery) -> bool {
    is_level_allowed(&entry.level, state.get_max_level()) && filter_entry(entry, params)
}

/// Une entrée passe si son niveau est au moins aussi sévère que `max_level`.
fn is_level_allowed(log_level: &str, max_level: Level) -> bool {
    string_to_level(log_level).is_some_and(|level| level <= max_level)
}

/// Filtre d'une requête SSE : niveaux cochés (tous si aucun) et mot-clé.
fn filter_entry(entry: &LogEntry, q: &LogQuery) -> bool {
    let flags = q.level_flags();
    let any_flag = flags.iter().any(|(flag, _)| flag.unwrap_or(false));

    let level_ok = !any_flag
        || flags
            .iter()
            .any(|(flag, name)| flag.unwrap_or(false) && entry.level.eq_ignore_ascii_case(name));

    let search_ok = q
        .search
        .as_deref()
        .is_none_or(|s| entry.message.contains(s) || entry.target.contains(s));

    level_ok && search_ok
}

/// Options d'initialisation du système de logging
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Niveau minimal retenu au démarrage
    pub min_level: Level,
    /// Capacité du buffer circulaire (nombre d'entrées conservées)
    pub buffer_capacity: usize,
    /// Activer la sortie console
    pub enable_console: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            min_level: Level::INFO,
            buffer_capacity: 1000,
            enable_console: true,
        }
    }
}

impl LoggingOptions {
    /// Lit la section `host.logger` ; un niveau inconnu retombe sur INFO.
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_level: string_to_level(&config.get_log_min_level()).unwrap_or(Level::INFO),
            buffer_capacity: config.get_log_cache_size(),
            enable_console: config.get_log_enable_console(),
        }
    }
}

/// Installe le subscriber global : filtre rechargeable, [`SseLayer`] et
/// éventuellement la console.
///
/// Si un subscriber global existe déjà (tests), il est conservé et le
/// `LogState` retourné ne reçoit rien.
///
/// ```rust,no_run
/// use pmoserver::logs::{init_logging, LoggingOptions};
///
/// let log_state = init_logging(LoggingOptions::default());
/// ```
pub fn init_logging(options: LoggingOptions) -> LogState {
    let (filter, reload_handle) = reload::Layer::new(LevelFilter::from_level(options.min_level));
    let log_state =
        LogState::new(options.buffer_capacity).with_reload(reload_handle, options.min_level);

    // le filtre doit précéder le SseLayer
    let subscriber = Registry::default()
        .with(filter)
        .with(SseLayer::new(log_state.clone()));

    let installed = if options.enable_console {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .try_init()
    } else {
        subscriber.try_init()
    };

    if let Err(e) = installed {
        eprintln!("⚠️ Logging already initialised: {}", e);
    }

    log_state
}

/// Request body pour la configuration du logging
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct LogSetupRequest {
    pub level: String,
}

/// Response pour la configuration du logging
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct LogSetupResponse {
    pub current_level: String,
    pub available_levels: Vec<String>,
}

impl LogSetupResponse {
    fn for_level(level: Level) -> Self {
        Self {
            current_level: level_to_string(level),
            available_levels: LEVEL_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Niveau de log courant
#[utoipa::path(
    get,
    path = "/log_setup",
    responses(
        (status = 200, description = "Current log level", body = LogSetupResponse)
    ),
    tag = "logs"
)]
pub async fn log_setup_get(State(state): State<LogState>) -> impl IntoResponse {
    Json(LogSetupResponse::for_level(state.get_max_level()))
}

/// Change le niveau de log
#[utoipa::path(
    post,
    path = "/log_setup",
    request_body = LogSetupRequest,
    responses(
        (status = 200, description = "Log level updated", body = LogSetupResponse),
        (status = 400, description = "Invalid log level")
    ),
    tag = "logs"
)]
pub async fn log_setup_post(
    State(state): State<LogState>,
    Json(payload): Json<LogSetupRequest>,
) -> impl IntoResponse {
    let Some(level) = string_to_level(&payload.level) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": format!("Invalid log level. Must be one of: {}", LEVEL_NAMES.join(", "))
            })),
        )
            .into_response();
    };

    state.set_max_level(level);
    tracing::info!("Log level changed to: {}", level);

    Json(LogSetupResponse::for_level(level)).into_response()
}

fn string_to_level(s: &str) -> Option<Level> {
    s.trim().parse().ok()
}

fn level_to_string(level: Level) -> String {
    level.as_str().to_string()
}

/// Router de l'API de gestion des logs
pub fn create_logs_router(log_state: LogState) -> axum::Router {
    use axum::routing::get;
    axum::Router::new()
        .route("/log_setup", get(log_setup_get).post(log_setup_post))
        .with_state(log_state)
}

/// API OpenAPI pour la gestion des logs
#[derive(utoipa::OpenApi)]
#[openapi(
    paths(log_setup_get, log_setup_post),
    components(schemas(LogSetupRequest, LogSetupResponse)),
    tags((name = "logs", description = "Log level configuration"))
)]
pub struct LogsApiDoc;
