//! Extension pmoserver pour la station
//!
//! Ce module ajoute à un serveur pmoserver l'API de contrôle de la station
//! et le point de diffusion `/stream` consommé par les lecteurs audio.

use crate::{Error, ReloadReport, Station, StationStatus, SubscriberInfo};
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use pmometadata::TrackDescriptor;
use serde::Serialize;
use tracing::{error, info, warn};
use utoipa::{OpenApi, ToSchema};

/// Contenu de la playlist
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlaylistResponse {
    /// Nombre de pistes
    pub total_tracks: usize,
    /// Piste en cours de diffusion
    pub now_playing: Option<TrackDescriptor>,
    /// Pistes dans l'ordre de diffusion
    pub tracks: Vec<TrackDescriptor>,
}

/// Erreur renvoyée par l'API
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// GET /status - Instantané de la station
#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, description = "État courant de la station", body = StationStatus)
    ),
    tag = "radio"
)]
async fn get_status(State(station): State<Station>) -> Json<StationStatus> {
    Json(station.status())
}

/// GET /playlist - Liste des pistes
#[utoipa::path(
    get,
    path = "/playlist",
    responses(
        (status = 200, description = "Playlist courante", body = PlaylistResponse)
    ),
    tag = "radio"
)]
async fn get_playlist(State(station): State<Station>) -> Json<PlaylistResponse> {
    let tracks = station.playlist();
    Json(PlaylistResponse {
        total_tracks: tracks.len(),
        now_playing: station.now_playing(),
        tracks,
    })
}

/// POST /reload - Rescanne le répertoire musical
///
/// La piste en cours n'est pas interrompue.
#[utoipa::path(
    post,
    path = "/reload",
    responses(
        (status = 200, description = "Playlist rechargée", body = ReloadReport),
        (status = 500, description = "Échec du scan", body = ErrorResponse)
    ),
    tag = "radio"
)]
async fn reload_playlist(State(station): State<Station>) -> Response {
    match station.reload().await {
        Ok(report) => {
            info!(tracks = report.track_count, "🔄 Playlist reloaded via API");
            Json(report).into_response()
        }
        Err(e) => {
            error!("Playlist reload failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /listeners - Auditeurs connectés
#[utoipa::path(
    get,
    path = "/listeners",
    responses(
        (status = 200, description = "Auditeurs connectés", body = [SubscriberInfo])
    ),
    tag = "radio"
)]
async fn get_listeners(State(station): State<Station>) -> Json<Vec<SubscriberInfo>> {
    Json(station.listeners())
}

/// GET /stream - Flux MP3 continu
///
/// L'auditeur rejoint le flux en direct : il reçoit les chunks produits à
/// partir de sa connexion, sans rattrapage.
#[utoipa::path(
    get,
    path = "/stream",
    responses(
        (status = 200, description = "Flux audio MP3 continu", content_type = "audio/mpeg"),
        (status = 503, description = "Station pleine ou arrêtée", body = ErrorResponse)
    ),
    tag = "radio"
)]
async fn stream_audio(State(station): State<Station>) -> Response {
    let subscriber = match station.subscribe() {
        Ok(subscriber) => subscriber,
        Err(e @ Error::CapacityExceeded { .. }) => {
            warn!("Listener refused: {}", e);
            return error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string());
        }
        Err(e) => return error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    };

    let headers = icy_headers(&station);
    let body = Body::from_stream(subscriber.into_byte_stream());
    (headers, body).into_response()
}

/// En-têtes de type Icecast décrivant la station.
///
/// Une valeur non représentable en en-tête HTTP est omise.
fn icy_headers(station: &Station) -> HeaderMap {
    let settings = station.settings();
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    let fields = [
        ("icy-name", settings.name.clone()),
        ("icy-genre", settings.genre.clone()),
        ("icy-description", settings.description.clone()),
        ("icy-br", settings.encoder.bitrate_kbps.to_string()),
        ("icy-sr", settings.encoder.sample_rate.to_string()),
        ("icy-pub", "0".to_string()),
        ("icy-metaint", "0".to_string()),
    ];
    for (name, value) in fields {
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.insert(HeaderName::from_static(name), value);
            }
            Err(_) => warn!(header = name, "Skipping non-ASCII header value"),
        }
    }
    headers
}

/// Documentation OpenAPI de l'API de la station
#[derive(OpenApi)]
#[openapi(
    info(
        title = "PMORadio API",
        version = "1.0.0",
        description = "Contrôle et écoute de la station de diffusion continue"
    ),
    paths(get_status, get_playlist, reload_playlist, get_listeners, stream_audio),
    components(schemas(
        StationStatus,
        PlaylistResponse,
        ReloadReport,
        SubscriberInfo,
        ErrorResponse,
        TrackDescriptor,
        crate::BroadcasterState,
        crate::AudioFormat
    )),
    tags((name = "radio", description = "Station de diffusion continue"))
)]
pub struct RadioApiDoc;

/// Crée le router de l'API de la station
pub fn create_api_router(station: Station) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/playlist", get(get_playlist))
        .route("/reload", post(reload_playlist))
        .route("/listeners", get(get_listeners))
        .route("/stream", get(stream_audio))
        .with_state(station)
}

/// Trait d'extension pour pmoserver::Server
pub trait RadioExt {
    /// Monte l'API de la station
    ///
    /// # Routes créées
    ///
    /// - API: `/api/radio/*`
    ///   - `GET /status`, `GET /playlist`, `POST /reload`, `GET /listeners`
    ///   - `GET /stream` (flux MP3)
    /// - Swagger: `/swagger-ui/radio`
    async fn init_radio(&mut self, station: Station) -> anyhow::Result<()>;
}

impl RadioExt for pmoserver::Server {
    async fn init_radio(&mut self, station: Station) -> anyhow::Result<()> {
        info!(station = %station.name(), "Registering radio API");
        self.add_openapi(create_api_router(station), RadioApiDoc::openapi(), "radio")
            .await;
        Ok(())
    }
}
