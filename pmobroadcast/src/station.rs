//! Contexte partagé de la station.
//!
//! [`Station`] est la vue offerte au reste du processus (API HTTP, binaire) :
//! lecture d'instantanés, rechargement de la playlist, abonnement des
//! auditeurs. Les champs modifiés par la diffusion (piste en cours, état,
//! compteurs) ne sont écrits que par le [`Broadcaster`] construit en même
//! temps que la station.

use crate::broadcaster::{Broadcaster, BroadcasterState};
use crate::chunk::BroadcastChunk;
use crate::error::Result;
use crate::pipeline::{Encoder, PipelineOutcome};
use crate::playlist::{PlaylistManager, ReloadReport};
use crate::registry::{DeliveryReport, Subscriber, SubscriberId, SubscriberInfo, SubscriberRegistry};
use crate::settings::StationSettings;
use pmometadata::{TrackDescriptor, TrackScanner};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::info;

#[cfg(feature = "pmoserver")]
use utoipa::ToSchema;

/// Instantané de l'état de la station.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "pmoserver", derive(ToSchema))]
pub struct StationStatus {
    #[cfg_attr(feature = "pmoserver", schema(example = "PMORadio"))]
    pub station_name: String,
    /// Piste en cours de diffusion, absente quand la station est inactive
    pub current_track: Option<TrackDescriptor>,
    pub total_tracks: usize,
    pub active_subscribers: usize,
    pub max_subscribers: usize,
    pub state: BroadcasterState,
    pub bitrate_kbps: u32,
    pub uptime_secs: u64,
    pub chunks_broadcast: u64,
    pub bytes_broadcast: u64,
    /// Chunks perdus par des auditeurs trop lents, tous auditeurs confondus
    pub chunks_dropped: u64,
    pub tracks_played: u64,
    pub track_failures: u64,
}

pub(crate) struct StationShared {
    pub(crate) settings: StationSettings,
    pub(crate) playlist: PlaylistManager,
    pub(crate) registry: Arc<SubscriberRegistry>,
    now_playing: RwLock<Option<TrackDescriptor>>,
    state: RwLock<BroadcasterState>,
    chunks_broadcast: AtomicU64,
    bytes_broadcast: AtomicU64,
    chunks_dropped: AtomicU64,
    tracks_played: AtomicU64,
    track_failures: AtomicU64,
    started_at: Instant,
}

impl StationShared {
    fn new(settings: StationSettings, tracks: Vec<TrackDescriptor>) -> Self {
        let registry = Arc::new(SubscriberRegistry::new(
            settings.queue_capacity,
            settings.max_listeners,
        ));
        Self {
            playlist: PlaylistManager::new(tracks),
            registry,
            now_playing: RwLock::new(None),
            state: RwLock::new(BroadcasterState::Idle),
            chunks_broadcast: AtomicU64::new(0),
            bytes_broadcast: AtomicU64::new(0),
            chunks_dropped: AtomicU64::new(0),
            tracks_played: AtomicU64::new(0),
            track_failures: AtomicU64::new(0),
            started_at: Instant::now(),
            settings,
        }
    }

    pub(crate) fn state(&self) -> BroadcasterState {
        *self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn set_state(&self, state: BroadcasterState) {
        *self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    pub(crate) fn now_playing(&self) -> Option<TrackDescriptor> {
        self.now_playing
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn set_now_playing(&self, track: Option<TrackDescriptor>) {
        *self
            .now_playing
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = track;
    }

    pub(crate) fn record_chunk(&self, chunk: &BroadcastChunk, report: &DeliveryReport) {
        self.chunks_broadcast.fetch_add(1, Ordering::Relaxed);
        self.bytes_broadcast
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);
        if report.dropped > 0 {
            self.chunks_dropped
                .fetch_add(report.dropped as u64, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_track_end(&self, outcome: PipelineOutcome) {
        match outcome {
            PipelineOutcome::NormalEnd => {
                self.tracks_played.fetch_add(1, Ordering::Relaxed);
            }
            PipelineOutcome::Cancelled => {}
            _ => {
                self.track_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Station de radio : point d'accès partagé (clonable) à l'état de diffusion.
#[derive(Clone)]
pub struct Station {
    shared: Arc<StationShared>,
    scanner: Arc<dyn TrackScanner>,
}

impl Station {
    /// Construit la station et son Broadcaster à partir d'une liste déjà scannée.
    ///
    /// Le Broadcaster est le seul à faire avancer la playlist ; il faut le
    /// lancer avec [`Broadcaster::spawn`].
    pub fn new(
        settings: StationSettings,
        scanner: Arc<dyn TrackScanner>,
        encoder: Arc<dyn Encoder>,
        tracks: Vec<TrackDescriptor>,
    ) -> (Station, Broadcaster) {
        info!(
            station = %settings.name,
            tracks = tracks.len(),
            max_listeners = settings.max_listeners,
            "Station created"
        );
        let shared = Arc::new(StationShared::new(settings, tracks));
        let station = Station {
            shared: shared.clone(),
            scanner,
        };
        (station, Broadcaster::new(shared, encoder))
    }

    /// Scanne le répertoire musical puis construit la station.
    pub async fn open(
        settings: StationSettings,
        scanner: Arc<dyn TrackScanner>,
        encoder: Arc<dyn Encoder>,
    ) -> Result<(Station, Broadcaster)> {
        let tracks = scan(scanner.clone(), &settings).await?;
        Ok(Self::new(settings, scanner, encoder, tracks))
    }

    pub fn settings(&self) -> &StationSettings {
        &self.shared.settings
    }

    pub fn name(&self) -> &str {
        &self.shared.settings.name
    }

    /// Instantané de l'état courant.
    pub fn status(&self) -> StationStatus {
        let shared = &self.shared;
        StationStatus {
            station_name: shared.settings.name.clone(),
            current_track: shared.now_playing(),
            total_tracks: shared.playlist.len(),
            active_subscribers: shared.registry.len(),
            max_subscribers: shared.registry.max_subscribers(),
            state: shared.state(),
            bitrate_kbps: shared.settings.encoder.bitrate_kbps,
            uptime_secs: shared.started_at.elapsed().as_secs(),
            chunks_broadcast: shared.chunks_broadcast.load(Ordering::Relaxed),
            bytes_broadcast: shared.bytes_broadcast.load(Ordering::Relaxed),
            chunks_dropped: shared.chunks_dropped.load(Ordering::Relaxed),
            tracks_played: shared.tracks_played.load(Ordering::Relaxed),
            track_failures: shared.track_failures.load(Ordering::Relaxed),
        }
    }

    pub fn state(&self) -> BroadcasterState {
        self.shared.state()
    }

    /// Piste réellement en cours d'encodage (peut différer du curseur juste
    /// après un rechargement).
    pub fn now_playing(&self) -> Option<TrackDescriptor> {
        self.shared.now_playing()
    }

    /// Liste complète de la playlist.
    pub fn playlist(&self) -> Vec<TrackDescriptor> {
        self.shared.playlist.tracks()
    }

    /// Rescanne le répertoire musical et remplace la playlist.
    ///
    /// La piste en cours n'est pas interrompue.
    pub async fn reload(&self) -> Result<ReloadReport> {
        let tracks = scan(self.scanner.clone(), &self.shared.settings).await?;
        Ok(self.reload_with(tracks))
    }

    /// Remplace la playlist par une liste déjà construite.
    pub fn reload_with(&self, tracks: Vec<TrackDescriptor>) -> ReloadReport {
        self.shared.playlist.reload(tracks)
    }

    pub fn subscribe(&self) -> Result<Subscriber> {
        self.shared.registry.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.shared.registry.unsubscribe(id)
    }

    pub fn listeners(&self) -> Vec<SubscriberInfo> {
        self.shared.registry.snapshot()
    }
}

impl fmt::Debug for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Station")
            .field("name", &self.shared.settings.name)
            .field("music_dir", &self.shared.settings.music_dir)
            .field("state", &self.shared.state())
            .finish()
    }
}

/// Le scan touche le disque : il tourne hors du runtime asynchrone.
async fn scan(
    scanner: Arc<dyn TrackScanner>,
    settings: &StationSettings,
) -> Result<Vec<TrackDescriptor>> {
    let dir = settings.music_dir.clone();
    let tracks = tokio::task::spawn_blocking(move || scanner.scan(&dir)).await?;
    Ok(tracks)
}
