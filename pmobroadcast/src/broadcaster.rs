//! Boucle de diffusion.
//!
//! Une seule tâche fait tourner la station du démarrage à l'arrêt :
//!
//! ```text
//!            reload / backoff
//!   Idle ───────────────────────▶ Playing(track) ──NormalEnd──▶ advance
//!    ▲                               │
//!    │ playlist vide                 └─Decode/ProcessError─▶ Faulted ─pause─▶ advance
//!    └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Le travail par chunk se limite à [`SubscriberRegistry::deliver`], qui ne
//! bloque jamais. La boucle ne s'arrête que sur annulation du jeton fourni à
//! [`Broadcaster::spawn`].
//!
//! [`SubscriberRegistry::deliver`]: crate::SubscriberRegistry::deliver

use crate::pipeline::{Encoder, PipelineEvent, PipelineHandle, PipelineOutcome};
use crate::station::StationShared;
use pmometadata::TrackDescriptor;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(feature = "pmoserver")]
use utoipa::ToSchema;

/// Nombre de chunks d'avance que peut prendre l'encodeur sur la boucle.
const PIPELINE_BUFFER: usize = 16;

/// État de la boucle de diffusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "pmoserver", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum BroadcasterState {
    /// Aucune piste disponible
    Idle,
    /// Un pipeline est actif
    Playing,
    /// Pause après l'échec d'une piste
    Faulted,
    /// Arrêt définitif
    Stopped,
}

impl fmt::Display for BroadcasterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BroadcasterState::Idle => "idle",
            BroadcasterState::Playing => "playing",
            BroadcasterState::Faulted => "faulted",
            BroadcasterState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Unique écrivain de l'état de diffusion.
///
/// Obtenu uniquement avec [`crate::Station::new`] ou [`crate::Station::open`].
pub struct Broadcaster {
    shared: Arc<StationShared>,
    encoder: Arc<dyn Encoder>,
}

impl Broadcaster {
    pub(crate) fn new(shared: Arc<StationShared>, encoder: Arc<dyn Encoder>) -> Self {
        Self { shared, encoder }
    }

    /// Lance la boucle dans une tâche dédiée.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Fait tourner la station jusqu'à l'annulation de `cancel`.
    pub async fn run(self, cancel: CancellationToken) {
        let shared = self.shared.clone();
        info!(station = %shared.settings.name, "📻 Broadcaster started");

        let mut next = shared.playlist.current();
        while !cancel.is_cancelled() {
            let Some(track) = next.take() else {
                if shared.state() != BroadcasterState::Idle {
                    info!("Playlist is empty, broadcaster idle");
                }
                shared.set_now_playing(None);
                shared.set_state(BroadcasterState::Idle);

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = shared.playlist.reloaded() => debug!("Woken by playlist reload"),
                    _ = tokio::time::sleep(shared.settings.idle_backoff) => {}
                }
                next = shared.playlist.advance();
                continue;
            };

            let outcome = match self.play(track.clone(), &cancel).await {
                // l'encodeur s'est arrêté de lui-même : c'est un échec
                PipelineOutcome::Cancelled if !cancel.is_cancelled() => {
                    PipelineOutcome::ProcessError
                }
                outcome => outcome,
            };
            shared.record_track_end(outcome);

            match outcome {
                PipelineOutcome::NormalEnd => {
                    debug!(track = %track.filename, "Track finished");
                }
                PipelineOutcome::Cancelled if cancel.is_cancelled() => break,
                failure => {
                    warn!(
                        track = %track.path.display(),
                        outcome = %failure,
                        pause = ?shared.settings.fault_pause,
                        "Skipping track after encoder failure"
                    );
                    shared.set_state(BroadcasterState::Faulted);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(shared.settings.fault_pause) => {}
                    }
                }
            }

            next = shared.playlist.advance();
        }

        shared.registry.close();
        shared.set_now_playing(None);
        shared.set_state(BroadcasterState::Stopped);
        info!(station = %shared.settings.name, "📻 Broadcaster stopped");
    }

    /// Diffuse une piste jusqu'à la fin de son pipeline.
    async fn play(&self, track: TrackDescriptor, cancel: &CancellationToken) -> PipelineOutcome {
        let shared = &self.shared;
        info!(
            title = %track.display_title(),
            file = %track.filename,
            listeners = shared.registry.len(),
            "▶️ Now playing"
        );
        shared.set_now_playing(Some(track.clone()));
        shared.set_state(BroadcasterState::Playing);

        let mut pipeline = PipelineHandle::start(self.encoder.clone(), track, PIPELINE_BUFFER);
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let released = pipeline.shutdown(shared.settings.shutdown_timeout).await;
                    debug!(released, "Active pipeline cancelled");
                    return PipelineOutcome::Cancelled;
                }
                event = pipeline.next_event() => event,
            };

            match event {
                PipelineEvent::Chunk(chunk) => {
                    let report = shared.registry.deliver(&chunk);
                    shared.record_chunk(&chunk, &report);
                }
                PipelineEvent::Finished(outcome) => return outcome,
            }
        }
    }
}

impl fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcaster")
            .field("station", &self.shared.settings.name)
            .finish()
    }
}
