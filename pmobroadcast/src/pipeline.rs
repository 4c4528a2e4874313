//! Pipeline d'encodage : une invocation d'encodeur par piste.
//!
//! L'encodeur tourne dans sa propre tâche tokio et pousse ses chunks dans un
//! canal borné ; le Broadcaster les consomme dans l'ordre de production via
//! [`PipelineHandle::next_event`]. Chaque pipeline se termine par exactement un
//! [`PipelineOutcome`].

use crate::chunk::BroadcastChunk;
use async_trait::async_trait;
use bytes::Bytes;
use pmometadata::TrackDescriptor;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Façon dont un pipeline s'est terminé.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineOutcome {
    /// Source épuisée proprement
    NormalEnd,
    /// Fichier source illisible ou corrompu
    DecodeError,
    /// L'encodeur n'a pas démarré ou s'est terminé anormalement
    ProcessError,
    /// Arrêt forcé par le Broadcaster
    Cancelled,
}

impl PipelineOutcome {
    pub fn is_failure(self) -> bool {
        matches!(self, PipelineOutcome::DecodeError | PipelineOutcome::ProcessError)
    }
}

impl fmt::Display for PipelineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PipelineOutcome::NormalEnd => "normal end",
            PipelineOutcome::DecodeError => "decode error",
            PipelineOutcome::ProcessError => "process error",
            PipelineOutcome::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Erreurs renvoyées par un [`Encoder`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("cannot decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("encoder process failed: {0}")]
    Process(String),

    #[error("encoding cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn outcome(&self) -> PipelineOutcome {
        match self {
            PipelineError::Decode { .. } => PipelineOutcome::DecodeError,
            PipelineError::Process(_) => PipelineOutcome::ProcessError,
            PipelineError::Cancelled => PipelineOutcome::Cancelled,
        }
    }
}

/// Évènement produit par un pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Chunk(BroadcastChunk),
    Finished(PipelineOutcome),
}

/// Côté écriture du pipeline, remis à l'encodeur.
///
/// Numérote les chunks à partir de 0 pour chaque piste.
#[derive(Debug)]
pub struct ChunkWriter {
    tx: mpsc::Sender<PipelineEvent>,
    next_seq: u64,
}

impl ChunkWriter {
    fn new(tx: mpsc::Sender<PipelineEvent>) -> Self {
        Self { tx, next_seq: 0 }
    }

    /// Publie un chunk. Attend si le consommateur a pris du retard ; échoue
    /// avec [`PipelineError::Cancelled`] si le pipeline a été abandonné.
    pub async fn write(&mut self, data: impl Into<Bytes>) -> Result<(), PipelineError> {
        let data = data.into();
        if data.is_empty() {
            return Ok(());
        }
        let chunk = BroadcastChunk::new(self.next_seq, data);
        self.tx
            .send(PipelineEvent::Chunk(chunk))
            .await
            .map_err(|_| PipelineError::Cancelled)?;
        self.next_seq += 1;
        Ok(())
    }

    /// Nombre de chunks publiés jusqu'ici.
    pub fn chunks_written(&self) -> u64 {
        self.next_seq
    }
}

/// Source d'audio encodé pour une piste.
///
/// L'implémentation de production lance ffmpeg ([`crate::FfmpegEncoder`]) ;
/// les tests utilisent une source synthétique. `encode` doit rendre la main
/// rapidement quand `cancel` est déclenché et libérer toutes ses ressources
/// avant de retourner.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(
        &self,
        track: &TrackDescriptor,
        out: &mut ChunkWriter,
        cancel: CancellationToken,
    ) -> Result<(), PipelineError>;
}

/// Pipeline actif pour une piste.
pub struct PipelineHandle {
    track: TrackDescriptor,
    rx: mpsc::Receiver<PipelineEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    outcome: Option<PipelineOutcome>,
}

impl PipelineHandle {
    /// Démarre l'encodage de `track` dans une nouvelle tâche.
    ///
    /// `buffer` borne le nombre de chunks produits mais pas encore consommés.
    pub fn start(encoder: Arc<dyn Encoder>, track: TrackDescriptor, buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let cancel = CancellationToken::new();

        let task_track = track.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let mut writer = ChunkWriter::new(tx);
            let result = encoder
                .encode(&task_track, &mut writer, task_cancel.clone())
                .await;

            let outcome = match result {
                Ok(()) if task_cancel.is_cancelled() => PipelineOutcome::Cancelled,
                Ok(()) => PipelineOutcome::NormalEnd,
                Err(PipelineError::Cancelled) => PipelineOutcome::Cancelled,
                Err(e) => {
                    warn!(
                        track = %task_track.path.display(),
                        chunks = writer.chunks_written(),
                        "Encoding failed: {}",
                        e
                    );
                    e.outcome()
                }
            };

            debug!(track = %task_track.filename, %outcome, "Pipeline task finished");
            let _ = writer.tx.send(PipelineEvent::Finished(outcome)).await;
        });

        Self {
            track,
            rx,
            cancel,
            task: Some(task),
            outcome: None,
        }
    }

    pub fn track(&self) -> &TrackDescriptor {
        &self.track
    }

    /// Issue du pipeline, une fois l'évènement final reçu.
    pub fn outcome(&self) -> Option<PipelineOutcome> {
        self.outcome
    }

    /// Prochain évènement, dans l'ordre de production.
    ///
    /// Une tâche disparue sans signaler sa fin (panic de l'encodeur) compte
    /// comme une [`PipelineOutcome::ProcessError`]. Après la fin, renvoie
    /// toujours la même issue.
    pub async fn next_event(&mut self) -> PipelineEvent {
        if let Some(outcome) = self.outcome {
            return PipelineEvent::Finished(outcome);
        }

        match self.rx.recv().await {
            Some(PipelineEvent::Finished(outcome)) => {
                self.outcome = Some(outcome);
                PipelineEvent::Finished(outcome)
            }
            Some(event) => event,
            None => {
                warn!(track = %self.track.filename, "Pipeline task vanished without an outcome");
                self.outcome = Some(PipelineOutcome::ProcessError);
                PipelineEvent::Finished(PipelineOutcome::ProcessError)
            }
        }
    }

    /// Demande l'arrêt de l'encodeur sans attendre.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Annule l'encodeur et attend, au plus `timeout`, la libération de ses
    /// ressources. Renvoie `false` si la tâche a dû être avortée.
    pub async fn shutdown(mut self, timeout: Duration) -> bool {
        self.cancel.cancel();
        // débloque un encodeur en attente sur un canal plein
        self.rx.close();

        let Some(task) = self.task.take() else {
            return true;
        };
        let abort = task.abort_handle();
        match tokio::time::timeout(timeout, task).await {
            Ok(_) => true,
            Err(_) => {
                warn!(
                    track = %self.track.filename,
                    "Pipeline did not stop within {:?}, aborting",
                    timeout
                );
                abort.abort();
                false
            }
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("track", &self.track.path)
            .field("outcome", &self.outcome)
            .finish()
    }
}
