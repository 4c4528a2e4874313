//! Playlist de la station : liste ordonnée, curseur et rechargement atomique.
//!
//! Le curseur désigne toujours un index valide de la liste courante, ou rien
//! quand la liste est vide. Seul le [`crate::Broadcaster`] fait avancer le
//! curseur ; la couche HTTP ne peut que recharger la liste.

use pmometadata::TrackDescriptor;
use serde::Serialize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Notify;
use tracing::{debug, info};

#[cfg(feature = "pmoserver")]
use utoipa::ToSchema;

/// Résultat d'un rechargement, renvoyé tel quel par l'API HTTP.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "pmoserver", derive(ToSchema))]
pub struct ReloadReport {
    pub track_count: usize,
    pub tracks: Vec<TrackDescriptor>,
}

#[derive(Debug, Default)]
struct PlaylistState {
    tracks: Arc<Vec<TrackDescriptor>>,
    cursor: Option<usize>,
    /// Index que le prochain `advance()` doit atteindre tel quel, posé quand la
    /// piste courante a disparu de la liste ou quand la liste sort du vide.
    pending: Option<usize>,
}

/// Gestionnaire de la playlist unique de la station.
#[derive(Debug, Default)]
pub struct PlaylistManager {
    state: RwLock<PlaylistState>,
    reloaded: Notify,
}

impl PlaylistManager {
    /// Crée une playlist positionnée sur la première piste (ou vide).
    pub fn new(tracks: Vec<TrackDescriptor>) -> Self {
        let cursor = if tracks.is_empty() { None } else { Some(0) };
        Self {
            state: RwLock::new(PlaylistState {
                tracks: Arc::new(tracks),
                cursor,
                pending: None,
            }),
            reloaded: Notify::new(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, PlaylistState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, PlaylistState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Piste sous le curseur, `None` si la playlist est vide.
    pub fn current(&self) -> Option<TrackDescriptor> {
        let state = self.read();
        state.cursor.and_then(|i| state.tracks.get(i).cloned())
    }

    /// Index du curseur.
    pub fn cursor(&self) -> Option<usize> {
        self.read().cursor
    }

    /// Instantané de la liste complète.
    pub fn tracks(&self) -> Vec<TrackDescriptor> {
        self.read().tracks.as_ref().clone()
    }

    pub fn len(&self) -> usize {
        self.read().tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().tracks.is_empty()
    }

    /// Avance d'une position (retour à 0 après la dernière piste) et renvoie
    /// la nouvelle piste courante.
    pub(crate) fn advance(&self) -> Option<TrackDescriptor> {
        let mut state = self.write();
        let len = state.tracks.len();
        if len == 0 {
            state.cursor = None;
            state.pending = None;
            return None;
        }

        let next = match state.pending.take() {
            Some(index) => index.min(len - 1),
            None => state.cursor.map_or(0, |cursor| (cursor + 1) % len),
        };
        state.cursor = Some(next);
        state.tracks.get(next).cloned()
    }

    /// Remplace la liste d'un seul coup.
    ///
    /// La piste courante est retrouvée par son chemin dans la nouvelle liste.
    /// Absente, le curseur est borné à la nouvelle longueur et le prochain
    /// `advance()` atterrit sur la piste qui occupe désormais l'ancienne position
    /// (ou sur la première si cette position n'existe plus). Un saut déjà
    /// programmé suit sa piste cible si elle existe encore. Le pipeline en
    /// cours n'est jamais touché.
    pub fn reload(&self, new_tracks: Vec<TrackDescriptor>) -> ReloadReport {
        let report = {
            let mut state = self.write();
            let len = new_tracks.len();
            let anchor = state.pending.or(state.cursor);
            let path_at = |index: Option<usize>| {
                index
                    .and_then(|i| state.tracks.get(i))
                    .map(|t| t.path.clone())
            };
            let find = |path: Option<std::path::PathBuf>| {
                path.and_then(|path| new_tracks.iter().position(|t| t.path == path))
            };
            let cursor_found = find(path_at(state.cursor));
            // un saut déjà programmé suit la piste qu'il visait
            let pending_found = find(path_at(state.pending));

            let (cursor, pending) = match (anchor, len) {
                (_, 0) => (None, None),
                (None, _) => (Some(0), Some(0)),
                (Some(position), _) => {
                    let fallback = if position < len { position } else { 0 };
                    match cursor_found {
                        Some(index) => (
                            Some(index),
                            state.pending.map(|_| pending_found.unwrap_or(fallback)),
                        ),
                        None => (
                            Some(position.min(len - 1)),
                            Some(pending_found.unwrap_or(fallback)),
                        ),
                    }
                }
            };

            debug!(
                previous = state.tracks.len(),
                current = len,
                ?cursor,
                ?pending,
                "Playlist cursor remapped"
            );

            let tracks = Arc::new(new_tracks);
            state.tracks = tracks.clone();
            state.cursor = cursor;
            state.pending = pending;

            ReloadReport {
                track_count: len,
                tracks: tracks.as_ref().clone(),
            }
        };

        info!(tracks = report.track_count, "Playlist reloaded");
        self.reloaded.notify_one();
        report
    }

    /// Attend le prochain rechargement (réveil du Broadcaster inactif).
    pub(crate) async fn reloaded(&self) {
        self.reloaded.notified().await
    }
}
