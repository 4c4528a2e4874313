use crate::{ScanError, TrackDescriptor};
use lofty::config::ParseOptions;
use lofty::prelude::*;
use lofty::probe::Probe;
use std::fs::File;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Résout un répertoire en une liste ordonnée de pistes.
///
/// L'appel peut être lent (I/O disque, lecture de tags) : il est exécuté au
/// démarrage et lors des rechargements, jamais sur le chemin de diffusion.
/// L'ordre retourné doit être stable d'un appel à l'autre tant que
/// l'arborescence ne change pas.
pub trait TrackScanner: Send + Sync {
    fn scan(&self, directory: &Path) -> Vec<TrackDescriptor>;
}

/// Scanner récursif basé sur `walkdir` (ordre trié par nom) et `lofty` (tags).
///
/// Les liens symboliques sont suivis par défaut ; une boucle de liens est
/// signalée par walkdir comme une entrée en erreur et ignorée.
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    follow_links: bool,
}

impl Default for DirectoryScanner {
    fn default() -> Self {
        Self { follow_links: true }
    }
}

impl DirectoryScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suit les liens symboliques pendant le parcours.
    pub fn follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }
}

impl TrackScanner for DirectoryScanner {
    fn scan(&self, directory: &Path) -> Vec<TrackDescriptor> {
        let mut tracks = Vec::new();
        let walker = WalkDir::new(directory)
            .follow_links(self.follow_links)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(directory = %directory.display(), "Skipping entry: {}", ScanError::from(e));
                    continue;
                }
            };
            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }
            if !file_type.is_file() {
                warn!(path = %entry.path().display(), "Skipping entry that is not a regular file");
                continue;
            }

            match read_track(entry.path()) {
                Ok(track) => tracks.push(track),
                Err(e) => warn!("Skipping file: {}", e),
            }
        }

        info!(
            directory = %directory.display(),
            tracks = tracks.len(),
            "Music directory scanned"
        );
        tracks
    }
}

/// Lit un fichier unique.
///
/// Le fichier doit avoir une extension prise en charge et être lisible.
/// Une erreur de lecture des tags n'est pas fatale : le descripteur est
/// retourné sans métadonnées, titre dérivé du nom de fichier.
pub fn read_track(path: &Path) -> Result<TrackDescriptor, ScanError> {
    let base =
        TrackDescriptor::untagged(path).ok_or_else(|| ScanError::Unsupported(path.to_path_buf()))?;

    File::open(path).map_err(|source| ScanError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;

    match apply_tags(base.clone()) {
        Ok(track) => Ok(track),
        Err(e) => {
            debug!(path = %path.display(), "No usable tags ({}), using filename", e);
            Ok(base)
        }
    }
}

fn apply_tags(mut track: TrackDescriptor) -> lofty::error::Result<TrackDescriptor> {
    let tagged_file = Probe::open(&track.path)?
        .options(ParseOptions::new())
        .read()?;

    let duration = tagged_file.properties().duration().as_secs();
    track.duration_secs = (duration > 0).then_some(duration);

    let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
        return Ok(track);
    };

    let mut track = track
        .with_title(tag.title().map(|s| s.to_string()))
        .with_artist(tag.artist().map(|s| s.to_string()));
    track.album = tag.album().map(|s| s.to_string()).filter(|s| !s.is_empty());
    track.genre = tag.genre().map(|s| s.to_string()).filter(|s| !s.is_empty());
    track.year = tag.year();
    track.track_number = tag.track();
    Ok(track)
}
