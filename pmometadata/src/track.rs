use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Format audio d'une piste, déduit de l'extension du fichier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Flac,
    Ogg,
    Wav,
    Aac,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 5] = [
        AudioFormat::Mp3,
        AudioFormat::Flac,
        AudioFormat::Ogg,
        AudioFormat::Wav,
        AudioFormat::Aac,
    ];

    /// Extension canonique (sans point).
    pub fn extension(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Flac => "flac",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Wav => "wav",
            AudioFormat::Aac => "aac",
        }
    }

    /// Reconnaît l'extension d'un chemin, sans tenir compte de la casse.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        Self::ALL.into_iter().find(|f| f.extension() == ext)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Description immuable d'une piste de la playlist.
///
/// `path`, `filename`, `format` et `title` sont toujours renseignés ; le titre
/// vaut le nom de fichier sans extension quand aucun tag ne le fournit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct TrackDescriptor {
    /// Chemin du fichier source
    #[cfg_attr(feature = "openapi", schema(value_type = String, example = "/srv/music/so_what.flac"))]
    pub path: PathBuf,
    /// Nom de fichier affiché
    #[cfg_attr(feature = "openapi", schema(example = "so_what.flac"))]
    pub filename: String,
    pub format: AudioFormat,
    #[cfg_attr(feature = "openapi", schema(example = "So What"))]
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
}

impl TrackDescriptor {
    /// Construit un descripteur sans métadonnées.
    ///
    /// Retourne `None` si l'extension n'est pas un format pris en charge.
    pub fn untagged(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let format = AudioFormat::from_path(&path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let title = default_title(&path);

        Some(Self {
            path,
            filename,
            format,
            title,
            artist: None,
            album: None,
            genre: None,
            year: None,
            track_number: None,
            duration_secs: None,
        })
    }

    /// Remplace le titre, en ignorant les valeurs vides.
    pub fn with_title(mut self, title: Option<String>) -> Self {
        if let Some(title) = title.filter(|t| !t.trim().is_empty()) {
            self.title = title;
        }
        self
    }

    pub fn with_artist(mut self, artist: Option<String>) -> Self {
        self.artist = artist.filter(|a| !a.trim().is_empty());
        self
    }

    /// Libellé « Artiste - Titre » utilisé pour les logs et le statut.
    pub fn display_title(&self) -> String {
        match &self.artist {
            Some(artist) => format!("{} - {}", artist, self.title),
            None => self.title.clone(),
        }
    }
}

fn default_title(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
