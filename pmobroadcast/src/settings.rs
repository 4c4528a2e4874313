use std::path::PathBuf;
use std::time::Duration;

/// Paramètres passés à l'encodeur pour chaque piste.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub ffmpeg_path: PathBuf,
    /// Débit de sortie en kbit/s
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub channels: u32,
    /// Taille maximale d'un chunk lu sur la sortie de l'encodeur
    pub chunk_size: usize,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            bitrate_kbps: 128,
            sample_rate: 44_100,
            channels: 2,
            chunk_size: 8192,
        }
    }
}

/// Réglages de la station, lus une fois au démarrage puis immuables.
#[derive(Debug, Clone)]
pub struct StationSettings {
    pub name: String,
    pub genre: String,
    pub description: String,
    pub music_dir: PathBuf,
    pub encoder: EncoderSettings,
    pub max_listeners: usize,
    /// Capacité de la file de chaque auditeur, en chunks
    pub queue_capacity: usize,
    /// Pause après un échec d'encodage, avant de passer à la piste suivante
    pub fault_pause: Duration,
    /// Intervalle de réveil quand la playlist est vide
    pub idle_backoff: Duration,
    /// Attente maximale de la libération d'un pipeline annulé
    pub shutdown_timeout: Duration,
}

impl Default for StationSettings {
    fn default() -> Self {
        Self {
            name: "PMORadio".to_string(),
            genre: "Various".to_string(),
            description: "PMORadio continuous broadcast".to_string(),
            music_dir: PathBuf::from("music"),
            encoder: EncoderSettings::default(),
            max_listeners: 100,
            queue_capacity: 64,
            fault_pause: Duration::from_secs(2),
            idle_backoff: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}
