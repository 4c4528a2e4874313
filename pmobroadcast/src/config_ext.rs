//! Extension pour construire les réglages de la station depuis pmoconfig
//!
//! ```rust,ignore
//! use pmoconfig::get_config;
//! use pmobroadcast::StationConfigExt;
//!
//! let settings = get_config().station_settings()?;
//! println!("{} @ {} kbps", settings.name, settings.encoder.bitrate_kbps);
//! ```

use crate::{EncoderSettings, StationSettings};
use anyhow::Result;
use pmoconfig::Config;
use std::path::PathBuf;
use std::time::Duration;

/// Trait d'extension de `pmoconfig::Config` pour la station.
pub trait StationConfigExt {
    /// Réglages de l'encodeur (`encoder.*`).
    fn encoder_settings(&self) -> EncoderSettings;

    /// Instantané complet des réglages (`station.*`, `encoder.*`, `broadcast.*`).
    ///
    /// Le répertoire musical est créé s'il n'existe pas.
    fn station_settings(&self) -> Result<StationSettings>;
}

impl StationConfigExt for Config {
    fn encoder_settings(&self) -> EncoderSettings {
        EncoderSettings {
            ffmpeg_path: PathBuf::from(self.get_ffmpeg_path()),
            bitrate_kbps: self.get_encoder_bitrate().max(8),
            sample_rate: self.get_encoder_sample_rate().max(8000),
            channels: self.get_encoder_channels().clamp(1, 8),
            chunk_size: self.get_encoder_chunk_size().max(512),
        }
    }

    fn station_settings(&self) -> Result<StationSettings> {
        Ok(StationSettings {
            name: self.get_station_name(),
            genre: self.get_station_genre(),
            description: self.get_station_description(),
            music_dir: self.get_music_dir()?,
            encoder: self.encoder_settings(),
            max_listeners: self.get_max_listeners(),
            queue_capacity: self.get_queue_capacity().max(1),
            fault_pause: Duration::from_millis(self.get_fault_pause_ms()),
            idle_backoff: Duration::from_millis(self.get_idle_backoff_ms().max(10)),
            shutdown_timeout: Duration::from_millis(self.get_shutdown_timeout_ms()),
        })
    }
}
