//! Outils partagés par les tests d'intégration : un encodeur scripté à la
//! place de ffmpeg et un scanner statique.

#![allow(dead_code)]

use async_trait::async_trait;
use pmobroadcast::{
    BroadcastChunk, ChunkWriter, Encoder, PipelineError, StationSettings, TrackDescriptor,
    TrackScanner,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Encodeur synthétique.
///
/// Le comportement dépend du titre de la piste :
/// - `bad…` : erreur de décodage immédiate
/// - `endless…` : produit des chunks jusqu'à annulation
/// - sinon : `chunks_per_track` chunks
///
/// Chaque chunk contient `serial|titre|index`, `serial` étant global.
pub struct ScriptedEncoder {
    pub chunks_per_track: usize,
    pub interval: Duration,
    serial: AtomicU64,
    started: Mutex<Vec<String>>,
    cancelled: AtomicUsize,
}

impl ScriptedEncoder {
    pub fn new(chunks_per_track: usize, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            chunks_per_track,
            interval,
            serial: AtomicU64::new(0),
            started: Mutex::new(Vec::new()),
            cancelled: AtomicUsize::new(0),
        })
    }

    /// Titres des pistes démarrées, dans l'ordre.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// Nombre d'encodages interrompus par annulation.
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn emit(
        &self,
        track: &TrackDescriptor,
        index: usize,
        out: &mut ChunkWriter,
    ) -> Result<(), PipelineError> {
        let serial = self.serial.fetch_add(1, Ordering::SeqCst);
        out.write(format!("{serial}|{}|{index}", track.title).into_bytes())
            .await
    }

    async fn pause(&self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        if self.interval.is_zero() {
            tokio::task::yield_now().await;
            return if cancel.is_cancelled() {
                Err(PipelineError::Cancelled)
            } else {
                Ok(())
            };
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            _ = tokio::time::sleep(self.interval) => Ok(()),
        }
    }
}

#[async_trait]
impl Encoder for ScriptedEncoder {
    async fn encode(
        &self,
        track: &TrackDescriptor,
        out: &mut ChunkWriter,
        cancel: CancellationToken,
    ) -> Result<(), PipelineError> {
        self.started.lock().unwrap().push(track.title.clone());

        if track.title.starts_with("bad") {
            return Err(PipelineError::Decode {
                path: track.path.clone(),
                reason: "Invalid data found when processing input".into(),
            });
        }

        let endless = track.title.starts_with("endless");
        let mut index = 0;
        while endless || index < self.chunks_per_track {
            if let Err(e) = self.pause(&cancel).await {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                return Err(e);
            }
            self.emit(track, index, out).await?;
            index += 1;
        }
        Ok(())
    }
}

/// Scanner qui renvoie la liste courante, modifiable par le test.
#[derive(Default)]
pub struct StaticScanner {
    tracks: Mutex<Vec<TrackDescriptor>>,
}

impl StaticScanner {
    pub fn new(names: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            tracks: Mutex::new(tracks(names)),
        })
    }

    pub fn set(&self, names: &[&str]) {
        *self.tracks.lock().unwrap() = tracks(names);
    }
}

impl TrackScanner for StaticScanner {
    fn scan(&self, _directory: &Path) -> Vec<TrackDescriptor> {
        self.tracks.lock().unwrap().clone()
    }
}

pub fn track(name: &str) -> TrackDescriptor {
    TrackDescriptor::untagged(PathBuf::from(format!("/srv/music/{name}.mp3")))
        .expect("mp3 is a supported extension")
}

pub fn tracks(names: &[&str]) -> Vec<TrackDescriptor> {
    names.iter().map(|n| track(n)).collect()
}

pub fn settings() -> StationSettings {
    StationSettings {
        name: "Test FM".to_string(),
        music_dir: PathBuf::from("/srv/music"),
        max_listeners: 16,
        queue_capacity: 64,
        fault_pause: Duration::from_millis(500),
        idle_backoff: Duration::from_millis(100),
        shutdown_timeout: Duration::from_secs(1),
        ..Default::default()
    }
}

/// Contenu décodé d'un chunk produit par [`ScriptedEncoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heard {
    pub serial: u64,
    pub title: String,
    pub index: usize,
}

pub fn heard(chunk: &BroadcastChunk) -> Heard {
    let text = std::str::from_utf8(chunk.data()).expect("utf8 payload");
    let mut parts = text.split('|');
    let serial = parts.next().unwrap().parse().unwrap();
    let title = parts.next().unwrap().to_string();
    let index = parts.next().unwrap().parse().unwrap();
    Heard {
        serial,
        title,
        index,
    }
}

/// Attend que `condition` devienne vraie, au plus `limit`.
pub async fn wait_until(mut condition: impl FnMut() -> bool, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// ffmpeg du système, s'il sait produire du MP3.
pub fn system_ffmpeg() -> Option<PathBuf> {
    let output = std::process::Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .output()
        .ok()?;
    let encoders = String::from_utf8_lossy(&output.stdout);
    (output.status.success() && encoders.contains("libmp3lame")).then(|| PathBuf::from("ffmpeg"))
}

/// WAV PCM 16 bits stéréo 44,1 kHz de `secs` secondes de silence.
pub fn silent_wav(secs: u32) -> Vec<u8> {
    let data_len = secs * 44_100 * 4;
    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&44_100u32.to_le_bytes());
    bytes.extend_from_slice(&(44_100u32 * 4).to_le_bytes());
    bytes.extend_from_slice(&4u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    bytes.resize(bytes.len() + data_len as usize, 0);
    bytes
}
