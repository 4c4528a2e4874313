//! # pmobroadcast - Moteur de diffusion continue pour PMORadio
//!
//! Une seule playlist est jouée en boucle à travers un encodeur externe
//! (ffmpeg) et le flux encodé est diffusé à un nombre quelconque d'auditeurs,
//! qui entendent tous le même audio au même instant.
//!
//! ## Architecture
//!
//! - [`PlaylistManager`] : liste ordonnée de pistes, curseur et rechargement atomique
//! - [`Encoder`] / [`PipelineHandle`] : une invocation d'encodeur par piste,
//!   exécutée dans sa propre tâche, consommée chunk par chunk
//! - [`FfmpegEncoder`] : implémentation par sous-processus ffmpeg
//! - [`SubscriberRegistry`] : files bornées par auditeur, diffusion non bloquante
//!   (un chunk est abandonné pour un auditeur dont la file est pleine)
//! - [`Broadcaster`] : boucle de contrôle unique (Idle → Playing → Faulted → …)
//! - [`Station`] : contexte partagé, seul point d'accès pour la couche HTTP
//!
//! ## Exemple
//!
//! ```no_run
//! use pmobroadcast::{FfmpegEncoder, Station, StationSettings};
//! use pmometadata::DirectoryScanner;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> pmobroadcast::Result<()> {
//! let settings = StationSettings::default();
//! let encoder = Arc::new(FfmpegEncoder::new(settings.encoder.clone()));
//! let (station, broadcaster) =
//!     Station::open(settings, Arc::new(DirectoryScanner::new()), encoder).await?;
//!
//! let shutdown = CancellationToken::new();
//! let task = broadcaster.spawn(shutdown.clone());
//!
//! let mut listener = station.subscribe()?;
//! while let Some(chunk) = listener.recv().await {
//!     println!("chunk #{} ({} bytes)", chunk.seq(), chunk.len());
//! }
//!
//! shutdown.cancel();
//! let _ = task.await;
//! # Ok(())
//! # }
//! ```

mod broadcaster;
mod chunk;
mod error;
mod ffmpeg;
mod pipeline;
mod playlist;
mod registry;
mod settings;
mod station;

#[cfg(feature = "pmoconfig")]
mod config_ext;

#[cfg(feature = "pmoserver")]
pub mod pmoserver_ext;

pub use broadcaster::{Broadcaster, BroadcasterState};
pub use chunk::BroadcastChunk;
pub use error::{Error, Result};
pub use ffmpeg::FfmpegEncoder;
pub use pipeline::{
    ChunkWriter, Encoder, PipelineError, PipelineEvent, PipelineHandle, PipelineOutcome,
};
pub use playlist::{PlaylistManager, ReloadReport};
pub use registry::{DeliveryReport, Subscriber, SubscriberId, SubscriberInfo, SubscriberRegistry};
pub use settings::{EncoderSettings, StationSettings};
pub use station::{Station, StationStatus};

#[cfg(feature = "pmoconfig")]
pub use config_ext::StationConfigExt;

#[cfg(feature = "pmoserver")]
pub use pmoserver_ext::{RadioApiDoc, RadioExt};

pub use pmometadata::{AudioFormat, TrackDescriptor, TrackScanner};
