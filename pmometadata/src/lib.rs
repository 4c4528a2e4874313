//! Descripteurs de pistes et scan de répertoires musicaux.
//!
//! Cette crate fournit :
//! - [`TrackDescriptor`] : enregistrement immuable d'une piste (chemin, format, tags)
//! - [`AudioFormat`] : formats pris en charge (mp3, flac, ogg, wav, aac)
//! - [`TrackScanner`] : contrat de résolution d'un répertoire en liste ordonnée
//! - [`DirectoryScanner`] : implémentation basée sur `walkdir` et `lofty`
//!
//! # Exemple
//!
//! ```no_run
//! use pmometadata::{DirectoryScanner, TrackScanner};
//! use std::path::Path;
//!
//! let tracks = DirectoryScanner::default().scan(Path::new("/srv/music"));
//! for track in &tracks {
//!     println!("{} ({})", track.display_title(), track.format);
//! }
//! ```
//!
//! Un échec de lecture des tags ne fait jamais échouer le scan : la piste est
//! conservée avec des métadonnées vides et un titre dérivé du nom de fichier.

mod error;
mod scanner;
mod track;

pub use error::ScanError;
pub use scanner::{read_track, DirectoryScanner, TrackScanner};
pub use track::{AudioFormat, TrackDescriptor};
