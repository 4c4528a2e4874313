//! Types d'erreurs pour pmometadata

use std::path::PathBuf;

/// Raisons pour lesquelles un fichier est écarté d'un scan.
///
/// Ces erreurs ne remontent jamais de [`crate::TrackScanner::scan`] : elles sont
/// journalisées en warning et le scan continue.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("unsupported file type: {0}")]
    Unsupported(PathBuf),

    #[error("unreadable file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
}
