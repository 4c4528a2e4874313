//! Types d'erreurs pour pmobroadcast

/// Erreurs remontées aux appelants de la station.
///
/// Les erreurs d'encodage d'une piste ne figurent pas ici : elles sont
/// absorbées par le Broadcaster (voir [`crate::PipelineOutcome`]).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Le nombre maximal d'auditeurs est atteint ; la connexion doit être refusée.
    #[error("listener capacity exceeded ({max} listeners)")]
    CapacityExceeded { max: usize },

    /// La station est arrêtée, plus aucun abonnement n'est accepté.
    #[error("station is shut down")]
    Closed,

    /// La tâche de scan du répertoire musical a été interrompue.
    #[error("music directory scan failed: {0}")]
    Scan(#[from] tokio::task::JoinError),
}

/// Type Result spécialisé pour pmobroadcast
pub type Result<T> = std::result::Result<T, Error>;
