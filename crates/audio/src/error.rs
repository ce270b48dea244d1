//! Fehlertypen fuer die Audio-Dispatch-Schicht

use thiserror::Error;

/// Alle moeglichen Fehler der Audio-Dispatch-Schicht
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Ressource konnte nicht erstellt werden: {0}")]
    RessourceFehlgeschlagen(String),

    #[error("Codec-Fehler: {0}")]
    CodecFehler(String),

    #[error("Keine Ressource aktiv")]
    KeineRessource,

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unerwarteter Fehler: {0}")]
    Anyhow(#[from] anyhow::Error),
}

pub type AudioResult<T> = Result<T, AudioError>;
