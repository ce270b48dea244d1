//! Abspielbare Ressourcen und ihre Erzeugung
//!
//! Eine Ressource entsteht pro Abspiel-Anfrage, traegt eine eindeutige
//! Nonce zur Korrelation asynchroner Lebenszyklus-Ereignisse und wird nie
//! zwischen Dispatchern geteilt. Die konkrete Erzeugung (Demuxen,
//! Transkodieren, Stille-Polster) liegt hinter dem [`ResourceFactory`]-Trait
//! beim Transport-Kollaborateur.

use crate::error::AudioResult;
use crate::volume::VolumeControl;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::AsyncRead;
use uuid::Uuid;

/// Standard-Anzahl Stille-Frames am Ressourcen-Ende
pub const STANDARD_STILLE_RAHMEN: u8 = 5;

// ---------------------------------------------------------------------------
// Stream-Typ
// ---------------------------------------------------------------------------

/// Eingabe-Typ einer Audio-Quelle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamTyp {
    /// Beliebige Eingabe, wird vom Kollaborateur transkodiert
    Arbitrary,
    /// Rohes s16le-PCM
    Raw,
    /// Opus in Ogg-Container
    OggOpus,
    /// Opus in WebM-Container
    WebmOpus,
    /// Nackte Opus-Frames
    Opus,
}

impl StreamTyp {
    /// Loest eine Typ-Kennung auf, inklusive Alt-Aliasen
    ///
    /// Die Alias-Tabelle (`"converted"` -> Raw, `"unknown"` -> Arbitrary)
    /// stammt aus einer aelteren Typ-Aufzaehlung und ist bewusst fix –
    /// keine weiteren Aliase ergaenzen.
    pub fn aus_kennung(kennung: &str) -> Option<Self> {
        match kennung {
            "arbitrary" => Some(Self::Arbitrary),
            "raw" => Some(Self::Raw),
            "ogg/opus" => Some(Self::OggOpus),
            "webm/opus" => Some(Self::WebmOpus),
            "opus" => Some(Self::Opus),
            // Alt-Aliase
            "converted" => Some(Self::Raw),
            "unknown" => Some(Self::Arbitrary),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Metadaten
// ---------------------------------------------------------------------------

/// Metadaten einer Ressource
///
/// Die Nonce korreliert Spieler-Uebergaenge mit der Ressource die sie
/// ausgeloest hat; `daten` ist die opake Nutzlast des Aufrufers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMeta {
    pub nonce: Uuid,
    pub daten: serde_json::Value,
}

impl ResourceMeta {
    /// Erstellt Metadaten mit frischer Nonce
    pub fn new(daten: serde_json::Value) -> Self {
        Self {
            nonce: Uuid::new_v4(),
            daten,
        }
    }
}

// ---------------------------------------------------------------------------
// Quelle und Optionen
// ---------------------------------------------------------------------------

/// Eingabe-Quelle fuer eine Ressource
pub enum AudioQuelle {
    /// Byte-Strom (Datei, Pipe, Netzwerk)
    Leser(Box<dyn AsyncRead + Send + Unpin>),
    /// URL, vom Kollaborateur aufzuloesen
    Url(String),
}

impl std::fmt::Debug for AudioQuelle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leser(_) => f.write_str("AudioQuelle::Leser(..)"),
            Self::Url(url) => write!(f, "AudioQuelle::Url({url})"),
        }
    }
}

/// Optionen fuer die Ressourcen-Erzeugung
#[derive(Debug, Clone)]
pub struct ResourceOptions {
    /// Eingabe-Typ der Quelle
    pub eingabe_typ: StreamTyp,
    /// Inline-Lautstaerke-Regler anlegen?
    pub inline_lautstaerke: bool,
    /// Stille-Frames am Ende (gegen abgeschnittene Ausklaenge)
    pub stille_rahmen: u8,
    /// Metadaten inklusive Nonce
    pub meta: ResourceMeta,
}

impl ResourceOptions {
    /// Standard-Optionen fuer die gegebenen Metadaten
    pub fn new(meta: ResourceMeta) -> Self {
        Self {
            eingabe_typ: StreamTyp::Arbitrary,
            inline_lautstaerke: true,
            stille_rahmen: STANDARD_STILLE_RAHMEN,
            meta,
        }
    }
}

// ---------------------------------------------------------------------------
// Ressource und Fabrik
// ---------------------------------------------------------------------------

/// Abspielbare Ressource
///
/// Vom [`ResourceFactory`] erzeugt; der Lautstaerke-Regler fehlt wenn die
/// Ressource ohne Inline-Lautstaerke erstellt wurde.
pub trait PlayableResource: Send + Sync {
    /// Metadaten inklusive Nonce
    fn meta(&self) -> &ResourceMeta;

    /// Lautstaerke-Regler, falls vorhanden
    fn lautstaerke(&self) -> Option<Arc<dyn VolumeControl>>;

    /// Bisher abgespielte Dauer in Millisekunden
    fn spiel_dauer_ms(&self) -> u64;
}

/// Erzeugt abspielbare Ressourcen aus Quellen
pub trait ResourceFactory: Send + Sync {
    fn erstellen(
        &self,
        quelle: AudioQuelle,
        optionen: ResourceOptions,
    ) -> AudioResult<Arc<dyn PlayableResource>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kennungen_aufloesen() {
        assert_eq!(StreamTyp::aus_kennung("raw"), Some(StreamTyp::Raw));
        assert_eq!(StreamTyp::aus_kennung("opus"), Some(StreamTyp::Opus));
        assert_eq!(StreamTyp::aus_kennung("ogg/opus"), Some(StreamTyp::OggOpus));
        assert_eq!(StreamTyp::aus_kennung("webm/opus"), Some(StreamTyp::WebmOpus));
        assert_eq!(StreamTyp::aus_kennung("arbitrary"), Some(StreamTyp::Arbitrary));
    }

    #[test]
    fn alt_aliase_bleiben_erhalten() {
        assert_eq!(StreamTyp::aus_kennung("converted"), Some(StreamTyp::Raw));
        assert_eq!(StreamTyp::aus_kennung("unknown"), Some(StreamTyp::Arbitrary));
    }

    #[test]
    fn unbekannte_kennung_ist_none() {
        assert_eq!(StreamTyp::aus_kennung("mp3"), None);
        assert_eq!(StreamTyp::aus_kennung(""), None);
    }

    #[test]
    fn meta_nonce_eindeutig() {
        let a = ResourceMeta::new(serde_json::Value::Null);
        let b = ResourceMeta::new(serde_json::Value::Null);
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn standard_optionen() {
        let optionen = ResourceOptions::new(ResourceMeta::new(serde_json::Value::Null));
        assert!(optionen.inline_lautstaerke);
        assert_eq!(optionen.stille_rahmen, STANDARD_STILLE_RAHMEN);
        assert_eq!(optionen.eingabe_typ, StreamTyp::Arbitrary);
    }
}
