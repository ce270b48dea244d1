//! Spieler-Boundary – Status, Uebergaenge und Traits
//!
//! Der eigentliche Audio-Spieler (Frame-Taktung, Stille-Polster, Encoder)
//! gehoert dem Transport-Kollaborateur. Die Dispatch-Schicht sieht nur
//! Status-Uebergaenge und eine schmale Steuer-API.

use crate::resource::{PlayableResource, ResourceMeta};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Status eines Audio-Spielers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    /// Nichts zu spielen
    Idle,
    /// Ressource wird vorgepuffert
    Buffering,
    /// Frames werden gesendet
    Playing,
    /// Vom Benutzer pausiert
    Paused,
    /// Automatisch pausiert (kein Abnehmer)
    AutoPaused,
}

/// Ein beobachteter Spieler-Uebergang
///
/// `meta` gehoert zu der Ressource die den Uebergang ausgeloest hat – beim
/// Uebergang nach Idle also zur gerade beendeten Ressource.
#[derive(Debug, Clone)]
pub struct SpielerUebergang {
    pub alt: PlayerStatus,
    pub neu: PlayerStatus,
    pub meta: Option<ResourceMeta>,
}

/// Vom Spieler oder der Ressource gemeldeter Fehler
#[derive(Debug, Clone)]
pub struct SpielerFehler {
    pub meldung: String,
    pub meta: Option<ResourceMeta>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Audio-Spieler des Transport-Kollaborateurs
pub trait AudioPlayer: Send + Sync {
    /// Aktueller Status
    fn status(&self) -> PlayerStatus;

    /// Abonniert den Uebergangs-Feed
    fn uebergaenge(&self) -> broadcast::Receiver<SpielerUebergang>;

    /// Abonniert den Fehler-Feed
    fn fehler(&self) -> broadcast::Receiver<SpielerFehler>;

    /// Startet die Wiedergabe einer Ressource
    fn abspielen(&self, ressource: Arc<dyn PlayableResource>);

    /// Pausiert; mit `stille` werden weiter Stille-Frames gesendet
    fn pausieren(&self, stille: bool);

    /// Setzt eine pausierte Wiedergabe fort
    fn fortsetzen(&self);

    /// Stoppt; `erzwingen` verwirft die Ausklang-Frist
    fn stoppen(&self, erzwingen: bool);

    /// Wiedergabedauer der laufenden Ressource in Millisekunden
    fn spiel_dauer_ms(&self) -> u64;
}

/// Erzeugt Audio-Spieler
pub trait PlayerFactory: Send + Sync {
    fn erstellen(&self) -> Arc<dyn AudioPlayer>;
}
