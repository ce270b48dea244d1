//! sprechfunk-voice – Session-Verwaltung fuer Sprechfunk
//!
//! Dieses Crate implementiert die Verbindungs-Seite des Systems:
//! - [`registry`] – VoiceManager: eine Session pro Gruppe
//! - [`session`] – VoiceSession: Lebenszyklus und Reconnect-Protokoll
//! - [`receive`] – VoiceReceiver: pro Teilnehmer isolierte Empfangs-Stroeme
//! - [`transport`] – Boundary-Traits zum Signaling/Media-Transport
//! - [`config`] – Zeitbudget der Ueberwachung
//!
//! ## Ablauf
//! ```text
//! VoiceManager::beitreten(kanal)
//!     -> Kanal aufloesen (Nicht-Sprachkanal: Fehler vor jedem Seiteneffekt)
//!     -> Transport verbinden, VoiceSession eintragen
//!     -> Ueberwachung verfolgt Status-Uebergaenge unbegrenzt
//! Session::abspielen(...)   -> StreamDispatcher (sprechfunk-audio)
//! Session::empfaenger()     -> VoiceReceiver::strom_erstellen(user)
//! ```

pub mod config;
pub mod receive;
pub mod registry;
pub mod session;
pub mod transport;

#[cfg(test)]
mod tests;

pub use config::SessionConfig;
pub use receive::{
    EmpfaengerEreignis, EmpfangsEnde, EmpfangsModus, EmpfangsOptionen, EmpfangsStrom,
    VoiceReceiver,
};
pub use registry::VoiceManager;
pub use session::{SessionEreignis, VoiceSession};
pub use transport::{
    ChannelInfo, ChannelResolver, EndeBedingung, Platform, SprechSignal, StatusUebergang,
    TransportConnection, TransportFactory, TransportSettings, TrennungsGrund, VerbindungsStatus,
    SCHLIESS_CODE_VERSCHOBEN,
};
