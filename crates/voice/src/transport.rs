//! Transport-Boundary – Status, Signale und Kollaborateur-Traits
//!
//! Der Signaling/Media-Transport selbst (Verbinden, Verschluesselung,
//! Jitter-Puffer, Wire-Format) liegt ausserhalb dieses Crates. Hier stehen
//! nur die Vertraege auf die sich die Session-Verwaltung stuetzt; die
//! konkrete Implementierung liefert die Plattform-Anbindung.

use async_trait::async_trait;
use bytes::Bytes;
use sprechfunk_audio::codec::DecoderFactory;
use sprechfunk_audio::player::{AudioPlayer, PlayerFactory};
use sprechfunk_audio::resource::ResourceFactory;
use sprechfunk_core::{ChannelId, GroupId, Result, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

/// Websocket-Close-Code: Session wurde extern verschoben oder getrennt
/// (z.B. von einem Moderator in einen anderen Raum gezogen)
pub const SCHLIESS_CODE_VERSCHOBEN: u16 = 4014;

// ---------------------------------------------------------------------------
// Status und Signale
// ---------------------------------------------------------------------------

/// Grund einer beobachteten Trennung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrennungsGrund {
    /// Gateway hat den Websocket geschlossen
    WebsocketGeschlossen { schliess_code: u16 },
    /// Plattform-Adapter nicht mehr verfuegbar
    AdapterNichtVerfuegbar,
    /// Media-Endpunkt wurde entfernt
    EndpunktEntfernt,
    /// Manuell getrennt
    Manuell,
}

/// Vom Transport gemeldeter Verbindungs-Status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbindungsStatus {
    Signalling,
    Connecting,
    Ready,
    Disconnected { grund: TrennungsGrund },
    Destroyed,
}

/// Ein beobachteter Status-Uebergang
#[derive(Debug, Clone, Copy)]
pub struct StatusUebergang {
    pub alt: VerbindungsStatus,
    pub neu: VerbindungsStatus,
}

/// Sprech-Signal eines Teilnehmers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SprechSignal {
    Start(UserId),
    Ende(UserId),
}

/// Ende-Bedingung eines Teilnehmer-Abonnements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndeBedingung {
    /// Strom endet nach einer Stille-Luecke
    NachStille(Duration),
    /// Strom endet nur auf explizites Beenden
    Manuell,
}

/// Einstellungen fuer den Verbindungsaufbau
#[derive(Debug, Clone, Copy)]
pub struct TransportSettings {
    pub selbst_taub: bool,
    pub selbst_stumm: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            selbst_taub: true,
            selbst_stumm: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Kanal-Aufloesung
// ---------------------------------------------------------------------------

/// Aufgeloester Kanal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub gruppe: GroupId,
    /// Nur sprachfaehige Kanaele sind beitretbar
    pub sprachfaehig: bool,
}

/// Loest Anwendungs-Kanalreferenzen zu Kanal-Infos auf
pub trait ChannelResolver: Send + Sync {
    fn aufloesen(&self, ziel: ChannelId) -> Result<ChannelInfo>;
}

// ---------------------------------------------------------------------------
// Transport-Verbindung
// ---------------------------------------------------------------------------

/// Handle auf eine Signaling/Media-Verbindung
///
/// Status-Uebergaenge kommen in Ankunftsreihenfolge ueber `uebergaenge`;
/// `status` liefert zusaetzlich den jeweils aktuellen Stand fuer begrenzte
/// Wartevorgaenge.
pub trait TransportConnection: Send + Sync {
    /// Beobachter auf den aktuellen Status
    fn status(&self) -> watch::Receiver<VerbindungsStatus>;

    /// Abonniert den Uebergangs-Feed
    fn uebergaenge(&self) -> broadcast::Receiver<StatusUebergang>;

    /// Fordert den eingebauten Rejoin des Transports an
    fn rejoin(&self);

    /// Trennt die Verbindung geordnet
    fn trennen(&self) -> Result<()>;

    /// Zerstoert die Verbindung hart
    fn zerstoeren(&self) -> Result<()>;

    /// Letzte gemessene Latenz in Millisekunden
    fn ping_ms(&self) -> Option<u32>;

    /// Koppelt einen Audio-Spieler an den Sendepfad
    fn spieler_koppeln(&self, spieler: Arc<dyn AudioPlayer>);

    /// Abonniert die Sprech-Signale aller Teilnehmer
    fn sprech_signale(&self) -> broadcast::Receiver<SprechSignal>;

    /// Abonniert die rohen Opus-Frames eines Teilnehmers
    fn teilnehmer_abonnieren(
        &self,
        user: UserId,
        ende: EndeBedingung,
    ) -> Result<mpsc::Receiver<Bytes>>;

    /// Informative Meldungen des Transports
    fn debug_meldungen(&self) -> broadcast::Receiver<String>;

    /// Fehler-Meldungen des Transports
    fn fehler_meldungen(&self) -> broadcast::Receiver<String>;
}

/// Baut Transport-Verbindungen auf
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn verbinden(
        &self,
        gruppe: GroupId,
        kanal: ChannelId,
        einstellungen: TransportSettings,
    ) -> Result<Arc<dyn TransportConnection>>;
}

// ---------------------------------------------------------------------------
// Plattform-Buendel
// ---------------------------------------------------------------------------

/// Alle Boundary-Kollaborateure gebuendelt
///
/// Wird einmal beim Erstellen der Verwaltung uebergeben und von Sessions,
/// Dispatchern und Empfaengern geteilt.
pub struct Platform {
    pub kanaele: Arc<dyn ChannelResolver>,
    pub transport: Arc<dyn TransportFactory>,
    pub spieler: Arc<dyn PlayerFactory>,
    pub ressourcen: Arc<dyn ResourceFactory>,
    pub decoder: Arc<dyn DecoderFactory>,
}
