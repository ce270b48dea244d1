//! Attrappen der Boundary-Traits
//!
//! Die Attrappen treiben nichts von selbst: Tests setzen Status-Uebergaenge,
//! Sprech-Signale und Frames von aussen und pruefen aufgezeichnete Befehle.

use crate::config::SessionConfig;
use crate::registry::VoiceManager;
use crate::session::VoiceSession;
use crate::transport::{
    ChannelInfo, ChannelResolver, EndeBedingung, Platform, SprechSignal, StatusUebergang,
    TransportConnection, TransportFactory, TransportSettings, VerbindungsStatus,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use sprechfunk_audio::codec::{DecoderFactory, OpusDecoder};
use sprechfunk_audio::error::{AudioError, AudioResult};
use sprechfunk_audio::player::{
    AudioPlayer, PlayerFactory, PlayerStatus, SpielerFehler, SpielerUebergang,
};
use sprechfunk_audio::resource::{
    AudioQuelle, PlayableResource, ResourceFactory, ResourceMeta, ResourceOptions,
};
use sprechfunk_audio::volume::{SmoothVolume, VolumeControl};
use sprechfunk_core::{ChannelId, GroupId, Result, SprechfunkError, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

// ---------------------------------------------------------------------------
// Kanal-Aufloeser
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockResolver {
    kanaele: Mutex<HashMap<ChannelId, ChannelInfo>>,
}

impl MockResolver {
    pub fn sprachkanal(&self, gruppe: GroupId) -> ChannelId {
        let id = ChannelId::new();
        self.kanaele.lock().insert(
            id,
            ChannelInfo {
                id,
                gruppe,
                sprachfaehig: true,
            },
        );
        id
    }

    pub fn textkanal(&self, gruppe: GroupId) -> ChannelId {
        let id = ChannelId::new();
        self.kanaele.lock().insert(
            id,
            ChannelInfo {
                id,
                gruppe,
                sprachfaehig: false,
            },
        );
        id
    }
}

impl ChannelResolver for MockResolver {
    fn aufloesen(&self, ziel: ChannelId) -> Result<ChannelInfo> {
        self.kanaele
            .lock()
            .get(&ziel)
            .copied()
            .ok_or_else(|| SprechfunkError::KanalNichtGefunden(ziel.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Transport-Verbindung
// ---------------------------------------------------------------------------

pub struct MockVerbindung {
    status_tx: watch::Sender<VerbindungsStatus>,
    uebergaenge_tx: broadcast::Sender<StatusUebergang>,
    sprech_tx: broadcast::Sender<SprechSignal>,
    debug_tx: broadcast::Sender<String>,
    fehler_tx: broadcast::Sender<String>,
    rejoin_aufrufe: AtomicU32,
    zerstoert: AtomicBool,
    getrennt: AtomicBool,
    pub gekoppelte_spieler: Mutex<Vec<Arc<dyn AudioPlayer>>>,
    pub abos: Mutex<Vec<(UserId, EndeBedingung, mpsc::Sender<Bytes>)>>,
}

impl MockVerbindung {
    pub fn new(anfang: VerbindungsStatus) -> Arc<Self> {
        let (status_tx, _) = watch::channel(anfang);
        let (uebergaenge_tx, _) = broadcast::channel(64);
        let (sprech_tx, _) = broadcast::channel(64);
        let (debug_tx, _) = broadcast::channel(64);
        let (fehler_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            status_tx,
            uebergaenge_tx,
            sprech_tx,
            debug_tx,
            fehler_tx,
            rejoin_aufrufe: AtomicU32::new(0),
            zerstoert: AtomicBool::new(false),
            getrennt: AtomicBool::new(false),
            gekoppelte_spieler: Mutex::new(Vec::new()),
            abos: Mutex::new(Vec::new()),
        })
    }

    /// Setzt den Status und meldet den Uebergang
    pub fn status_setzen(&self, neu: VerbindungsStatus) {
        let alt = *self.status_tx.borrow();
        self.status_tx.send_replace(neu);
        let _ = self.uebergaenge_tx.send(StatusUebergang { alt, neu });
    }

    pub fn sprechen_start(&self, user: UserId) {
        let _ = self.sprech_tx.send(SprechSignal::Start(user));
    }

    pub fn sprechen_ende(&self, user: UserId) {
        let _ = self.sprech_tx.send(SprechSignal::Ende(user));
    }

    /// Liefert einen Frame an alle Abonnements des Teilnehmers
    pub fn frame_liefern(&self, user: UserId, frame: &[u8]) {
        for (wer, _, tx) in self.abos.lock().iter() {
            if *wer == user {
                let _ = tx.try_send(Bytes::copy_from_slice(frame));
            }
        }
    }

    /// Beendet alle Abonnements des Teilnehmers (Stille-Luecke abgelaufen)
    pub fn abo_beenden(&self, user: UserId) {
        self.abos.lock().retain(|(wer, _, _)| *wer != user);
    }

    pub fn rejoins(&self) -> u32 {
        self.rejoin_aufrufe.load(Ordering::SeqCst)
    }

    pub fn ist_zerstoert(&self) -> bool {
        self.zerstoert.load(Ordering::SeqCst)
    }

    pub fn ist_getrennt(&self) -> bool {
        self.getrennt.load(Ordering::SeqCst)
    }

    pub fn debug_melden(&self, meldung: &str) {
        let _ = self.debug_tx.send(meldung.into());
    }

    pub fn fehler_melden(&self, meldung: &str) {
        let _ = self.fehler_tx.send(meldung.into());
    }
}

impl TransportConnection for MockVerbindung {
    fn status(&self) -> watch::Receiver<VerbindungsStatus> {
        self.status_tx.subscribe()
    }

    fn uebergaenge(&self) -> broadcast::Receiver<StatusUebergang> {
        self.uebergaenge_tx.subscribe()
    }

    fn rejoin(&self) {
        self.rejoin_aufrufe.fetch_add(1, Ordering::SeqCst);
    }

    fn trennen(&self) -> Result<()> {
        if self.zerstoert.load(Ordering::SeqCst) {
            return Err(SprechfunkError::Getrennt("Transport bereits weg".into()));
        }
        self.getrennt.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn zerstoeren(&self) -> Result<()> {
        if self.zerstoert.swap(true, Ordering::SeqCst) {
            return Err(SprechfunkError::Getrennt("doppelt zerstoert".into()));
        }
        self.status_setzen(VerbindungsStatus::Destroyed);
        Ok(())
    }

    fn ping_ms(&self) -> Option<u32> {
        Some(42)
    }

    fn spieler_koppeln(&self, spieler: Arc<dyn AudioPlayer>) {
        self.gekoppelte_spieler.lock().push(spieler);
    }

    fn sprech_signale(&self) -> broadcast::Receiver<SprechSignal> {
        self.sprech_tx.subscribe()
    }

    fn teilnehmer_abonnieren(
        &self,
        user: UserId,
        ende: EndeBedingung,
    ) -> Result<mpsc::Receiver<Bytes>> {
        let (tx, rx) = mpsc::channel(64);
        self.abos.lock().push((user, ende, tx));
        Ok(rx)
    }

    fn debug_meldungen(&self) -> broadcast::Receiver<String> {
        self.debug_tx.subscribe()
    }

    fn fehler_meldungen(&self) -> broadcast::Receiver<String> {
        self.fehler_tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Transport-Fabrik
// ---------------------------------------------------------------------------

pub struct MockTransportFabrik {
    pub verbindungen: Mutex<Vec<Arc<MockVerbindung>>>,
    pub handshakes: AtomicU32,
    anfangs_status: Mutex<VerbindungsStatus>,
}

impl MockTransportFabrik {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            verbindungen: Mutex::new(Vec::new()),
            handshakes: AtomicU32::new(0),
            anfangs_status: Mutex::new(VerbindungsStatus::Ready),
        })
    }

    pub fn anfangs_status_setzen(&self, status: VerbindungsStatus) {
        *self.anfangs_status.lock() = status;
    }

    pub fn letzte(&self) -> Arc<MockVerbindung> {
        Arc::clone(self.verbindungen.lock().last().expect("keine Verbindung"))
    }

    pub fn handshakes(&self) -> u32 {
        self.handshakes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportFactory for MockTransportFabrik {
    async fn verbinden(
        &self,
        _gruppe: GroupId,
        _kanal: ChannelId,
        _einstellungen: TransportSettings,
    ) -> Result<Arc<dyn TransportConnection>> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        let verbindung = MockVerbindung::new(*self.anfangs_status.lock());
        self.verbindungen.lock().push(Arc::clone(&verbindung));
        Ok(verbindung)
    }
}

// ---------------------------------------------------------------------------
// Spieler und Ressourcen
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpielerBefehl {
    Abspielen,
    Pausieren { stille: bool },
    Fortsetzen,
    Stoppen { erzwingen: bool },
}

pub struct MockSpieler {
    status: Mutex<PlayerStatus>,
    uebergaenge_tx: broadcast::Sender<SpielerUebergang>,
    fehler_tx: broadcast::Sender<SpielerFehler>,
    pub protokoll: Mutex<Vec<SpielerBefehl>>,
}

impl MockSpieler {
    pub fn new() -> Arc<Self> {
        let (uebergaenge_tx, _) = broadcast::channel(64);
        let (fehler_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            status: Mutex::new(PlayerStatus::Idle),
            uebergaenge_tx,
            fehler_tx,
            protokoll: Mutex::new(Vec::new()),
        })
    }
}

impl AudioPlayer for MockSpieler {
    fn status(&self) -> PlayerStatus {
        *self.status.lock()
    }

    fn uebergaenge(&self) -> broadcast::Receiver<SpielerUebergang> {
        self.uebergaenge_tx.subscribe()
    }

    fn fehler(&self) -> broadcast::Receiver<SpielerFehler> {
        self.fehler_tx.subscribe()
    }

    fn abspielen(&self, _ressource: Arc<dyn PlayableResource>) {
        self.protokoll.lock().push(SpielerBefehl::Abspielen);
        *self.status.lock() = PlayerStatus::Buffering;
    }

    fn pausieren(&self, stille: bool) {
        self.protokoll.lock().push(SpielerBefehl::Pausieren { stille });
    }

    fn fortsetzen(&self) {
        self.protokoll.lock().push(SpielerBefehl::Fortsetzen);
    }

    fn stoppen(&self, erzwingen: bool) {
        self.protokoll.lock().push(SpielerBefehl::Stoppen { erzwingen });
        *self.status.lock() = PlayerStatus::Idle;
    }

    fn spiel_dauer_ms(&self) -> u64 {
        0
    }
}

pub struct MockSpielerFabrik {
    pub erstellt: Mutex<Vec<Arc<MockSpieler>>>,
}

impl MockSpielerFabrik {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            erstellt: Mutex::new(Vec::new()),
        })
    }

    pub fn letzter(&self) -> Arc<MockSpieler> {
        Arc::clone(self.erstellt.lock().last().expect("kein Spieler"))
    }
}

impl PlayerFactory for MockSpielerFabrik {
    fn erstellen(&self) -> Arc<dyn AudioPlayer> {
        let spieler = MockSpieler::new();
        self.erstellt.lock().push(Arc::clone(&spieler));
        spieler
    }
}

pub struct MockRessource {
    meta: ResourceMeta,
    regler: Arc<SmoothVolume>,
}

impl PlayableResource for MockRessource {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }

    fn lautstaerke(&self) -> Option<Arc<dyn VolumeControl>> {
        Some(Arc::clone(&self.regler) as Arc<dyn VolumeControl>)
    }

    fn spiel_dauer_ms(&self) -> u64 {
        0
    }
}

#[derive(Default)]
pub struct MockRessourcenFabrik;

impl ResourceFactory for MockRessourcenFabrik {
    fn erstellen(
        &self,
        _quelle: AudioQuelle,
        optionen: ResourceOptions,
    ) -> AudioResult<Arc<dyn PlayableResource>> {
        Ok(Arc::new(MockRessource {
            meta: optionen.meta,
            regler: Arc::new(SmoothVolume::default()),
        }))
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Markiert dekodierte Frames mit einem Praefix statt echtem Opus
struct MockDecoder;

impl OpusDecoder for MockDecoder {
    fn dekodieren(&mut self, frame: &[u8]) -> AudioResult<Bytes> {
        if frame.is_empty() {
            return Err(AudioError::CodecFehler("leerer Frame".into()));
        }
        let mut pcm = BytesMut::from(&b"pcm:"[..]);
        pcm.extend_from_slice(frame);
        Ok(pcm.freeze())
    }
}

#[derive(Default)]
pub struct MockDecoderFabrik;

impl DecoderFactory for MockDecoderFabrik {
    fn erstellen(&self) -> AudioResult<Box<dyn OpusDecoder>> {
        Ok(Box::new(MockDecoder))
    }
}

// ---------------------------------------------------------------------------
// Test-Umgebung
// ---------------------------------------------------------------------------

pub struct TestUmgebung {
    pub manager: VoiceManager,
    pub aufloeser: Arc<MockResolver>,
    pub transport: Arc<MockTransportFabrik>,
    pub spieler_fabrik: Arc<MockSpielerFabrik>,
}

pub fn umgebung() -> TestUmgebung {
    umgebung_mit(SessionConfig::default())
}

pub fn umgebung_mit(konfig: SessionConfig) -> TestUmgebung {
    let aufloeser = Arc::new(MockResolver::default());
    let transport = MockTransportFabrik::new();
    let spieler_fabrik = MockSpielerFabrik::new();
    let plattform = Arc::new(Platform {
        kanaele: Arc::clone(&aufloeser) as Arc<dyn ChannelResolver>,
        transport: Arc::clone(&transport) as Arc<dyn TransportFactory>,
        spieler: Arc::clone(&spieler_fabrik) as Arc<dyn PlayerFactory>,
        ressourcen: Arc::new(MockRessourcenFabrik) as Arc<dyn ResourceFactory>,
        decoder: Arc::new(MockDecoderFabrik) as Arc<dyn DecoderFactory>,
    });
    let manager = VoiceManager::new(plattform, konfig).expect("gueltige Konfiguration");
    TestUmgebung {
        manager,
        aufloeser,
        transport,
        spieler_fabrik,
    }
}

/// Tritt einem frischen Sprachkanal bei und liefert Session + Verbindung
pub async fn session_aufbauen(
    umgebung: &TestUmgebung,
) -> (GroupId, Arc<VoiceSession>, Arc<MockVerbindung>) {
    let gruppe = GroupId::new();
    let kanal = umgebung.aufloeser.sprachkanal(gruppe);
    let session = umgebung.manager.beitreten(kanal).await.expect("Beitritt");
    let verbindung = umgebung.transport.letzte();
    (gruppe, session, verbindung)
}

/// Zaehlt `Getrennt`-Ereignisse einer Session
pub fn getrennt_zaehler(session: &VoiceSession) -> Arc<AtomicU32> {
    let zaehler = Arc::new(AtomicU32::new(0));
    let z = Arc::clone(&zaehler);
    session.ereignisse().anmelden("getrennt-zaehler", move |e| {
        if matches!(e, crate::session::SessionEreignis::Getrennt) {
            z.fetch_add(1, Ordering::SeqCst);
        }
    });
    zaehler
}

/// Laesst die aktuelle Task-Runde durchlaufen damit Pumpen verarbeiten
pub async fn pumpen_lassen() {
    for _ in 0..25 {
        tokio::task::yield_now().await;
    }
}
