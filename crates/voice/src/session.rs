//! VoiceSession – Lebenszyklus einer Signaling/Media-Verbindung
//!
//! Die Session besitzt genau einen Dispatcher (lazy) und eine
//! Empfangs-Weiche (eifrig) und ueberwacht die Status-Uebergaenge ihrer
//! Transport-Verbindung:
//!
//! - Trennung mit Close-Code 4014 (verschoben/gekickt): kurz begrenzt auf
//!   `Connecting` warten statt generisch neu zu verbinden – ein
//!   freiwilliger Rejoin kommt auf diesem Pfad nie.
//! - Generische Trennung: Backoff `(Versuche+1) * Schritt`, dann Rejoin,
//!   bis das Versuchs-Budget erschoepft ist.
//! - `Connecting`/`Signalling`: begrenzt auf `Ready` warten; die
//!   Bereit-Sperre verhindert dass zwei ueberlappende Wartevorgaenge beide
//!   um die Zerstoerung der Session rennen.
//!
//! Begrenzte Wartevorgaenge laufen als eigene Tasks mit Weak-Referenzen –
//! die Ueberwachung verarbeitet waehrenddessen weitere Uebergaenge.

use crate::config::SessionConfig;
use crate::receive::VoiceReceiver;
use crate::registry::ManagerInner;
use crate::transport::{
    ChannelInfo, Platform, StatusUebergang, TransportConnection, TrennungsGrund,
    VerbindungsStatus, SCHLIESS_CODE_VERSCHOBEN,
};
use parking_lot::Mutex;
use sprechfunk_audio::dispatch::{PlayOptions, StreamDispatcher};
use sprechfunk_audio::resource::AudioQuelle;
use sprechfunk_core::event::EventSender;
use sprechfunk_core::{GroupId, Result, SprechfunkError};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Ereignisse einer Session
#[derive(Debug, Clone)]
pub enum SessionEreignis {
    /// Session ist endgueltig getrennt und aus der Verwaltung entfernt
    Getrennt,
    /// Vom Transport gemeldeter Fehler
    Fehler { meldung: String },
    /// Informative Meldung (Close-Codes, Rejoin-Versuche)
    Debug { meldung: String },
}

// ---------------------------------------------------------------------------
// VoiceSession
// ---------------------------------------------------------------------------

/// Stateful-Supervisor einer Signaling/Media-Verbindung fuer eine Gruppe
///
/// Der Verbindungs-Handle darf gewechselt werden (Kanal-Wechsel); die
/// Session-Identitaet sowie Dispatcher und Empfangs-Weiche ueberleben den
/// Wechsel.
pub struct VoiceSession {
    inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    verwaltung: Weak<ManagerInner>,
    plattform: Arc<Platform>,
    konfig: SessionConfig,
    kanal: Mutex<ChannelInfo>,
    /// Geteilter Verbindungs-Slot; die Empfangs-Weiche haelt denselben Arc
    verbindung: Arc<Mutex<Arc<dyn TransportConnection>>>,
    /// Hoechstens ein Dispatcher pro Session, lazy beim ersten Abspielen
    dispatcher: Mutex<Option<Arc<StreamDispatcher>>>,
    empfaenger: VoiceReceiver,
    /// Session-eigener Rejoin-Zaehler; `Ready` setzt ihn zurueck
    rejoin_versuche: AtomicU32,
    /// Reentranz-Sperre um den Bereit-Wartevorgang
    bereit_sperre: AtomicBool,
    /// Abbau ist einmalig; weitere Versuche sind No-ops
    abgebaut: AtomicBool,
    ereignisse: EventSender<SessionEreignis>,
    ueberwachung: Mutex<Option<JoinHandle<()>>>,
}

impl VoiceSession {
    pub(crate) fn new(
        verwaltung: Weak<ManagerInner>,
        plattform: Arc<Platform>,
        konfig: SessionConfig,
        kanal: ChannelInfo,
        verbindung: Arc<dyn TransportConnection>,
    ) -> Arc<Self> {
        let verbindungs_slot = Arc::new(Mutex::new(verbindung));
        let empfaenger = VoiceReceiver::new(
            Arc::clone(&verbindungs_slot),
            Arc::clone(&plattform.decoder),
            konfig.stille_luecke,
        );

        let inner = Arc::new(SessionInner {
            verwaltung,
            plattform,
            konfig,
            kanal: Mutex::new(kanal),
            verbindung: verbindungs_slot,
            dispatcher: Mutex::new(None),
            empfaenger,
            rejoin_versuche: AtomicU32::new(0),
            bereit_sperre: AtomicBool::new(false),
            abgebaut: AtomicBool::new(false),
            ereignisse: EventSender::new(),
            ueberwachung: Mutex::new(None),
        });
        ueberwachung_starten(&inner);

        Arc::new(Self { inner })
    }

    /// Event-Sender der Session
    pub fn ereignisse(&self) -> &EventSender<SessionEreignis> {
        &self.inner.ereignisse
    }

    /// Gruppe zu der diese Session gehoert
    pub fn gruppe(&self) -> GroupId {
        self.inner.kanal.lock().gruppe
    }

    /// Aktuell verbundener Kanal
    pub fn kanal(&self) -> ChannelInfo {
        *self.inner.kanal.lock()
    }

    /// Aktueller Transport-Status
    pub fn status(&self) -> VerbindungsStatus {
        *self.inner.verbindung.lock().status().borrow()
    }

    /// Letzte gemessene Latenz
    pub fn ping_ms(&self) -> Option<u32> {
        self.inner.verbindung.lock().ping_ms()
    }

    /// Empfangs-Weiche dieser Session
    pub fn empfaenger(&self) -> &VoiceReceiver {
        &self.inner.empfaenger
    }

    /// Dispatcher dieser Session; wird beim ersten Zugriff erstellt und an
    /// die aktuelle Verbindung gekoppelt
    pub fn dispatcher(&self) -> Arc<StreamDispatcher> {
        let mut slot = self.inner.dispatcher.lock();
        if let Some(dispatcher) = slot.as_ref() {
            return Arc::clone(dispatcher);
        }
        let spieler = self.inner.plattform.spieler.erstellen();
        self.inner
            .verbindung
            .lock()
            .spieler_koppeln(Arc::clone(&spieler));
        let dispatcher = Arc::new(StreamDispatcher::new(
            spieler,
            Arc::clone(&self.inner.plattform.ressourcen),
        ));
        *slot = Some(Arc::clone(&dispatcher));
        debug!(gruppe = %self.inner.kanal.lock().gruppe, "Dispatcher erstellt");
        dispatcher
    }

    /// Startet die Wiedergabe einer Quelle und gibt den Dispatcher zurueck
    pub fn abspielen(
        &self,
        quelle: AudioQuelle,
        optionen: PlayOptions,
    ) -> Result<Arc<StreamDispatcher>> {
        let dispatcher = self.dispatcher();
        dispatcher
            .abspielen(quelle, optionen)
            .map_err(|e| SprechfunkError::Audio(e.to_string()))?;
        Ok(dispatcher)
    }

    /// Wartet begrenzt darauf dass die Verbindung `Ready` erreicht
    pub async fn auf_bereit_warten(&self, zeitlimit: Duration) -> Result<()> {
        let mut status = self.inner.verbindung.lock().status();
        let ergebnis = tokio::time::timeout(
            zeitlimit,
            status.wait_for(|s| *s == VerbindungsStatus::Ready),
        )
        .await;
        match ergebnis {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(SprechfunkError::Getrennt(
                "Transport wurde vor Bereitschaft geschlossen".into(),
            )),
            Err(_) => Err(SprechfunkError::Zeitlimit(format!(
                "Verbindung nicht bereit nach {zeitlimit:?}"
            ))),
        }
    }

    /// Trennt die Session geordnet
    ///
    /// Horcher von Dispatcher und Empfangs-Weiche werden getrennt, dann
    /// wird eine geordnete Transport-Trennung angefordert. Fehler eines
    /// bereits verschwundenen Transports werden geschluckt.
    pub fn trennen(&self) {
        if let Some(dispatcher) = self.inner.dispatcher.lock().as_ref() {
            dispatcher.aufraeumen();
        }
        self.inner.empfaenger.aufraeumen();
        if let Err(e) = self.inner.verbindung.lock().trennen() {
            trace!("Trennen eines abwesenden Transports: {e}");
        }
    }

    /// Zerstoert die Session hart
    ///
    /// Entfernt sie aus der Verwaltung, trennt Horcher und zerstoert den
    /// Transport. Doppelte Zerstoerung ist ein No-op.
    pub fn zerstoeren(&self) {
        if let Some(dispatcher) = self.inner.dispatcher.lock().as_ref() {
            dispatcher.aufraeumen();
        }
        self.inner.empfaenger.aufraeumen();
        self.inner.abbauen(false);
    }

    /// Wechselt Kanal und Verbindungs-Handle unter Erhalt der Session
    ///
    /// Die alte Ueberwachung endet bevor der alte Transport zerstoert wird,
    /// damit dessen `Destroyed`-Uebergang die laufende Wiedergabe nicht
    /// stoppt. Dispatcher und Empfangs-Weiche bleiben dieselben Objekte.
    pub(crate) async fn verbindung_wechseln(
        &self,
        kanal: ChannelInfo,
        neue: Arc<dyn TransportConnection>,
    ) -> Result<()> {
        if let Some(ueberwachung) = self.inner.ueberwachung.lock().take() {
            ueberwachung.abort();
        }

        let alte = {
            let mut slot = self.inner.verbindung.lock();
            let alte = Arc::clone(&*slot);
            *slot = neue;
            alte
        };
        if let Err(e) = alte.zerstoeren() {
            trace!("Zerstoeren des abgeloesten Transports: {e}");
        }
        *self.inner.kanal.lock() = kanal;
        self.inner.rejoin_versuche.store(0, Ordering::SeqCst);

        // Bestehenden Spieler an die neue Verbindung koppeln – die laufende
        // Wiedergabe wechselt mit
        let spieler = self
            .inner
            .dispatcher
            .lock()
            .as_ref()
            .map(|d| Arc::clone(d.spieler()));
        if let Some(spieler) = spieler {
            self.inner.verbindung.lock().spieler_koppeln(spieler);
        }

        self.inner.empfaenger.neu_koppeln();
        ueberwachung_starten(&self.inner);

        self.auf_bereit_warten(self.inner.konfig.bereit_zeitlimit).await
    }

    #[cfg(test)]
    pub(crate) fn rejoin_stand(&self) -> u32 {
        self.inner.rejoin_versuche.load(Ordering::SeqCst)
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(ueberwachung) = self.ueberwachung.lock().take() {
            ueberwachung.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Ueberwachung
// ---------------------------------------------------------------------------

/// Startet die Ueberwachungs-Task fuer die aktuelle Verbindung
pub(crate) fn ueberwachung_starten(inner: &Arc<SessionInner>) {
    let (uebergaenge, debug_rx, fehler_rx) = {
        let verbindung = inner.verbindung.lock();
        (
            verbindung.uebergaenge(),
            verbindung.debug_meldungen(),
            verbindung.fehler_meldungen(),
        )
    };
    let task = tokio::spawn(ueberwachen(
        Arc::downgrade(inner),
        uebergaenge,
        debug_rx,
        fehler_rx,
    ));
    *inner.ueberwachung.lock() = Some(task);
}

/// Verarbeitet Status-Uebergaenge und leitet Debug/Fehler-Meldungen weiter
async fn ueberwachen(
    schwach: Weak<SessionInner>,
    mut uebergaenge: broadcast::Receiver<StatusUebergang>,
    mut debug_rx: broadcast::Receiver<String>,
    mut fehler_rx: broadcast::Receiver<String>,
) {
    loop {
        tokio::select! {
            uebergang = uebergaenge.recv() => match uebergang {
                Ok(u) => {
                    let Some(inner) = schwach.upgrade() else { break };
                    inner.uebergang_behandeln(&u);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    trace!(verpasst = n, "Status-Uebergaenge verpasst");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            meldung = debug_rx.recv() => match meldung {
                Ok(meldung) => {
                    let Some(inner) = schwach.upgrade() else { break };
                    inner.ereignisse.senden(&SessionEreignis::Debug { meldung });
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            meldung = fehler_rx.recv() => match meldung {
                Ok(meldung) => {
                    let Some(inner) = schwach.upgrade() else { break };
                    inner.ereignisse.senden(&SessionEreignis::Fehler { meldung });
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

impl SessionInner {
    /// Reagiert auf einen Status-Uebergang der aktuellen Verbindung
    fn uebergang_behandeln(self: &Arc<Self>, uebergang: &StatusUebergang) {
        match uebergang.neu {
            VerbindungsStatus::Disconnected { grund } => {
                self.ereignisse.senden(&SessionEreignis::Debug {
                    meldung: format!("Verbindung getrennt: {grund:?}"),
                });
                let verschoben = matches!(
                    grund,
                    TrennungsGrund::WebsocketGeschlossen { schliess_code }
                        if schliess_code == SCHLIESS_CODE_VERSCHOBEN
                );
                if verschoben {
                    let schwach = Arc::downgrade(self);
                    tokio::spawn(verschoben_behandeln(schwach));
                } else {
                    let versuche = self.rejoin_versuche.load(Ordering::SeqCst);
                    if versuche < self.konfig.max_rejoin_versuche {
                        let schwach = Arc::downgrade(self);
                        tokio::spawn(rejoin_mit_backoff(schwach, versuche));
                    } else {
                        warn!("Rejoin-Budget erschoepft – Session wird abgebaut");
                        self.abbauen(true);
                    }
                }
            }
            VerbindungsStatus::Destroyed => {
                // Keine weiteren Frames senden
                if let Some(dispatcher) = self.dispatcher.lock().as_ref() {
                    dispatcher.stoppen(true);
                }
            }
            VerbindungsStatus::Connecting | VerbindungsStatus::Signalling => {
                if !self.bereit_sperre.swap(true, Ordering::SeqCst) {
                    let schwach = Arc::downgrade(self);
                    tokio::spawn(bereit_warten(schwach));
                }
            }
            VerbindungsStatus::Ready => {
                // Das Versuchs-Budget gilt pro Ausfall
                self.rejoin_versuche.store(0, Ordering::SeqCst);
            }
        }
    }

    /// Ist der gegebene Handle noch der aktuelle der Session?
    fn verbindung_ist_aktuell(&self, handle: &Arc<dyn TransportConnection>) -> bool {
        Arc::ptr_eq(handle, &*self.verbindung.lock())
    }

    /// Einmaliger Abbau: austragen, optional `Getrennt` melden, Transport
    /// hart zerstoeren
    pub(crate) fn abbauen(&self, mit_ereignis: bool) {
        if self.abgebaut.swap(true, Ordering::SeqCst) {
            return;
        }
        let gruppe = self.kanal.lock().gruppe;
        if let Some(verwaltung) = self.verwaltung.upgrade() {
            verwaltung.austragen(&gruppe);
        }
        if mit_ereignis {
            self.ereignisse.senden(&SessionEreignis::Getrennt);
        }
        if let Err(e) = self.verbindung.lock().zerstoeren() {
            trace!("Zerstoeren eines abwesenden Transports: {e}");
        }
        if let Some(ueberwachung) = self.ueberwachung.lock().take() {
            ueberwachung.abort();
        }
        debug!(%gruppe, "Session abgebaut");
    }
}

// ---------------------------------------------------------------------------
// Begrenzte Wartevorgaenge
// ---------------------------------------------------------------------------

/// Wartet auf einen Status der das Praedikat erfuellt
///
/// `false` wenn der Transport seinen Status-Sender geschlossen hat.
async fn auf_status_warten(
    status: &mut watch::Receiver<VerbindungsStatus>,
    praedikat: impl Fn(&VerbindungsStatus) -> bool,
) -> bool {
    status.wait_for(|s| praedikat(s)).await.is_ok()
}

/// Close-Code-4014-Pfad: kurz auf `Connecting` warten
///
/// Kommt die Verbindung nicht von selbst zurueck, ist die Session tot –
/// austragen, `Getrennt` melden, Transport zerstoeren.
async fn verschoben_behandeln(schwach: Weak<SessionInner>) {
    let Some(inner) = schwach.upgrade() else { return };
    let zeitlimit = inner.konfig.verschoben_zeitlimit;
    let beobachtet = Arc::clone(&*inner.verbindung.lock());
    let mut status = beobachtet.status();
    drop(inner);

    let wieder_da = tokio::time::timeout(
        zeitlimit,
        auf_status_warten(&mut status, |s| *s == VerbindungsStatus::Connecting),
    )
    .await;

    let Some(inner) = schwach.upgrade() else { return };
    match wieder_da {
        Ok(true) => {
            trace!("Verschobene Verbindung meldet sich zurueck");
        }
        // Nur abbauen wenn der beobachtete Handle noch der aktuelle ist –
        // ein Kanal-Wechsel waehrend des Wartens macht den Ausgang obsolet
        _ if inner.verbindung_ist_aktuell(&beobachtet) => {
            inner.abbauen(true);
        }
        _ => {}
    }
}

/// Generischer Rejoin nach Backoff
///
/// Versuch k (1-indiziert) wartet exakt `k * backoff_schritt`.
async fn rejoin_mit_backoff(schwach: Weak<SessionInner>, versuche: u32) {
    let Some(inner) = schwach.upgrade() else { return };
    let dauer = inner.konfig.backoff_schritt * (versuche + 1);
    let beobachtet = Arc::clone(&*inner.verbindung.lock());
    drop(inner);

    tokio::time::sleep(dauer).await;

    let Some(inner) = schwach.upgrade() else { return };
    if inner.abgebaut.load(Ordering::SeqCst) || !inner.verbindung_ist_aktuell(&beobachtet) {
        return;
    }
    let stand = inner.rejoin_versuche.fetch_add(1, Ordering::SeqCst) + 1;
    inner.ereignisse.senden(&SessionEreignis::Debug {
        meldung: format!("Rejoin-Versuch {stand}"),
    });
    beobachtet.rejoin();
}

/// Bereit-Wartevorgang mit Reentranz-Sperre
///
/// Die Sperre faellt auf jedem Ausgang – Erfolg, Zeitueberschreitung oder
/// geschlossener Transport.
async fn bereit_warten(schwach: Weak<SessionInner>) {
    let Some(inner) = schwach.upgrade() else { return };
    let zeitlimit = inner.konfig.bereit_zeitlimit;
    let beobachtet = Arc::clone(&*inner.verbindung.lock());
    let mut status = beobachtet.status();
    drop(inner);

    let bereit = tokio::time::timeout(
        zeitlimit,
        auf_status_warten(&mut status, |s| *s == VerbindungsStatus::Ready),
    )
    .await;

    let Some(inner) = schwach.upgrade() else { return };
    match bereit {
        Ok(true) => {}
        // Der Abbau prueft selbst ob schon zerstoert wurde – ein bereits
        // toter Transport wird nicht erneut zerstoert. Ein waehrend des
        // Wartens gewechselter Handle macht den Ausgang obsolet.
        _ if inner.verbindung_ist_aktuell(&beobachtet) => {
            inner.abbauen(true);
        }
        _ => {}
    }
    inner.bereit_sperre.store(false, Ordering::SeqCst);
}
