//! StreamDispatcher – Playback- und Lautstaerke-Steuerung einer Session
//!
//! Der Dispatcher besitzt den Audio-Spieler und die aktuell spielende
//! Ressource. Er uebersetzt Spieler-Uebergaenge in `Start`/`Fertig`-Events,
//! unterdrueckt Events abgeloester Ressourcen ueber die Ignorier-Menge und
//! bietet Lautstaerke-Sichten in vier gleichwertigen Darstellungen.
//!
//! ## Ressourcen-Wechsel
//! ```text
//! abspielen(quelle)
//!     -> Typ aufloesen (explizit | Alt-Alias | Arbitrary)
//!     -> Ressource mit frischer Nonce erzeugen
//!     -> Lautstaerke/Glaettung vorbelegen (ohne Event)
//!     -> ggf. alte Nonce in Ignorier-Menge
//!     -> alte Ressource hart stoppen, neue setzen, Wiedergabe starten
//! ```
//! Es gibt nie zwei "aktuelle" Ressourcen gleichzeitig.

use crate::error::AudioResult;
use crate::player::{AudioPlayer, PlayerStatus, SpielerFehler, SpielerUebergang};
use crate::resource::{
    AudioQuelle, PlayableResource, ResourceFactory, ResourceMeta, ResourceOptions, StreamTyp,
    STANDARD_STILLE_RAHMEN,
};
use crate::volume::VolumeControl;
use parking_lot::Mutex;
use sprechfunk_core::event::{EventSender, OneShotQueue};
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Events und Optionen
// ---------------------------------------------------------------------------

/// Ereignisse des Dispatchers
#[derive(Debug, Clone)]
pub enum DispatcherEreignis {
    /// Wiedergabe einer Ressource hat begonnen
    Start { meta: ResourceMeta },
    /// Eine Ressource ist zu Ende gespielt
    Fertig { meta: ResourceMeta },
    /// Spieler- oder Ressourcen-Fehler (nicht fatal fuer die Session)
    Fehler {
        meldung: String,
        meta: Option<ResourceMeta>,
    },
    /// Informative Meldung
    Debug { meldung: String },
    /// Lautstaerke geaendert, Werte in linearer Darstellung
    LautstaerkeGeaendert { alt: f64, neu: f64 },
}

/// Optionen fuer [`StreamDispatcher::abspielen`]
#[derive(Debug, Clone)]
pub struct PlayOptions {
    /// Expliziter Eingabe-Typ
    pub typ: Option<StreamTyp>,
    /// Typ-Kennung (inklusive Alt-Aliasen), nur wenn `typ` fehlt
    pub typ_kennung: Option<String>,
    /// Inline-Lautstaerke-Regler anlegen
    pub inline_lautstaerke: bool,
    /// Stille-Frames am Ressourcen-Ende
    pub stille_rahmen: u8,
    /// Opake Nutzlast, landet in den Event-Metadaten
    pub metadaten: serde_json::Value,
    /// Lautstaerke vor Wiedergabestart vorbelegen (ohne Event)
    pub anfangs_lautstaerke: Option<f64>,
    /// Glaettungskoeffizient vorbelegen, falls unterstuetzt
    pub glaettung: Option<f64>,
    /// `Fertig`-Event der abgeloesten Ressource unterdruecken
    pub vorherige_ignorieren: bool,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            typ: None,
            typ_kennung: None,
            inline_lautstaerke: true,
            stille_rahmen: STANDARD_STILLE_RAHMEN,
            metadaten: serde_json::Value::Null,
            anfangs_lautstaerke: None,
            glaettung: None,
            vorherige_ignorieren: false,
        }
    }
}

// ---------------------------------------------------------------------------
// StreamDispatcher
// ---------------------------------------------------------------------------

/// Playback-Steuerung einer Voice-Session
///
/// Wird pro Session hoechstens einmal erstellt (lazy beim ersten
/// Abspielen) und ueberlebt Kanal-Wechsel. `aufraeumen` trennt alle
/// Horcher und stoppt die Status-Pumpe ohne die Wiedergabe anzufassen.
pub struct StreamDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    spieler: Arc<dyn AudioPlayer>,
    fabrik: Arc<dyn ResourceFactory>,
    /// Aktuell spielende Ressource – nur `abspielen`/`stoppen` schreiben
    aktuelle: Mutex<Option<Arc<dyn PlayableResource>>>,
    /// Nonces abgeloester Ressourcen deren Abschluss-Event unterdrueckt wird
    ignorierte: Mutex<HashSet<Uuid>>,
    /// Einmal-Callbacks fuer den naechsten Wiedergabe-Beginn
    naechste: OneShotQueue,
    /// Einmal-Callbacks fuer den naechsten Idle-Uebergang
    sofortige: OneShotQueue,
    ereignisse: EventSender<DispatcherEreignis>,
    pumpe: Mutex<Option<JoinHandle<()>>>,
}

impl StreamDispatcher {
    /// Erstellt einen Dispatcher und startet die Status-Pumpe
    pub fn new(spieler: Arc<dyn AudioPlayer>, fabrik: Arc<dyn ResourceFactory>) -> Self {
        let inner = Arc::new(DispatcherInner {
            spieler,
            fabrik,
            aktuelle: Mutex::new(None),
            ignorierte: Mutex::new(HashSet::new()),
            naechste: OneShotQueue::new(),
            sofortige: OneShotQueue::new(),
            ereignisse: EventSender::new(),
            pumpe: Mutex::new(None),
        });

        let pumpe = tokio::spawn(status_pumpe(
            Arc::downgrade(&inner),
            inner.spieler.uebergaenge(),
            inner.spieler.fehler(),
        ));
        *inner.pumpe.lock() = Some(pumpe);

        Self { inner }
    }

    /// Event-Sender des Dispatchers
    pub fn ereignisse(&self) -> &EventSender<DispatcherEreignis> {
        &self.inner.ereignisse
    }

    /// Der unterliegende Spieler
    pub fn spieler(&self) -> &Arc<dyn AudioPlayer> {
        &self.inner.spieler
    }

    // -----------------------------------------------------------------------
    // Wiedergabe
    // -----------------------------------------------------------------------

    /// Startet die Wiedergabe einer neuen Ressource
    ///
    /// Ersetzt die aktuelle Ressource immer sauber: erst harter Stopp der
    /// alten, dann Start der neuen. Gibt die Metadaten (mit Nonce) der
    /// neuen Ressource zurueck.
    pub fn abspielen(
        &self,
        quelle: AudioQuelle,
        optionen: PlayOptions,
    ) -> AudioResult<ResourceMeta> {
        let typ = optionen.typ.unwrap_or_else(|| {
            optionen
                .typ_kennung
                .as_deref()
                .and_then(StreamTyp::aus_kennung)
                .unwrap_or(StreamTyp::Arbitrary)
        });

        let meta = ResourceMeta::new(optionen.metadaten.clone());
        let ressource = self.inner.fabrik.erstellen(
            quelle,
            ResourceOptions {
                eingabe_typ: typ,
                inline_lautstaerke: optionen.inline_lautstaerke,
                stille_rahmen: optionen.stille_rahmen,
                meta: meta.clone(),
            },
        )?;

        // Vorbelegung laeuft am Event-Pfad vorbei: das ist Initialisierung,
        // keine benutzer-sichtbare Aenderung.
        if let Some(regler) = ressource.lautstaerke() {
            if let Some(wert) = optionen.anfangs_lautstaerke {
                regler.lautstaerke_setzen(wert);
            }
            if let Some(koeffizient) = optionen.glaettung {
                if regler.glaettung_unterstuetzt() {
                    regler.glaettung_setzen(koeffizient);
                }
            }
        }

        {
            let mut aktuelle = self.inner.aktuelle.lock();
            if let Some(alte) = aktuelle.as_ref() {
                if optionen.vorherige_ignorieren {
                    self.inner.ignorierte.lock().insert(alte.meta().nonce);
                    trace!(nonce = %alte.meta().nonce, "Abgeloeste Ressource wird ignoriert");
                }
                self.inner.spieler.stoppen(true);
            }
            *aktuelle = Some(Arc::clone(&ressource));
        }

        debug!(nonce = %meta.nonce, ?typ, "Wiedergabe gestartet");
        self.inner.spieler.abspielen(ressource);
        Ok(meta)
    }

    /// Pausiert die Wiedergabe; mit `stille` laufen Stille-Frames weiter
    pub fn pausieren(&self, stille: bool) {
        self.inner.spieler.pausieren(stille);
    }

    /// Setzt eine pausierte Wiedergabe fort
    pub fn fortsetzen(&self) {
        self.inner.spieler.fortsetzen();
    }

    /// Ist die Wiedergabe pausiert (benutzer- oder auto-pausiert)?
    pub fn pausiert(&self) -> bool {
        matches!(
            self.inner.spieler.status(),
            PlayerStatus::Paused | PlayerStatus::AutoPaused
        )
    }

    /// Stoppt die Wiedergabe; `erzwingen` verwirft die Ausklang-Frist
    pub fn stoppen(&self, erzwingen: bool) {
        self.inner.spieler.stoppen(erzwingen);
    }

    /// Alias fuer [`stoppen`](Self::stoppen)
    pub fn beenden(&self, erzwingen: bool) {
        self.stoppen(erzwingen);
    }

    /// Abgespielte Dauer der aktuellen Ressource in Millisekunden
    pub fn strom_zeit_ms(&self) -> u64 {
        self.inner
            .aktuelle
            .lock()
            .as_ref()
            .map(|r| r.spiel_dauer_ms())
            .unwrap_or(0)
    }

    /// Vom Spieler gemeldete Wiedergabedauer; 0 wenn nicht am Spielen
    pub fn gesamt_strom_zeit_ms(&self) -> u64 {
        if self.inner.spieler.status() == PlayerStatus::Playing {
            self.inner.spieler.spiel_dauer_ms()
        } else {
            0
        }
    }

    // -----------------------------------------------------------------------
    // Einmal-Callbacks
    // -----------------------------------------------------------------------

    /// Callback fuer den naechsten Wiedergabe-Beginn einreihen
    pub fn naechster(&self, f: impl FnOnce() + Send + 'static) {
        self.inner.naechste.einreihen(f);
    }

    /// Callback fuer den naechsten Idle-Uebergang einreihen
    pub fn sofort(&self, f: impl FnOnce() + Send + 'static) {
        self.inner.sofortige.einreihen(f);
    }

    // -----------------------------------------------------------------------
    // Lautstaerke
    // -----------------------------------------------------------------------

    /// Lineare Lautstaerke (1.0 wenn keine Ressource oder kein Regler)
    pub fn lautstaerke(&self) -> f64 {
        self.regler().map(|r| r.lautstaerke()).unwrap_or(1.0)
    }

    /// Lautstaerke in Prozent (`linear * 100`)
    pub fn lautstaerke_prozent(&self) -> f64 {
        self.lautstaerke() * 100.0
    }

    /// Lautstaerke in Dezibel
    pub fn lautstaerke_dezibel(&self) -> f64 {
        self.regler().map(|r| r.dezibel()).unwrap_or(1.0)
    }

    /// Logarithmische Lautstaerke-Sicht
    pub fn lautstaerke_logarithmisch(&self) -> f64 {
        self.regler().map(|r| r.logarithmisch()).unwrap_or(1.0)
    }

    /// Hat die aktuelle Ressource einen Lautstaerke-Regler?
    pub fn lautstaerke_einstellbar(&self) -> bool {
        self.regler().is_some()
    }

    /// Setzt die lineare Lautstaerke
    ///
    /// No-op (`false`, kein Event) wenn der Wert bereits anliegt oder kein
    /// Regler vorhanden ist; sonst ein `LautstaerkeGeaendert`-Event und
    /// `true`.
    pub fn lautstaerke_setzen(&self, wert: f64) -> bool {
        self.wert_setzen(wert, |r| r.lautstaerke(), |r, w| r.lautstaerke_setzen(w))
    }

    /// Setzt die Lautstaerke in Prozent
    pub fn lautstaerke_prozent_setzen(&self, wert: f64) -> bool {
        self.lautstaerke_setzen(wert / 100.0)
    }

    /// Setzt die Lautstaerke in Dezibel
    pub fn lautstaerke_dezibel_setzen(&self, wert: f64) -> bool {
        self.wert_setzen(wert, |r| r.dezibel(), |r, w| r.dezibel_setzen(w))
    }

    /// Setzt die logarithmische Lautstaerke-Sicht
    pub fn lautstaerke_logarithmisch_setzen(&self, wert: f64) -> bool {
        self.wert_setzen(wert, |r| r.logarithmisch(), |r, w| r.logarithmisch_setzen(w))
    }

    /// Unterstuetzt der aktuelle Regler Glaettung?
    pub fn glaettung_einstellbar(&self) -> bool {
        self.regler()
            .map(|r| r.glaettung_unterstuetzt())
            .unwrap_or(false)
    }

    /// Glaettungskoeffizient (0.0 ohne Regler oder ohne Unterstuetzung)
    pub fn glaettung(&self) -> f64 {
        self.regler()
            .filter(|r| r.glaettung_unterstuetzt())
            .map(|r| r.glaettung())
            .unwrap_or(0.0)
    }

    /// Setzt den Glaettungskoeffizienten
    ///
    /// Eigener Drehknopf neben der Lautstaerke: steuert wie schnell ein
    /// Lautstaerke- oder Ressourcen-Wechsel hoerbar rampt, nicht den
    /// Zielpegel. Kein `LautstaerkeGeaendert`-Event.
    pub fn glaettung_setzen(&self, koeffizient: f64) -> bool {
        let Some(regler) = self.regler() else {
            return false;
        };
        if !regler.glaettung_unterstuetzt() {
            return false;
        }
        if (regler.glaettung() - koeffizient).abs() < f64::EPSILON {
            return false;
        }
        regler.glaettung_setzen(koeffizient);
        true
    }

    fn regler(&self) -> Option<Arc<dyn VolumeControl>> {
        self.inner
            .aktuelle
            .lock()
            .as_ref()
            .and_then(|r| r.lautstaerke())
    }

    fn wert_setzen(
        &self,
        wert: f64,
        lesen: impl Fn(&dyn VolumeControl) -> f64,
        schreiben: impl Fn(&dyn VolumeControl, f64),
    ) -> bool {
        let Some(regler) = self.regler() else {
            return false;
        };
        if (lesen(regler.as_ref()) - wert).abs() < f64::EPSILON {
            return false;
        }
        let alt = regler.lautstaerke();
        schreiben(regler.as_ref(), wert);
        let neu = regler.lautstaerke();
        self.inner
            .ereignisse
            .senden(&DispatcherEreignis::LautstaerkeGeaendert { alt, neu });
        true
    }

    // -----------------------------------------------------------------------
    // Aufraeumen
    // -----------------------------------------------------------------------

    /// Trennt alle Horcher und stoppt die Status-Pumpe
    ///
    /// Beruehrt die Wiedergabe selbst nicht – wird beim Session-Abbau ohne
    /// Transport-Zerstoerung genutzt. Danach sendet der Dispatcher keine
    /// Events mehr.
    pub fn aufraeumen(&self) {
        self.inner.ereignisse.alle_abmelden();
        self.inner.naechste.leeren();
        self.inner.sofortige.leeren();
        if let Some(pumpe) = self.inner.pumpe.lock().take() {
            pumpe.abort();
        }
        debug!("Dispatcher-Horcher getrennt");
    }
}

impl Drop for DispatcherInner {
    fn drop(&mut self) {
        if let Some(pumpe) = self.pumpe.lock().take() {
            pumpe.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Status-Pumpe
// ---------------------------------------------------------------------------

/// Verarbeitet Spieler-Uebergaenge und -Fehler
///
/// Haelt nur eine Weak-Referenz auf den Dispatcher damit dieser trotz
/// laufender Pumpe freigegeben werden kann.
async fn status_pumpe(
    schwach: Weak<DispatcherInner>,
    mut uebergaenge: broadcast::Receiver<SpielerUebergang>,
    mut fehler: broadcast::Receiver<SpielerFehler>,
) {
    loop {
        tokio::select! {
            uebergang = uebergaenge.recv() => match uebergang {
                Ok(u) => {
                    let Some(inner) = schwach.upgrade() else { break };
                    inner.uebergang_verarbeiten(&u);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    trace!(verpasst = n, "Spieler-Uebergaenge verpasst");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            meldung = fehler.recv() => match meldung {
                Ok(f) => {
                    let Some(inner) = schwach.upgrade() else { break };
                    inner.ereignisse.senden(&DispatcherEreignis::Fehler {
                        meldung: f.meldung,
                        meta: f.meta,
                    });
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

impl DispatcherInner {
    fn uebergang_verarbeiten(&self, uebergang: &SpielerUebergang) {
        let idle_eintritt =
            uebergang.neu == PlayerStatus::Idle && uebergang.alt != PlayerStatus::Idle;
        let wiedergabe_beginn =
            uebergang.neu == PlayerStatus::Playing && uebergang.alt == PlayerStatus::Buffering;

        if idle_eintritt {
            // Erst die Einmal-Callbacks, dann das Event – Callbacks sehen so
            // den Zustand vor der Benachrichtigung der Horcher.
            self.sofortige.ausfuehren();
            if let Some(meta) = self.uebergangs_meta(uebergang) {
                if self.ignorierte.lock().remove(&meta.nonce) {
                    trace!(nonce = %meta.nonce, "Fertig-Event unterdrueckt (abgeloest)");
                } else {
                    self.ereignisse.senden(&DispatcherEreignis::Fertig { meta });
                }
            }
        } else if wiedergabe_beginn {
            self.naechste.ausfuehren();
            if let Some(meta) = self.uebergangs_meta(uebergang) {
                if self.ignorierte.lock().contains(&meta.nonce) {
                    trace!(nonce = %meta.nonce, "Start-Event unterdrueckt (abgeloest)");
                } else {
                    self.ereignisse.senden(&DispatcherEreignis::Start { meta });
                }
            }
        }
    }

    /// Metadaten zum Uebergang: bevorzugt die vom Spieler mitgelieferten,
    /// sonst die der aktuellen Ressource
    fn uebergangs_meta(&self, uebergang: &SpielerUebergang) -> Option<ResourceMeta> {
        uebergang
            .meta
            .clone()
            .or_else(|| self.aktuelle.lock().as_ref().map(|r| r.meta().clone()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
