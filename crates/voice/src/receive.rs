//! Empfangs-Weiche – pro Teilnehmer isolierte Audio-Stroeme
//!
//! Der Transport meldet nur ein geteiltes "jemand spricht"-Signal. Die
//! Weiche uebersetzt das in getrennte, unabhaengig konsumierbare Stroeme:
//! pro `strom_erstellen`-Aufruf ein Ausgabe-Strom, der nur die Frames des
//! angefragten Teilnehmers fuehrt.
//!
//! ## Verdrahtung
//! ```text
//! sprech_signale (broadcast)
//!     -> Signal-Pumpe -> benannte Horcher
//!     -> Start(user) passt? -> teilnehmer_abonnieren(user, ende)
//!     -> naechster Scheduling-Tick: Frames (ggf. Opus->PCM) in den
//!        Ausgabe-Strom leiten
//! ```

use crate::transport::{EndeBedingung, SprechSignal, TransportConnection};
use bytes::Bytes;
use parking_lot::Mutex;
use sprechfunk_audio::codec::DecoderFactory;
use sprechfunk_core::event::EventSender;
use sprechfunk_core::UserId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Pufferkapazitaet eines Ausgabe-Stroms in Bloecken
const STROM_PUFFER: usize = 64;

/// Name des idempotent angemeldeten Debug-Horchers
const STILLE_HORCHER: &str = "stille-debug";

// ---------------------------------------------------------------------------
// Optionen und Ausgabe-Strom
// ---------------------------------------------------------------------------

/// Ereignisse der Empfangs-Weiche
#[derive(Debug, Clone)]
pub enum EmpfaengerEreignis {
    /// Informative Meldung (Sprech-Zustandswechsel)
    Debug { meldung: String },
}

/// Ausgabe-Modus eines Empfangs-Stroms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmpfangsModus {
    /// Rohe Opus-Frames
    Opus,
    /// Dekodiertes s16le-PCM (stereo, 960 Samples, 48kHz)
    Pcm,
}

/// Ende-Verhalten eines Empfangs-Stroms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmpfangsEnde {
    /// Abonnement endet nach der konfigurierten Stille-Luecke
    Stille,
    /// Abonnement endet nur auf explizites Beenden
    Manuell,
}

/// Optionen fuer [`VoiceReceiver::strom_erstellen`]
#[derive(Debug, Clone, Copy)]
pub struct EmpfangsOptionen {
    pub ende: EmpfangsEnde,
    pub modus: EmpfangsModus,
}

impl Default for EmpfangsOptionen {
    fn default() -> Self {
        Self {
            ende: EmpfangsEnde::Stille,
            modus: EmpfangsModus::Opus,
        }
    }
}

/// Teilnehmer-gebundener Ausgabe-Strom
///
/// Liefert Bloecke sobald der Teilnehmer spricht; zwischen zwei
/// Wortmeldungen bleibt der Strom offen.
pub struct EmpfangsStrom {
    user: UserId,
    rx: mpsc::Receiver<Bytes>,
}

impl EmpfangsStrom {
    /// Wartet auf den naechsten Audio-Block
    pub async fn naechster_block(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Holt einen bereits eingetroffenen Block, ohne zu warten
    pub fn versuche_naechsten(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Teilnehmer dieses Stroms
    pub fn user(&self) -> UserId {
        self.user
    }
}

// ---------------------------------------------------------------------------
// VoiceReceiver
// ---------------------------------------------------------------------------

/// Empfangs-Weiche einer Session
///
/// Wird eifrig mit der Session erstellt und ueberlebt Kanal-Wechsel; nach
/// einem Wechsel koppelt die Session die Weiche auf die neue Verbindung um.
pub struct VoiceReceiver {
    inner: Arc<EmpfaengerInner>,
}

struct EmpfaengerInner {
    /// Geteilter Verbindungs-Slot der Session (folgt Kanal-Wechseln)
    verbindung: Arc<Mutex<Arc<dyn TransportConnection>>>,
    decoder_fabrik: Arc<dyn DecoderFactory>,
    stille_luecke: Duration,
    /// Benannte Horcher auf dem geteilten Sprech-Signal
    horcher: EventSender<SprechSignal>,
    ereignisse: EventSender<EmpfaengerEreignis>,
    pumpe: Mutex<Option<JoinHandle<()>>>,
    strom_zaehler: AtomicU64,
}

impl VoiceReceiver {
    pub(crate) fn new(
        verbindung: Arc<Mutex<Arc<dyn TransportConnection>>>,
        decoder_fabrik: Arc<dyn DecoderFactory>,
        stille_luecke: Duration,
    ) -> Self {
        let weiche = Self {
            inner: Arc::new(EmpfaengerInner {
                verbindung,
                decoder_fabrik,
                stille_luecke,
                horcher: EventSender::new(),
                ereignisse: EventSender::new(),
                pumpe: Mutex::new(None),
                strom_zaehler: AtomicU64::new(0),
            }),
        };
        weiche.koppeln();
        weiche
    }

    /// Event-Sender der Weiche
    pub fn ereignisse(&self) -> &EventSender<EmpfaengerEreignis> {
        &self.inner.ereignisse
    }

    /// Startet die Signal-Pumpe auf der aktuellen Verbindung
    fn koppeln(&self) {
        let signale = self.inner.verbindung.lock().sprech_signale();
        let pumpe = tokio::spawn(sprech_pumpe(Arc::downgrade(&self.inner), signale));
        *self.inner.pumpe.lock() = Some(pumpe);
    }

    /// Koppelt die Weiche nach einem Kanal-Wechsel neu
    pub(crate) fn neu_koppeln(&self) {
        if let Some(pumpe) = self.inner.pumpe.lock().take() {
            pumpe.abort();
        }
        self.koppeln();
    }

    /// Erstellt einen isolierten Empfangs-Strom fuer einen Teilnehmer
    ///
    /// Der Strom wird sofort zurueckgegeben, bevor Audio eintrifft. Die
    /// eigentliche Abonnement- und Decoder-Verdrahtung passiert erst auf
    /// dem naechsten Scheduling-Tick nach dem Sprech-Start-Signal.
    pub fn strom_erstellen(&self, user: UserId, optionen: EmpfangsOptionen) -> EmpfangsStrom {
        // "Hoert auf zu sprechen" wird genau einmal verdrahtet – geprueft
        // ueber den Horcher-Namen, nicht ueber einen Zaehler.
        if !self.inner.horcher.hat_horcher(STILLE_HORCHER) {
            let ereignisse = self.inner.ereignisse.clone();
            self.inner.horcher.anmelden(STILLE_HORCHER, move |signal| {
                if let SprechSignal::Ende(wer) = signal {
                    ereignisse.senden(&EmpfaengerEreignis::Debug {
                        meldung: format!("{wer} hat aufgehoert zu sprechen"),
                    });
                }
            });
        }

        let (tx, rx) = mpsc::channel(STROM_PUFFER);
        let name = format!(
            "start-{}",
            self.inner.strom_zaehler.fetch_add(1, Ordering::SeqCst)
        );
        let schwach = Arc::downgrade(&self.inner);
        self.inner.horcher.anmelden(name, move |signal| {
            let SprechSignal::Start(wer) = signal else {
                return;
            };
            if *wer != user {
                return;
            }
            let Some(inner) = schwach.upgrade() else {
                return;
            };
            inner.wortmeldung_verdrahten(user, optionen, tx.clone());
        });

        debug!(%user, ?optionen, "Empfangs-Strom erstellt");
        EmpfangsStrom { user, rx }
    }

    /// Trennt die geteilten Start/Ende-Horcher komplett
    ///
    /// Betrifft alle ausstehenden Stroeme: sie erhalten keine weiteren
    /// Wortmeldungen mehr.
    pub fn aufraeumen(&self) {
        self.inner.horcher.alle_abmelden();
        self.inner.ereignisse.alle_abmelden();
        if let Some(pumpe) = self.inner.pumpe.lock().take() {
            pumpe.abort();
        }
        debug!("Empfangs-Weiche getrennt");
    }

    #[cfg(test)]
    pub(crate) fn horcher_anzahl(&self) -> usize {
        self.inner.horcher.anzahl()
    }
}

impl EmpfaengerInner {
    /// Abonniert eine Wortmeldung und leitet sie in den Ausgabe-Strom
    fn wortmeldung_verdrahten(
        self: &Arc<Self>,
        user: UserId,
        optionen: EmpfangsOptionen,
        tx: mpsc::Sender<Bytes>,
    ) {
        let ende = match optionen.ende {
            EmpfangsEnde::Stille => EndeBedingung::NachStille(self.stille_luecke),
            EmpfangsEnde::Manuell => EndeBedingung::Manuell,
        };
        let quelle = self.verbindung.lock().teilnehmer_abonnieren(user, ende);
        let decoder_fabrik = Arc::clone(&self.decoder_fabrik);

        // Auf den naechsten Scheduling-Tick verschieben – die Verdrahtung
        // darf nicht im Horcher-Durchlauf selbst passieren.
        tokio::spawn(async move {
            let mut quelle = match quelle {
                Ok(quelle) => quelle,
                Err(e) => {
                    warn!(%user, "Teilnehmer-Abonnement fehlgeschlagen: {e}");
                    return;
                }
            };
            let mut decoder = if optionen.modus == EmpfangsModus::Pcm {
                match decoder_fabrik.erstellen() {
                    Ok(decoder) => Some(decoder),
                    Err(e) => {
                        warn!(%user, "Decoder konnte nicht erstellt werden: {e}");
                        return;
                    }
                }
            } else {
                None
            };

            while let Some(frame) = quelle.recv().await {
                let block = match decoder.as_mut() {
                    Some(decoder) => match decoder.dekodieren(&frame) {
                        Ok(pcm) => pcm,
                        Err(e) => {
                            trace!(%user, "Frame nicht dekodierbar: {e}");
                            continue;
                        }
                    },
                    None => frame,
                };
                if tx.send(block).await.is_err() {
                    // Abnehmer hat den Strom fallen gelassen
                    break;
                }
            }
            trace!(%user, "Wortmeldung beendet");
        });
    }
}

impl Drop for EmpfaengerInner {
    fn drop(&mut self) {
        if let Some(pumpe) = self.pumpe.lock().take() {
            pumpe.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Signal-Pumpe
// ---------------------------------------------------------------------------

/// Leitet Sprech-Signale vom Transport an die benannten Horcher weiter
async fn sprech_pumpe(
    schwach: Weak<EmpfaengerInner>,
    mut signale: broadcast::Receiver<SprechSignal>,
) {
    loop {
        match signale.recv().await {
            Ok(signal) => {
                let Some(inner) = schwach.upgrade() else { break };
                inner.horcher.senden(&signal);
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                trace!(verpasst = n, "Sprech-Signale verpasst");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
