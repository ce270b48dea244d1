//! Test-Attrappen fuer Spieler und Ressourcen-Fabrik
//!
//! Die Attrappen treiben keine eigenen Uebergaenge – Tests steuern den
//! Spieler-Status von aussen und pruefen die aufgezeichneten Befehle.

use crate::error::{AudioError, AudioResult};
use crate::player::{AudioPlayer, PlayerStatus, SpielerFehler, SpielerUebergang};
use crate::resource::{AudioQuelle, PlayableResource, ResourceFactory, ResourceMeta, ResourceOptions};
use crate::volume::{SmoothVolume, VolumeControl};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Vom MockSpieler aufgezeichneter Befehl
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpielerBefehl {
    Abspielen(Uuid),
    Pausieren { stille: bool },
    Fortsetzen,
    Stoppen { erzwingen: bool },
}

// ---------------------------------------------------------------------------
// MockRessource
// ---------------------------------------------------------------------------

pub struct MockRessource {
    meta: ResourceMeta,
    regler: Option<Arc<SmoothVolume>>,
    pub dauer_ms: Mutex<u64>,
}

impl MockRessource {
    pub fn new(meta: ResourceMeta, mit_regler: bool) -> Arc<Self> {
        Arc::new(Self {
            meta,
            regler: mit_regler.then(|| Arc::new(SmoothVolume::default())),
            dauer_ms: Mutex::new(0),
        })
    }
}

impl PlayableResource for MockRessource {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }

    fn lautstaerke(&self) -> Option<Arc<dyn VolumeControl>> {
        self.regler
            .as_ref()
            .map(|r| Arc::clone(r) as Arc<dyn VolumeControl>)
    }

    fn spiel_dauer_ms(&self) -> u64 {
        *self.dauer_ms.lock()
    }
}

// ---------------------------------------------------------------------------
// MockFabrik
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockFabrik {
    /// Naechste Erzeugung schlaegt fehl
    pub fehlschlagen: AtomicBool,
    /// Aufgezeichnete Erzeugungs-Optionen
    pub erstellt: Mutex<Vec<ResourceOptions>>,
}

impl MockFabrik {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl ResourceFactory for MockFabrik {
    fn erstellen(
        &self,
        _quelle: AudioQuelle,
        optionen: ResourceOptions,
    ) -> AudioResult<Arc<dyn PlayableResource>> {
        if self.fehlschlagen.load(Ordering::SeqCst) {
            return Err(AudioError::RessourceFehlgeschlagen("Mock".into()));
        }
        let ressource = MockRessource::new(optionen.meta.clone(), optionen.inline_lautstaerke);
        self.erstellt.lock().push(optionen);
        Ok(ressource)
    }
}

// ---------------------------------------------------------------------------
// MockSpieler
// ---------------------------------------------------------------------------

pub struct MockSpieler {
    status: Mutex<PlayerStatus>,
    uebergaenge_tx: broadcast::Sender<SpielerUebergang>,
    fehler_tx: broadcast::Sender<SpielerFehler>,
    aktuelle: Mutex<Option<Arc<dyn PlayableResource>>>,
    pub dauer_ms: Mutex<u64>,
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
            aktuelle: Mutex::new(None),
            dauer_ms: Mutex::new(0),
            protokoll: Mutex::new(Vec::new()),
        })
    }

    /// Treibt einen Uebergang mit den Metadaten der aktuellen Ressource
    pub fn uebergang_treiben(&self, alt: PlayerStatus, neu: PlayerStatus) {
        let meta = self.aktuelle.lock().as_ref().map(|r| r.meta().clone());
        self.uebergang_mit_meta(alt, neu, meta);
    }

    /// Treibt einen Uebergang mit expliziten Metadaten (z.B. der abgeloesten
    /// Ressource beim Idle-Uebergang nach einem Wechsel)
    pub fn uebergang_mit_meta(
        &self,
        alt: PlayerStatus,
        neu: PlayerStatus,
        meta: Option<ResourceMeta>,
    ) {
        *self.status.lock() = neu;
        let _ = self.uebergaenge_tx.send(SpielerUebergang { alt, neu, meta });
    }

    /// Meldet einen Spieler-Fehler
    pub fn fehler_treiben(&self, meldung: &str) {
        let meta = self.aktuelle.lock().as_ref().map(|r| r.meta().clone());
        let _ = self.fehler_tx.send(SpielerFehler {
            meldung: meldung.into(),
            meta,
        });
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

    fn abspielen(&self, ressource: Arc<dyn PlayableResource>) {
        self.protokoll
            .lock()
            .push(SpielerBefehl::Abspielen(ressource.meta().nonce));
        *self.aktuelle.lock() = Some(ressource);
    }

    fn pausieren(&self, stille: bool) {
        self.protokoll.lock().push(SpielerBefehl::Pausieren { stille });
    }

    fn fortsetzen(&self) {
        self.protokoll.lock().push(SpielerBefehl::Fortsetzen);
    }

    fn stoppen(&self, erzwingen: bool) {
        self.protokoll.lock().push(SpielerBefehl::Stoppen { erzwingen });
    }

    fn spiel_dauer_ms(&self) -> u64 {
        *self.dauer_ms.lock()
    }
}

/// Laesst die aktuelle Task-Runde durchlaufen damit Pump-Tasks verarbeiten
pub async fn pumpen_lassen() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
