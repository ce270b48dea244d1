//! Typisierter Event-Sender mit benannten Horchern
//!
//! Jede Komponente (Session, Dispatcher, Empfaenger) besitzt einen eigenen
//! `EventSender` mit einem typisierten Ereignis-Enum. Horcher werden unter
//! einem Namen registriert; ein bereits vergebener Name wird nicht doppelt
//! registriert (check-before-add). So bleibt wiederholtes Anmelden ohne
//! Wirkung und `alle_abmelden` trennt eine Komponente vollstaendig.
//!
//! Zusaetzlich: [`OneShotQueue`] fuer Callbacks die genau einmal beim
//! naechsten passenden Uebergang laufen.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Horcher-Callback fuer Ereignisse vom Typ `E`
pub type Horcher<E> = Arc<dyn Fn(&E) + Send + Sync>;

// ---------------------------------------------------------------------------
// EventSender
// ---------------------------------------------------------------------------

/// Typisierter Event-Sender
///
/// Clone teilt den inneren Zustand (Arc). Horcher laufen synchron im
/// Sende-Aufruf, in Registrierungs-Reihenfolge.
pub struct EventSender<E> {
    inner: Arc<EventSenderInner<E>>,
}

struct EventSenderInner<E> {
    /// Benannte Horcher in Registrierungs-Reihenfolge
    horcher: Mutex<Vec<(String, Horcher<E>)>>,
}

impl<E> Clone for EventSender<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for EventSender<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventSender<E> {
    /// Erstellt einen neuen EventSender ohne Horcher
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EventSenderInner {
                horcher: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Registriert einen Horcher unter einem Namen
    ///
    /// Gibt `false` zurueck wenn der Name bereits vergeben ist – der
    /// vorhandene Horcher bleibt dann unveraendert.
    pub fn anmelden<F>(&self, name: impl Into<String>, f: F) -> bool
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let name = name.into();
        let mut horcher = self.inner.horcher.lock();
        if horcher.iter().any(|(n, _)| n == &name) {
            return false;
        }
        horcher.push((name, Arc::new(f)));
        true
    }

    /// Entfernt den Horcher mit dem gegebenen Namen
    pub fn abmelden(&self, name: &str) -> bool {
        let mut horcher = self.inner.horcher.lock();
        let vorher = horcher.len();
        horcher.retain(|(n, _)| n != name);
        horcher.len() != vorher
    }

    /// Entfernt alle Horcher
    pub fn alle_abmelden(&self) {
        self.inner.horcher.lock().clear();
    }

    /// Prueft ob ein Horcher mit dem Namen registriert ist
    pub fn hat_horcher(&self, name: &str) -> bool {
        self.inner.horcher.lock().iter().any(|(n, _)| n == name)
    }

    /// Anzahl registrierter Horcher
    pub fn anzahl(&self) -> usize {
        self.inner.horcher.lock().len()
    }

    /// Sendet ein Ereignis an alle Horcher
    ///
    /// Die Horcher-Liste wird vor dem Aufruf kopiert, damit Horcher beim
    /// Verarbeiten weitere Horcher an- oder abmelden duerfen. Ein Panic in
    /// einem Horcher blockiert die uebrigen nicht.
    pub fn senden(&self, ereignis: &E) {
        let schnappschuss: Vec<Horcher<E>> = {
            let horcher = self.inner.horcher.lock();
            horcher.iter().map(|(_, f)| Arc::clone(f)).collect()
        };
        for f in schnappschuss {
            if catch_unwind(AssertUnwindSafe(|| f(ereignis))).is_err() {
                tracing::warn!("Event-Horcher hat gepanict – uebrige Horcher laufen weiter");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// OneShotQueue
// ---------------------------------------------------------------------------

/// Warteschlange fuer Einmal-Callbacks
///
/// Jeder Callback laeuft hoechstens einmal und wird im Moment der
/// Ausfuehrung aus der Queue entfernt. Callbacks die waehrend eines
/// Durchlaufs neue Callbacks einreihen landen in der naechsten Runde.
#[derive(Default)]
pub struct OneShotQueue {
    callbacks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl OneShotQueue {
    /// Erstellt eine leere Queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Reiht einen Callback ein
    pub fn einreihen<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.callbacks.lock().push(Box::new(f));
    }

    /// Anzahl wartender Callbacks
    pub fn anzahl(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Fuehrt alle wartenden Callbacks in FIFO-Reihenfolge aus
    ///
    /// Die Queue wird vor der Ausfuehrung geleert – waehrend des Durchlaufs
    /// eingereihte Callbacks laufen erst beim naechsten Aufruf. Ein Panic
    /// in einem Callback blockiert die uebrigen nicht.
    pub fn ausfuehren(&self) {
        let faellig: Vec<Box<dyn FnOnce() + Send>> =
            std::mem::take(&mut *self.callbacks.lock());
        for f in faellig {
            if catch_unwind(AssertUnwindSafe(f)).is_err() {
                tracing::warn!("Einmal-Callback hat gepanict – uebrige Callbacks laufen weiter");
            }
        }
    }

    /// Verwirft alle wartenden Callbacks ohne sie auszufuehren
    pub fn leeren(&self) {
        self.callbacks.lock().clear();
    }
}
