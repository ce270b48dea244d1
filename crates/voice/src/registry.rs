//! VoiceManager – prozessweite Tabelle aktiver Sessions
//!
//! Pro Gruppe existiert hoechstens eine Session. Der Manager ist der
//! einzige Schreiber der Gruppen-Tabelle: Eintragen beim Beitreten,
//! Austragen beim Verlassen oder beim Abbau durch die Ueberwachung.

use crate::config::SessionConfig;
use crate::session::VoiceSession;
use crate::transport::Platform;
use dashmap::DashMap;
use sprechfunk_core::{ChannelId, GroupId, Result, SprechfunkError};
use std::sync::Arc;
use tracing::{debug, info};

/// Prozessweite Session-Verwaltung
///
/// Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct VoiceManager {
    inner: Arc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    pub(crate) plattform: Arc<Platform>,
    pub(crate) konfig: SessionConfig,
    /// Aktive Sessions, indiziert nach Gruppe
    pub(crate) sessions: DashMap<GroupId, Arc<VoiceSession>>,
}

impl ManagerInner {
    /// Entfernt eine Session aus der Tabelle (vom Session-Abbau gerufen)
    pub(crate) fn austragen(&self, gruppe: &GroupId) {
        if self.sessions.remove(gruppe).is_some() {
            debug!(%gruppe, "Session ausgetragen");
        }
    }
}

impl VoiceManager {
    /// Erstellt eine Verwaltung mit den gegebenen Kollaborateuren
    pub fn new(plattform: Arc<Platform>, konfig: SessionConfig) -> Result<Self> {
        konfig.validieren()?;
        Ok(Self {
            inner: Arc::new(ManagerInner {
                plattform,
                konfig,
                sessions: DashMap::new(),
            }),
        })
    }

    /// Tritt einem Sprachkanal bei
    ///
    /// Existiert bereits eine Session der Gruppe mit demselben Kanal, wird
    /// sie unveraendert zurueckgegeben (kein neuer Handshake). Mit anderem
    /// Kanal wird auf [`kanal_wechseln`](Self::kanal_wechseln) umgeleitet.
    /// Ungueltige Ziele schlagen fehl bevor der Transport angefasst wird.
    pub async fn beitreten(&self, ziel: ChannelId) -> Result<Arc<VoiceSession>> {
        let kanal = self.inner.plattform.kanaele.aufloesen(ziel)?;
        if !kanal.sprachfaehig {
            return Err(SprechfunkError::UngueltigesZiel(format!(
                "{} ist kein Sprachkanal",
                kanal.id
            )));
        }

        if let Some(bestehend) = self
            .inner
            .sessions
            .get(&kanal.gruppe)
            .map(|eintrag| Arc::clone(eintrag.value()))
        {
            if bestehend.kanal().id != kanal.id {
                return self.kanal_wechseln(&bestehend, ziel).await;
            }
            debug!(gruppe = %kanal.gruppe, "Beitritt ist idempotent – bestehende Session");
            return Ok(bestehend);
        }

        let verbindung = self
            .inner
            .plattform
            .transport
            .verbinden(kanal.gruppe, kanal.id, self.inner.konfig.einstellungen)
            .await?;

        let session = VoiceSession::new(
            Arc::downgrade(&self.inner),
            Arc::clone(&self.inner.plattform),
            self.inner.konfig,
            kanal,
            verbindung,
        );
        self.inner
            .sessions
            .insert(kanal.gruppe, Arc::clone(&session));

        if let Err(e) = session
            .auf_bereit_warten(self.inner.konfig.bereit_zeitlimit)
            .await
        {
            session.zerstoeren();
            return Err(e);
        }

        info!(gruppe = %kanal.gruppe, kanal = %kanal.id, "Sprachkanal beigetreten");
        Ok(session)
    }

    /// Verlaesst die Session einer Gruppe
    ///
    /// No-op wenn keine Session existiert; wirft auch bei einer halb
    /// abgebauten Session nicht.
    pub fn verlassen(&self, gruppe: GroupId) {
        let Some((_, session)) = self.inner.sessions.remove(&gruppe) else {
            return;
        };
        session.trennen();
        session.zerstoeren();
        info!(%gruppe, "Sprachkanal verlassen");
    }

    /// Wechselt eine bestehende Session auf einen anderen Kanal
    ///
    /// Fuehrt den Beitritts-Handshake gegen den neuen Kanal aus, bindet
    /// Kanal-Referenz und Transport-Handle um und traegt die Session unter
    /// dem (moeglicherweise geaenderten) Gruppen-Schluessel neu ein. Das
    /// zurueckgegebene Objekt ist dieselbe Session – laufende Wiedergabe
    /// wird nicht unterbrochen.
    pub async fn kanal_wechseln(
        &self,
        session: &Arc<VoiceSession>,
        ziel: ChannelId,
    ) -> Result<Arc<VoiceSession>> {
        let kanal = self.inner.plattform.kanaele.aufloesen(ziel)?;
        if !kanal.sprachfaehig {
            return Err(SprechfunkError::UngueltigesZiel(format!(
                "{} ist kein Sprachkanal",
                kanal.id
            )));
        }

        let alte_gruppe = session.gruppe();
        let verbindung = self
            .inner
            .plattform
            .transport
            .verbinden(kanal.gruppe, kanal.id, self.inner.konfig.einstellungen)
            .await?;

        session.verbindung_wechseln(kanal, verbindung).await?;

        if alte_gruppe != kanal.gruppe {
            self.inner.sessions.remove(&alte_gruppe);
        }
        self.inner
            .sessions
            .insert(kanal.gruppe, Arc::clone(session));

        info!(gruppe = %kanal.gruppe, kanal = %kanal.id, "Kanal gewechselt");
        Ok(Arc::clone(session))
    }

    /// Session einer Gruppe, falls vorhanden
    pub fn sitzung(&self, gruppe: GroupId) -> Option<Arc<VoiceSession>> {
        self.inner
            .sessions
            .get(&gruppe)
            .map(|eintrag| Arc::clone(eintrag.value()))
    }

    /// Anzahl aktiver Sessions
    pub fn anzahl(&self) -> usize {
        self.inner.sessions.len()
    }
}
