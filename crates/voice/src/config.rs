//! Zeitbudget und Einstellungen einer Session
//!
//! Die Standardwerte entsprechen dem Reconnect-Protokoll des Gateways;
//! Tests duerfen sie enger ziehen.

use crate::transport::TransportSettings;
use sprechfunk_core::{Result, SprechfunkError};
use std::time::Duration;

/// Zeitbudget der Session-Verwaltung
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Wartezeit auf `Ready` nach `Connecting`/`Signalling`
    pub bereit_zeitlimit: Duration,
    /// Wartezeit auf `Connecting` nach einer Verschiebung (Close-Code 4014)
    pub verschoben_zeitlimit: Duration,
    /// Backoff-Schritt fuer generische Rejoins: Versuch k wartet `k * schritt`
    pub backoff_schritt: Duration,
    /// Maximale Rejoin-Versuche pro Ausfall
    pub max_rejoin_versuche: u32,
    /// Stille-Luecke nach der ein Empfangs-Strom endet
    pub stille_luecke: Duration,
    /// Einstellungen fuer den Verbindungsaufbau
    pub einstellungen: TransportSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bereit_zeitlimit: Duration::from_secs(20),
            verschoben_zeitlimit: Duration::from_secs(5),
            backoff_schritt: Duration::from_secs(5),
            max_rejoin_versuche: 5,
            stille_luecke: Duration::from_millis(100),
            einstellungen: TransportSettings::default(),
        }
    }
}

impl SessionConfig {
    /// Prueft die Konfiguration auf brauchbare Werte
    pub fn validieren(&self) -> Result<()> {
        if self.bereit_zeitlimit.is_zero() {
            return Err(SprechfunkError::Konfiguration(
                "bereit_zeitlimit darf nicht 0 sein".into(),
            ));
        }
        if self.verschoben_zeitlimit.is_zero() {
            return Err(SprechfunkError::Konfiguration(
                "verschoben_zeitlimit darf nicht 0 sein".into(),
            ));
        }
        if self.backoff_schritt.is_zero() {
            return Err(SprechfunkError::Konfiguration(
                "backoff_schritt darf nicht 0 sein".into(),
            ));
        }
        if self.max_rejoin_versuche == 0 {
            return Err(SprechfunkError::Konfiguration(
                "max_rejoin_versuche muss mindestens 1 sein".into(),
            ));
        }
        Ok(())
    }
}
