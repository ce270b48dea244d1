//! sprechfunk-core – Gemeinsame Typen, Events und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von den
//! anderen Sprechfunk-Crates gemeinsam genutzt werden:
//! - ID-Newtypes (Gruppe, Kanal, Benutzer)
//! - Zentraler Fehler-Enum
//! - Typisierter Event-Sender mit benannten Horchern

pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{Result, SprechfunkError};
pub use event::EventSender;
pub use types::{ChannelId, GroupId, UserId};
