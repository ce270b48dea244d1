//! sprechfunk-audio – Audio-Dispatch fuer Sprechfunk
//!
//! Implementiert die Abspiel-Seite einer Voice-Session:
//! - [`dispatch`] – StreamDispatcher: Playback-Steuerung, Events, Lautstaerke
//! - [`resource`] – Abspielbare Ressourcen mit Nonce und Metadaten
//! - [`player`] – Spieler-Boundary (Status, Uebergaenge, Traits)
//! - [`volume`] – Lautstaerke-Faehigkeit mit optionaler Glaettung
//! - [`codec`] – Opus-Dekodierung fuer den Empfangspfad

pub mod codec;
pub mod dispatch;
pub mod error;
pub mod player;
pub mod resource;
pub mod volume;

#[cfg(test)]
pub(crate) mod testhilfe;

pub use codec::{AudiopusDecoder, AudiopusDecoderFactory, DecoderFactory, OpusDecoder};
pub use dispatch::{DispatcherEreignis, PlayOptions, StreamDispatcher};
pub use error::{AudioError, AudioResult};
pub use player::{AudioPlayer, PlayerFactory, PlayerStatus, SpielerFehler, SpielerUebergang};
pub use resource::{
    AudioQuelle, PlayableResource, ResourceFactory, ResourceMeta, ResourceOptions, StreamTyp,
};
pub use volume::{SmoothVolume, VolumeControl};
