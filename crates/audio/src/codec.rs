//! Opus-Dekodierung fuer den Empfangspfad
//!
//! Kapselt audiopus hinter dem [`OpusDecoder`]-Trait. Der Empfangspfad
//! dekodiert stereo mit 960-Sample-Frames bei 48kHz.

use crate::error::{AudioError, AudioResult};
use audiopus::coder::Decoder;
use audiopus::{Channels, SampleRate};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

/// Kanalanzahl des Empfangspfads
pub const EMPFANGS_KANAELE: usize = 2;
/// Samples pro Frame und Kanal (20ms bei 48kHz)
pub const EMPFANGS_FRAME: usize = 960;
/// Abtastrate des Empfangspfads
pub const EMPFANGS_RATE: u32 = 48_000;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Dekodiert Opus-Frames zu s16le-PCM
pub trait OpusDecoder: Send {
    /// Dekodiert einen Frame; liefert interleaved s16le-PCM
    fn dekodieren(&mut self, frame: &[u8]) -> AudioResult<Bytes>;
}

/// Erzeugt Decoder-Instanzen (eine pro Empfangs-Strom)
pub trait DecoderFactory: Send + Sync {
    fn erstellen(&self) -> AudioResult<Box<dyn OpusDecoder>>;
}

// ---------------------------------------------------------------------------
// audiopus-Implementierung
// ---------------------------------------------------------------------------

/// audiopus-gestuetzter Decoder (stereo, 960 Samples, 48kHz)
pub struct AudiopusDecoder {
    decoder: Decoder,
}

impl AudiopusDecoder {
    /// Erstellt einen neuen Decoder
    pub fn new() -> AudioResult<Self> {
        let decoder = Decoder::new(SampleRate::Hz48000, Channels::Stereo)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
        debug!(
            "AudiopusDecoder erstellt: {}Hz, {} Kanaele, frame={}",
            EMPFANGS_RATE, EMPFANGS_KANAELE, EMPFANGS_FRAME
        );
        Ok(Self { decoder })
    }
}

impl OpusDecoder for AudiopusDecoder {
    fn dekodieren(&mut self, frame: &[u8]) -> AudioResult<Bytes> {
        let mut puffer = vec![0i16; EMPFANGS_FRAME * EMPFANGS_KANAELE];
        let dekodiert = self
            .decoder
            .decode(Some(frame), &mut puffer, false)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        puffer.truncate(dekodiert * EMPFANGS_KANAELE);
        let mut bytes = BytesMut::with_capacity(puffer.len() * 2);
        for sample in puffer {
            bytes.put_i16_le(sample);
        }
        Ok(bytes.freeze())
    }
}

/// Standard-Fabrik fuer [`AudiopusDecoder`]
#[derive(Default)]
pub struct AudiopusDecoderFactory;

impl DecoderFactory for AudiopusDecoderFactory {
    fn erstellen(&self) -> AudioResult<Box<dyn OpusDecoder>> {
        Ok(Box::new(AudiopusDecoder::new()?))
    }
}
