//! Codec adapters
//!
//! Each supported codec implements the same three-operation contract:
//! construct from the negotiated configuration blob, encode one PCM frame
//! to compressed bytes, and decode a prefix of an arbitrarily-chunked
//! compressed byte stream back to PCM. The IO loops are written once and
//! parametrized over this contract.

pub mod aac;
pub mod aptx;
pub mod bits;
pub mod sbc;

pub use aac::AacCodec;
pub use aptx::AptxCodec;
pub use sbc::SbcCodec;

use std::time::Duration;

use bytes::Bytes;

use crate::error::CodecError;
use crate::transport::CodecId;

/// Result of one decode call over a byte window.
#[derive(Debug, Default)]
pub struct DecodeOutput {
    /// Decoded interleaved s16le samples, possibly from several frames.
    pub pcm: Vec<i16>,
    /// Bytes of the window that were consumed and must be dropped by the
    /// caller. Zero with empty `pcm` means the window does not yet hold a
    /// complete frame.
    pub consumed: usize,
}

/// Per-transport codec instance.
///
/// PCM is interleaved signed 16-bit throughout. `encode` takes exactly
/// [`frame_samples`](CodecAdapter::frame_samples) samples and its output
/// never exceeds [`max_frame_len`](CodecAdapter::max_frame_len), so it can
/// be packetized against a known MTU without look-ahead. `decode` consumes
/// every complete frame in the window, resynchronizes past corrupt input,
/// and asks for more bytes by returning `consumed == 0`.
pub trait CodecAdapter: Send {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> usize;

    /// Total interleaved samples in one codec frame.
    fn frame_samples(&self) -> usize;

    /// Upper bound on the length of one encoded frame.
    fn max_frame_len(&self) -> usize;

    /// Nominal real-time duration of one codec frame.
    fn frame_duration(&self) -> Duration {
        let per_channel = (self.frame_samples() / self.channels()) as u64;
        Duration::from_nanos(per_channel * 1_000_000_000 / u64::from(self.sample_rate()))
    }

    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, CodecError>;

    fn decode(&mut self, window: &[u8]) -> Result<DecodeOutput, CodecError>;
}

/// Construction half of the adapter contract, kept separate so
/// [`CodecAdapter`] stays object safe.
pub trait CodecInit: CodecAdapter + Sized {
    /// Codec name used in setup diagnostics.
    const NAME: &'static str;

    /// Validate the configuration blob (exact size and every field range)
    /// and build the engine state. Any violation is an init error, never a
    /// runtime error.
    fn init(config: &[u8]) -> Result<Self, CodecError>;
}

/// Build a boxed adapter for dynamic dispatch on the transport codec id.
pub fn build_adapter(
    codec: CodecId,
    config: &[u8],
) -> Result<Box<dyn CodecAdapter>, CodecError> {
    Ok(match codec {
        CodecId::Sbc => Box::new(SbcCodec::init(config)?),
        CodecId::Aac => Box::new(AacCodec::init(config)?),
        CodecId::Aptx => Box::new(AptxCodec::init(config)?),
    })
}

pub(crate) fn samples_to_bytes(pcm: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pcm.len() * 2);
    for s in pcm {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

pub(crate) fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_byte_conversion_round_trips() {
        let pcm: Vec<i16> = vec![i16::MIN, -1, 0, 1, i16::MAX];
        assert_eq!(bytes_to_samples(&samples_to_bytes(&pcm)), pcm);
    }

    #[test]
    fn frame_duration_follows_frame_geometry() {
        let config = sbc::config_44100_stereo(2, 250);
        let adapter = build_adapter(CodecId::Sbc, &config).unwrap();
        // 128 samples per channel at 44.1 kHz
        assert_eq!(adapter.frame_duration(), Duration::from_nanos(2_902_494));

        let config = aac::config_44100_stereo(true, 0xFFFF);
        let adapter = build_adapter(CodecId::Aac, &config).unwrap();
        // 1024 samples per channel at 44.1 kHz
        assert_eq!(adapter.frame_duration(), Duration::from_nanos(23_219_954));
    }

    #[test]
    fn build_adapter_dispatches_on_codec_id() {
        let config = sbc::config_44100_stereo(2, 250);
        let sbc = build_adapter(CodecId::Sbc, &config).unwrap();
        assert_eq!(sbc.sample_rate(), 44100);

        let err = build_adapter(CodecId::Sbc, &[0x00]).err().unwrap();
        assert!(matches!(err, CodecError::InvalidConfigSize { .. }));
    }
}
