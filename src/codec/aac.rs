//! Variable-bitrate codec
//!
//! Delta coding with a per-channel adaptive bit width, so quiet or smooth
//! content produces smaller frames than transients. Frames carry an
//! ADTS-style header: a two-byte sync word followed by a big-endian
//! length field, which lets the decoder walk frame boundaries in a byte
//! stream without decoding the payload first.

use bytes::Bytes;

use crate::codec::bits::{sign_extend, BitReader, BitWriter};
use crate::codec::{CodecAdapter, CodecInit, DecodeOutput};
use crate::error::CodecError;

pub const CONFIG_SIZE: usize = 6;

/// Object type masks, byte 0
pub const OBJECT_MPEG2_LC: u8 = 0x80;
pub const OBJECT_MPEG4_LC: u8 = 0x40;
pub const OBJECT_MPEG4_LTP: u8 = 0x20;
pub const OBJECT_MPEG4_SCA: u8 = 0x10;

/// Channel masks, low nibble of byte 2
pub const CHANNELS_1: u8 = 0x08;
pub const CHANNELS_2: u8 = 0x04;

/// 12-bit sampling frequency mask spanning byte 1 and the high nibble of
/// byte 2.
const FREQUENCIES: [(u16, u32); 12] = [
    (0x800, 8000),
    (0x400, 11025),
    (0x200, 12000),
    (0x100, 16000),
    (0x080, 22050),
    (0x040, 24000),
    (0x020, 32000),
    (0x010, 44100),
    (0x008, 48000),
    (0x004, 64000),
    (0x002, 88200),
    (0x001, 96000),
];

const SYNC0: u8 = 0xFF;
const SYNC1: u8 = 0xF1;
const HEADER_LEN: usize = 4;
/// Samples per channel in one frame
const FRAME_SAMPLES: usize = 1024;
/// Deltas between two s16 samples span [-65535, 65535]
const MAX_DELTA_BITS: u32 = 17;
const WIDTH_BITS: u32 = 5;

/// Variable-bitrate codec engine for one transport.
#[derive(Debug)]
pub struct AacCodec {
    sample_rate: u32,
    channels: usize,
    bitrate: u32,
    vbr: bool,
    max_frame_len: usize,
}

impl AacCodec {
    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }

    pub fn vbr(&self) -> bool {
        self.vbr
    }

    fn parse_payload(&self, payload: &[u8]) -> Option<Vec<i16>> {
        let mut r = BitReader::new(payload);
        let mut pcm = vec![0i16; FRAME_SAMPLES * self.channels];
        for ch in 0..self.channels {
            let first = sign_extend(r.read_bits(16)?, 16);
            let width = r.read_bits(WIDTH_BITS)?;
            if width == 0 || width > MAX_DELTA_BITS {
                return None;
            }
            let mut prev = first;
            pcm[ch] = first as i16;
            for i in 1..FRAME_SAMPLES {
                let delta = sign_extend(r.read_bits(width)?, width);
                let s = prev + delta;
                if !(i32::from(i16::MIN)..=i32::from(i16::MAX)).contains(&s) {
                    return None;
                }
                pcm[i * self.channels + ch] = s as i16;
                prev = s;
            }
        }
        Some(pcm)
    }
}

impl CodecInit for AacCodec {
    const NAME: &'static str = "AAC";

    fn init(config: &[u8]) -> Result<Self, CodecError> {
        if config.len() != CONFIG_SIZE {
            return Err(CodecError::InvalidConfigSize {
                expected: CONFIG_SIZE,
                actual: config.len(),
            });
        }

        let object = config[0];
        if ![
            OBJECT_MPEG2_LC,
            OBJECT_MPEG4_LC,
            OBJECT_MPEG4_LTP,
            OBJECT_MPEG4_SCA,
        ]
        .contains(&object)
        {
            return Err(CodecError::InvalidField {
                field: "object type",
                value: u32::from(object),
            });
        }

        let freq_mask = (u16::from(config[1]) << 4) | u16::from(config[2] >> 4);
        let sample_rate = FREQUENCIES
            .iter()
            .find(|(mask, _)| *mask == freq_mask)
            .map(|(_, hz)| *hz)
            .ok_or(CodecError::InvalidField {
                field: "sampling frequency",
                value: u32::from(freq_mask),
            })?;

        let ch_mask = config[2] & 0x0F;
        let channels = match ch_mask {
            m if m == CHANNELS_1 => 1,
            m if m == CHANNELS_2 => 2,
            _ => {
                return Err(CodecError::InvalidField {
                    field: "channel mode",
                    value: u32::from(ch_mask),
                })
            }
        };

        let vbr = config[3] & 0x80 != 0;
        let bitrate = (u32::from(config[3] & 0x7F) << 16)
            | (u32::from(config[4]) << 8)
            | u32::from(config[5]);
        if bitrate == 0 {
            return Err(CodecError::InvalidField {
                field: "bitrate",
                value: bitrate,
            });
        }

        let per_channel_bits = 16 + WIDTH_BITS as usize + (FRAME_SAMPLES - 1) * MAX_DELTA_BITS as usize;
        let max_frame_len = HEADER_LEN + (channels * per_channel_bits + 7) / 8;

        Ok(Self {
            sample_rate,
            channels,
            bitrate,
            vbr,
            max_frame_len,
        })
    }
}

impl CodecAdapter for AacCodec {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn frame_samples(&self) -> usize {
        FRAME_SAMPLES * self.channels
    }

    fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, CodecError> {
        if pcm.len() != self.frame_samples() {
            return Err(CodecError::InvalidFrameSize(pcm.len()));
        }

        let mut w = BitWriter::with_capacity(self.max_frame_len);
        for ch in 0..self.channels {
            let mut channel = pcm.iter().skip(ch).step_by(self.channels);
            let first = i32::from(*channel.next().unwrap_or(&0));
            // Width covering the largest delta in this channel
            let mut width = 1;
            let mut prev = first;
            for s in channel.clone() {
                let delta = i32::from(*s) - prev;
                width = width.max(34 - (delta.unsigned_abs().leading_zeros() + 1));
                prev = i32::from(*s);
            }

            w.write_bits(first as u32, 16);
            w.write_bits(width, WIDTH_BITS);
            let mut prev = first;
            for s in channel {
                w.write_bits((i32::from(*s) - prev) as u32, width);
                prev = i32::from(*s);
            }
        }
        let payload = w.into_bytes();

        let frame_len = HEADER_LEN + payload.len();
        let mut frame = Vec::with_capacity(frame_len);
        frame.push(SYNC0);
        frame.push(SYNC1);
        frame.extend_from_slice(&(frame_len as u16).to_be_bytes());
        frame.extend_from_slice(&payload);
        debug_assert!(frame.len() <= self.max_frame_len);
        Ok(Bytes::from(frame))
    }

    fn decode(&mut self, window: &[u8]) -> Result<DecodeOutput, CodecError> {
        let mut out = DecodeOutput::default();
        while out.consumed < window.len() {
            let rem = &window[out.consumed..];
            if rem[0] != SYNC0 {
                match rem.iter().position(|&b| b == SYNC0) {
                    Some(skip) => {
                        tracing::debug!("resync: skipped {skip} bytes");
                        out.consumed += skip;
                        continue;
                    }
                    None => {
                        out.consumed = window.len();
                        break;
                    }
                }
            }
            if rem.len() < HEADER_LEN {
                // Header not yet complete
                break;
            }
            if rem[1] != SYNC1 {
                out.consumed += 1;
                continue;
            }
            let frame_len = usize::from(u16::from_be_bytes([rem[2], rem[3]]));
            if frame_len <= HEADER_LEN || frame_len > self.max_frame_len {
                // False sync word
                out.consumed += 1;
                continue;
            }
            if rem.len() < frame_len {
                break;
            }
            match self.parse_payload(&rem[HEADER_LEN..frame_len]) {
                Some(pcm) => {
                    out.pcm.extend_from_slice(&pcm);
                    out.consumed += frame_len;
                }
                None => {
                    // Corrupt frame; drop it whole and rescan
                    tracing::debug!("dropped corrupt frame of {frame_len} bytes");
                    out.consumed += frame_len;
                }
            }
        }
        Ok(out)
    }
}

/// Configuration blob for MPEG-4 LC at 44.1 kHz stereo with the given
/// VBR flag and bitrate.
pub fn config_44100_stereo(vbr: bool, bitrate: u32) -> [u8; CONFIG_SIZE] {
    let freq_mask: u16 = 0x010;
    [
        OBJECT_MPEG4_LC,
        (freq_mask >> 4) as u8,
        (((freq_mask & 0x0F) as u8) << 4) | CHANNELS_2,
        (u8::from(vbr) << 7) | ((bitrate >> 16) & 0x7F) as u8,
        (bitrate >> 8) as u8,
        bitrate as u8,
    ]
}
