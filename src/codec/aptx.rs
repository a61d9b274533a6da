//! Vendor fixed-rate codec
//!
//! A headerless 4:1 codec built on backward-adaptive delta modulation:
//! each 16-bit sample becomes a 4-bit code, and both ends adapt their
//! predictor from the coded stream itself, so no per-frame side data is
//! transmitted. The stream has no sync framing; the decoder consumes any
//! whole number of codeword groups and leaves the remainder buffered.

use bytes::Bytes;

use crate::codec::{CodecAdapter, CodecInit, DecodeOutput};
use crate::error::CodecError;

pub const CONFIG_SIZE: usize = 7;
pub const VENDOR_ID: u32 = 0x0000_004F;
pub const CODEC_ID: u16 = 0x0001;

/// Sampling frequency masks, byte 6 bits 4-7
pub const FREQ_16000: u8 = 0x08;
pub const FREQ_32000: u8 = 0x04;
pub const FREQ_44100: u8 = 0x02;
pub const FREQ_48000: u8 = 0x01;

/// Channel mode masks, byte 6 bits 0-3
pub const MODE_MONO: u8 = 0x01;
pub const MODE_STEREO: u8 = 0x02;

/// Samples per channel in one codeword group
const GROUP_SAMPLES: usize = 4;
/// Groups gathered into one codec frame on the encode side
const GROUPS_PER_FRAME: usize = 32;

const STEP_TABLE: [i32; 89] = [
    7, 8, 9, 10, 11, 12, 13, 14, 16, 17, 19, 21, 23, 25, 28, 31, 34, 37, 41, 45, 50, 55, 60, 66,
    73, 80, 88, 97, 107, 118, 130, 143, 157, 173, 190, 209, 230, 253, 279, 307, 337, 371, 408,
    449, 494, 544, 598, 658, 724, 796, 876, 963, 1060, 1166, 1282, 1411, 1552, 1707, 1878, 2066,
    2272, 2499, 2749, 3024, 3327, 3660, 4026, 4428, 4871, 5358, 5894, 6484, 7132, 7845, 8630,
    9493, 10442, 11487, 12635, 13899, 15289, 16818, 18500, 20350, 22385, 24623, 27086, 29794,
    32767,
];

const INDEX_TABLE: [i32; 8] = [-1, -1, -1, -1, 2, 4, 6, 8];

/// Per-channel backward-adaptive quantizer state.
#[derive(Debug, Default, Clone)]
struct AdpcmState {
    predictor: i32,
    index: i32,
}

impl AdpcmState {
    /// Apply one 4-bit code, returning the reconstructed sample. Both
    /// encoder and decoder advance through this, which keeps their
    /// predictors in lockstep.
    fn advance(&mut self, code: u8) -> i16 {
        let step = STEP_TABLE[self.index as usize];
        let mut diff = step >> 3;
        if code & 4 != 0 {
            diff += step;
        }
        if code & 2 != 0 {
            diff += step >> 1;
        }
        if code & 1 != 0 {
            diff += step >> 2;
        }
        if code & 8 != 0 {
            self.predictor -= diff;
        } else {
            self.predictor += diff;
        }
        self.predictor = self
            .predictor
            .clamp(i32::from(i16::MIN), i32::from(i16::MAX));
        self.index = (self.index + INDEX_TABLE[(code & 7) as usize]).clamp(0, 88);
        self.predictor as i16
    }

    fn encode(&mut self, sample: i16) -> u8 {
        let step = STEP_TABLE[self.index as usize];
        let mut diff = i32::from(sample) - self.predictor;
        let mut code: u8 = 0;
        if diff < 0 {
            code = 8;
            diff = -diff;
        }
        if diff >= step {
            code |= 4;
            diff -= step;
        }
        if diff >= step >> 1 {
            code |= 2;
            diff -= step >> 1;
        }
        if diff >= step >> 2 {
            code |= 1;
        }
        self.advance(code);
        code
    }
}

/// Vendor codec engine for one transport.
#[derive(Debug)]
pub struct AptxCodec {
    sample_rate: u32,
    channels: usize,
    encoders: Vec<AdpcmState>,
    decoders: Vec<AdpcmState>,
}

impl AptxCodec {
    /// Bytes holding one codeword group across all channels.
    fn group_bytes(&self) -> usize {
        GROUP_SAMPLES * self.channels / 2
    }
}

impl CodecInit for AptxCodec {
    const NAME: &'static str = "aptX";

    fn init(config: &[u8]) -> Result<Self, CodecError> {
        if config.len() != CONFIG_SIZE {
            return Err(CodecError::InvalidConfigSize {
                expected: CONFIG_SIZE,
                actual: config.len(),
            });
        }

        let vendor = u32::from_le_bytes([config[0], config[1], config[2], config[3]]);
        if vendor != VENDOR_ID {
            return Err(CodecError::InvalidField {
                field: "vendor id",
                value: vendor,
            });
        }

        let codec = u16::from_le_bytes([config[4], config[5]]);
        if codec != CODEC_ID {
            return Err(CodecError::InvalidField {
                field: "vendor codec id",
                value: u32::from(codec),
            });
        }

        let freq = config[6] >> 4;
        let sample_rate = match freq {
            f if f == FREQ_16000 => 16000,
            f if f == FREQ_32000 => 32000,
            f if f == FREQ_44100 => 44100,
            f if f == FREQ_48000 => 48000,
            _ => {
                return Err(CodecError::InvalidField {
                    field: "sampling frequency",
                    value: u32::from(freq),
                })
            }
        };

        let mode = config[6] & 0x0F;
        let channels = match mode {
            m if m == MODE_MONO => 1,
            m if m == MODE_STEREO => 2,
            _ => {
                return Err(CodecError::InvalidField {
                    field: "channel mode",
                    value: u32::from(mode),
                })
            }
        };

        Ok(Self {
            sample_rate,
            channels,
            encoders: vec![AdpcmState::default(); channels],
            decoders: vec![AdpcmState::default(); channels],
        })
    }
}

impl CodecAdapter for AptxCodec {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn frame_samples(&self) -> usize {
        GROUP_SAMPLES * GROUPS_PER_FRAME * self.channels
    }

    fn max_frame_len(&self) -> usize {
        GROUPS_PER_FRAME * self.group_bytes()
    }

    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, CodecError> {
        if pcm.len() != self.frame_samples() {
            return Err(CodecError::InvalidFrameSize(pcm.len()));
        }

        let mut out = Vec::with_capacity(self.max_frame_len());
        let mut pending: Option<u8> = None;
        for chunk in pcm.chunks_exact(self.channels) {
            for (ch, s) in chunk.iter().enumerate() {
                let code = self.encoders[ch].encode(*s);
                match pending.take() {
                    Some(hi) => out.push((hi << 4) | code),
                    None => pending = Some(code),
                }
            }
        }
        debug_assert!(pending.is_none());
        debug_assert_eq!(out.len(), self.max_frame_len());
        Ok(Bytes::from(out))
    }

    fn decode(&mut self, window: &[u8]) -> Result<DecodeOutput, CodecError> {
        let usable = window.len() - window.len() % self.group_bytes();
        let mut out = DecodeOutput {
            pcm: Vec::with_capacity(usable * 4),
            consumed: usable,
        };
        let mut ch = 0;
        for byte in &window[..usable] {
            for code in [byte >> 4, byte & 0x0F] {
                out.pcm.push(self.decoders[ch].advance(code));
                ch = (ch + 1) % self.channels;
            }
        }
        Ok(out)
    }
}

/// Configuration blob for the stereo 44.1 kHz vendor setup.
pub fn config_44100_stereo() -> [u8; CONFIG_SIZE] {
    let mut config = [0u8; CONFIG_SIZE];
    config[..4].copy_from_slice(&VENDOR_ID.to_le_bytes());
    config[4..6].copy_from_slice(&CODEC_ID.to_le_bytes());
    config[6] = (FREQ_44100 << 4) | MODE_STEREO;
    config
}
