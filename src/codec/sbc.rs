//! Fixed-rate low-complexity codec
//!
//! Frame-oriented constant-bitrate coding with the standard enumerated
//! parameter set: sampling frequency, channel mode, block length, subband
//! count, allocation method, and a bitpool quality value bounded by the
//! protocol-mandated range. For a given configuration every frame has the
//! same length, so the frame length doubles as the packetization bound.
//!
//! Frames are self-delimiting: a sync byte, a parameters byte, the
//! operating bitpool, a CRC over the payload, then per channel a scale
//! byte and the quantized samples. The decoder rescans for the sync byte
//! after any corruption and silently drops frames failing the CRC.

use bytes::Bytes;

use crate::codec::bits::{sign_extend, BitReader, BitWriter};
use crate::codec::{CodecAdapter, CodecInit, DecodeOutput};
use crate::error::CodecError;

pub const CONFIG_SIZE: usize = 4;
pub const MIN_BITPOOL: u8 = 2;
pub const MAX_BITPOOL: u8 = 250;

/// Sampling frequency masks, byte 0 bits 4-7
pub const FREQ_16000: u8 = 0x08;
pub const FREQ_32000: u8 = 0x04;
pub const FREQ_44100: u8 = 0x02;
pub const FREQ_48000: u8 = 0x01;

/// Channel mode masks, byte 0 bits 0-3
pub const MODE_MONO: u8 = 0x08;
pub const MODE_DUAL_CHANNEL: u8 = 0x04;
pub const MODE_STEREO: u8 = 0x02;
pub const MODE_JOINT_STEREO: u8 = 0x01;

/// Block length masks, byte 1 bits 4-7
pub const BLOCKS_4: u8 = 0x08;
pub const BLOCKS_8: u8 = 0x04;
pub const BLOCKS_12: u8 = 0x02;
pub const BLOCKS_16: u8 = 0x01;

/// Subband count masks, byte 1 bits 2-3
pub const SUBBANDS_4: u8 = 0x02;
pub const SUBBANDS_8: u8 = 0x01;

/// Allocation method masks, byte 1 bits 0-1
pub const ALLOCATION_SNR: u8 = 0x02;
pub const ALLOCATION_LOUDNESS: u8 = 0x01;

const SYNC: u8 = 0x9C;
const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Allocation {
    Snr,
    Loudness,
}

/// Fixed-rate codec engine for one transport.
#[derive(Debug)]
pub struct SbcCodec {
    sample_rate: u32,
    channels: usize,
    blocks: usize,
    subbands: usize,
    bitpool: u8,
    /// Quantizer width derived from the bitpool.
    bits: u32,
    /// Fixed encoded frame length for this configuration.
    frame_len: usize,
    /// Parameters byte echoed in every frame header.
    params: u8,
}

impl SbcCodec {
    fn quantizer_bits(bitpool: u8) -> u32 {
        (2 + u32::from(bitpool) / 16).min(16)
    }

    fn payload_len(&self) -> usize {
        let payload_bits = self.channels * (8 + self.blocks * self.subbands * self.bits as usize);
        (payload_bits + 7) / 8
    }

    /// Decode one verified frame payload; `None` marks the frame corrupt.
    fn parse_frame(&self, frame: &[u8]) -> Option<Vec<i16>> {
        let mut r = BitReader::new(&frame[HEADER_LEN..]);
        let per_channel = self.blocks * self.subbands;
        let mut pcm = vec![0i16; per_channel * self.channels];
        for ch in 0..self.channels {
            let shift = r.read_bits(8)?;
            if shift > 16 {
                return None;
            }
            for i in 0..per_channel {
                let q = sign_extend(r.read_bits(self.bits)?, self.bits);
                let s = (q << shift).clamp(i32::from(i16::MIN), i32::from(i16::MAX));
                pcm[i * self.channels + ch] = s as i16;
            }
        }
        Some(pcm)
    }
}

impl CodecInit for SbcCodec {
    const NAME: &'static str = "SBC";

    fn init(config: &[u8]) -> Result<Self, CodecError> {
        if config.len() != CONFIG_SIZE {
            return Err(CodecError::InvalidConfigSize {
                expected: CONFIG_SIZE,
                actual: config.len(),
            });
        }

        let freq = config[0] >> 4;
        let (sample_rate, freq_code) = match freq {
            f if f == FREQ_16000 => (16000, 0u8),
            f if f == FREQ_32000 => (32000, 1),
            f if f == FREQ_44100 => (44100, 2),
            f if f == FREQ_48000 => (48000, 3),
            _ => {
                return Err(CodecError::InvalidField {
                    field: "sampling frequency",
                    value: u32::from(freq),
                })
            }
        };

        let mode = config[0] & 0x0F;
        let channels = match mode {
            m if m == MODE_MONO => 1,
            m if m == MODE_DUAL_CHANNEL || m == MODE_STEREO || m == MODE_JOINT_STEREO => 2,
            _ => {
                return Err(CodecError::InvalidField {
                    field: "channel mode",
                    value: u32::from(mode),
                })
            }
        };

        let blk = config[1] >> 4;
        let (blocks, blocks_code) = match blk {
            b if b == BLOCKS_4 => (4, 0u8),
            b if b == BLOCKS_8 => (8, 1),
            b if b == BLOCKS_12 => (12, 2),
            b if b == BLOCKS_16 => (16, 3),
            _ => {
                return Err(CodecError::InvalidField {
                    field: "block length",
                    value: u32::from(blk),
                })
            }
        };

        let sb = (config[1] >> 2) & 0x03;
        let subbands = match sb {
            s if s == SUBBANDS_4 => 4,
            s if s == SUBBANDS_8 => 8,
            _ => {
                return Err(CodecError::InvalidField {
                    field: "subband count",
                    value: u32::from(sb),
                })
            }
        };

        let alloc = config[1] & 0x03;
        let allocation = match alloc {
            a if a == ALLOCATION_SNR => Allocation::Snr,
            a if a == ALLOCATION_LOUDNESS => Allocation::Loudness,
            _ => {
                return Err(CodecError::InvalidField {
                    field: "allocation method",
                    value: u32::from(alloc),
                })
            }
        };

        let (min, max) = (config[2], config[3]);
        if min < MIN_BITPOOL || max > MAX_BITPOOL || min > max {
            return Err(CodecError::InvalidBitpool { min, max });
        }

        // Operate at the negotiated bitpool ceiling.
        let bitpool = max;
        let bits = Self::quantizer_bits(bitpool);

        let params = (blocks_code << 6)
            | (((subbands == 8) as u8) << 5)
            | (((channels == 2) as u8) << 4)
            | (((allocation == Allocation::Snr) as u8) << 3)
            | (freq_code << 1);

        let mut codec = Self {
            sample_rate,
            channels,
            blocks,
            subbands,
            bitpool,
            bits,
            frame_len: 0,
            params,
        };
        codec.frame_len = HEADER_LEN + codec.payload_len();
        Ok(codec)
    }
}

impl CodecAdapter for SbcCodec {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn frame_samples(&self) -> usize {
        self.blocks * self.subbands * self.channels
    }

    fn max_frame_len(&self) -> usize {
        self.frame_len
    }

    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, CodecError> {
        if pcm.len() != self.frame_samples() {
            return Err(CodecError::InvalidFrameSize(pcm.len()));
        }

        let mut w = BitWriter::with_capacity(self.payload_len());
        for ch in 0..self.channels {
            let channel = pcm.iter().skip(ch).step_by(self.channels);
            let peak = channel
                .clone()
                .map(|s| u32::from(s.unsigned_abs()))
                .max()
                .unwrap_or(0);
            // Magnitude bits plus sign; the shift drops precision the
            // quantizer width cannot carry.
            let needed = 33 - peak.leading_zeros();
            let shift = needed.saturating_sub(self.bits);
            w.write_bits(shift, 8);
            for s in channel {
                w.write_bits((i32::from(*s) >> shift) as u32, self.bits);
            }
        }
        let payload = w.into_bytes();

        let mut frame = Vec::with_capacity(self.frame_len);
        frame.push(SYNC);
        frame.push(self.params);
        frame.push(self.bitpool);
        frame.push(crc8(&payload));
        frame.extend_from_slice(&payload);
        debug_assert_eq!(frame.len(), self.frame_len);
        Ok(Bytes::from(frame))
    }

    fn decode(&mut self, window: &[u8]) -> Result<DecodeOutput, CodecError> {
        let mut out = DecodeOutput::default();
        while out.consumed < window.len() {
            let rem = &window[out.consumed..];
            if rem[0] != SYNC {
                match rem.iter().position(|&b| b == SYNC) {
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
            if rem.len() < self.frame_len {
                // Frame not yet complete
                break;
            }
            let frame = &rem[..self.frame_len];
            if frame[1] != self.params
                || frame[2] != self.bitpool
                || frame[3] != crc8(&frame[HEADER_LEN..])
            {
                // False sync byte or corrupt frame; skip it and rescan
                out.consumed += 1;
                continue;
            }
            match self.parse_frame(frame) {
                Some(pcm) => {
                    out.pcm.extend_from_slice(&pcm);
                    out.consumed += self.frame_len;
                }
                None => {
                    out.consumed += 1;
                }
            }
        }
        Ok(out)
    }
}

fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0x0F;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x1D
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Configuration blob for the common 44.1 kHz stereo setup: 16 blocks,
/// 8 subbands, loudness allocation, and the given bitpool range.
pub fn config_44100_stereo(min_bitpool: u8, max_bitpool: u8) -> [u8; CONFIG_SIZE] {
    [
        (FREQ_44100 << 4) | MODE_STEREO,
        (BLOCKS_16 << 4) | (SUBBANDS_8 << 2) | ALLOCATION_LOUDNESS,
        min_bitpool,
        max_bitpool,
    ]
}
