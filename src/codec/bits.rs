//! MSB-first bit packing used by the codec engines

/// Packs values MSB-first into a byte vector.
#[derive(Debug, Default)]
pub struct BitWriter {
    buf: Vec<u8>,
    acc: u64,
    nbits: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            acc: 0,
            nbits: 0,
        }
    }

    /// Append the low `bits` bits of `value`. `bits` must be 1..=32.
    pub fn write_bits(&mut self, value: u32, bits: u32) {
        debug_assert!((1..=32).contains(&bits));
        let mask = if bits == 32 { u32::MAX } else { (1 << bits) - 1 };
        self.acc = (self.acc << bits) | u64::from(value & mask);
        self.nbits += bits;
        while self.nbits >= 8 {
            self.nbits -= 8;
            self.buf.push((self.acc >> self.nbits) as u8);
        }
    }

    /// Flush, zero-padding the final partial byte.
    pub fn into_bytes(mut self) -> Vec<u8> {
        if self.nbits > 0 {
            let pad = 8 - self.nbits;
            self.buf.push(((self.acc << pad) & 0xFF) as u8);
        }
        self.buf
    }
}

/// Reads values MSB-first from a byte slice.
#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Read `bits` bits (1..=32); `None` when the slice is exhausted.
    pub fn read_bits(&mut self, bits: u32) -> Option<u32> {
        debug_assert!((1..=32).contains(&bits));
        if self.pos + bits as usize > self.data.len() * 8 {
            return None;
        }
        let mut out: u64 = 0;
        let mut remaining = bits;
        while remaining > 0 {
            let byte = self.data[self.pos / 8];
            let avail = 8 - (self.pos % 8) as u32;
            let take = avail.min(remaining);
            let shifted = (byte >> (avail - take)) & ((1u16 << take) - 1) as u8;
            out = (out << take) | u64::from(shifted);
            self.pos += take as usize;
            remaining -= take;
        }
        Some(out as u32)
    }
}

/// Interpret `value` as a signed integer of `bits` width.
pub fn sign_extend(value: u32, bits: u32) -> i32 {
    debug_assert!((1..=32).contains(&bits));
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_round_trip_across_byte_boundaries() {
        let mut w = BitWriter::new();
        w.write_bits(0b101, 3);
        w.write_bits(0x1FF, 9);
        w.write_bits(0, 1);
        w.write_bits(0x3FFFF, 18);
        let bytes = w.into_bytes();

        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read_bits(3), Some(0b101));
        assert_eq!(r.read_bits(9), Some(0x1FF));
        assert_eq!(r.read_bits(1), Some(0));
        assert_eq!(r.read_bits(18), Some(0x3FFFF));
    }

    #[test]
    fn reader_refuses_to_run_past_end() {
        let mut r = BitReader::new(&[0xAB]);
        assert_eq!(r.read_bits(8), Some(0xAB));
        assert_eq!(r.read_bits(1), None);
    }

    #[test]
    fn sign_extension() {
        assert_eq!(sign_extend(0b111, 3), -1);
        assert_eq!(sign_extend(0b011, 3), 3);
        assert_eq!(sign_extend(0b100, 3), -4);
        assert_eq!(sign_extend(0xFFFF, 16), -1);
    }

    #[test]
    fn signed_values_round_trip() {
        for v in [-4096i32, -1, 0, 1, 4095] {
            let mut w = BitWriter::new();
            w.write_bits(v as u32, 13);
            let bytes = w.into_bytes();
            let mut r = BitReader::new(&bytes);
            assert_eq!(sign_extend(r.read_bits(13).unwrap(), 13), v);
        }
    }
}
