//! The MQ arithmetic decoder (Annex E).
//!
//! The decoder receives a context for every binary decision and adapts the
//! probability estimate stored in that context after each decision. Contexts
//! are plain values owned by the region decoders, which lets a region keep
//! its statistics across several bitmaps (for example all symbols of one
//! dictionary) while the decoder itself is restarted for every segment.

/// Decoder registers (Table E.1).
#[derive(Debug, Clone)]
pub(crate) struct ArithmeticDecoder<'a> {
    data: &'a [u8],
    /// The C register, holding Chigh and Clow.
    c: u32,
    /// The A register (interval size).
    a: u32,
    /// Index of the byte currently being consumed (BP).
    position: usize,
    /// Number of bits left in Clow before the next BYTEIN (CT).
    counter: u32,
}

impl<'a> ArithmeticDecoder<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        let mut decoder = Self {
            data,
            c: 0,
            a: 0,
            position: 0,
            counter: 0,
        };
        decoder.start(data);

        decoder
    }

    /// Restart the decoder on new data (INITDEC, Figure E.20).
    pub(crate) fn start(&mut self, data: &'a [u8]) {
        self.data = data;
        self.position = 0;
        self.c = u32::from(self.byte_at(0) ^ 0xFF) << 16;
        self.byte_in();
        self.c <<= 7;
        self.counter -= 7;
        self.a = 0x8000;
    }

    /// Decode one bit with the given context (DECODE, Figure E.15).
    #[inline(always)]
    pub(crate) fn decode(&mut self, context: &mut Context) -> u32 {
        let state = &QE_TABLE[context.index as usize];
        self.a -= state.qe;

        if (self.c >> 16) < self.a {
            if self.a & 0x8000 != 0 {
                return context.mps;
            }

            let bit = self.mps_exchange(context, state);
            self.renormalize();
            bit
        } else {
            self.c -= self.a << 16;
            let bit = self.lps_exchange(context, state);
            self.renormalize();
            bit
        }
    }

    /// MPS_EXCHANGE (Figure E.16).
    #[inline(always)]
    fn mps_exchange(&mut self, context: &mut Context, state: &QeState) -> u32 {
        if self.a < state.qe {
            let bit = 1 - context.mps;
            if state.switch {
                context.mps = 1 - context.mps;
            }
            context.index = state.nlps;
            bit
        } else {
            context.index = state.nmps;
            context.mps
        }
    }

    /// LPS_EXCHANGE (Figure E.17).
    #[inline(always)]
    fn lps_exchange(&mut self, context: &mut Context, state: &QeState) -> u32 {
        let bit = if self.a < state.qe {
            context.index = state.nmps;
            context.mps
        } else {
            let bit = 1 - context.mps;
            if state.switch {
                context.mps = 1 - context.mps;
            }
            context.index = state.nlps;
            bit
        };
        self.a = state.qe;

        bit
    }

    /// RENORMD (Figure E.18).
    #[inline(always)]
    fn renormalize(&mut self) {
        loop {
            if self.counter == 0 {
                self.byte_in();
            }

            self.a <<= 1;
            self.c <<= 1;
            self.counter -= 1;

            if self.a & 0x8000 != 0 {
                break;
            }
        }
    }

    /// BYTEIN (Figure E.19).
    ///
    /// A 0xFF followed by a byte above 0x8F is a marker: the decoder then
    /// stops advancing and keeps feeding 1-bits. Reads past the end of the
    /// data behave the same way.
    #[inline(always)]
    fn byte_in(&mut self) {
        let current = self.byte_at(self.position);

        if current == 0xFF {
            if self.byte_at(self.position + 1) > 0x8F {
                self.counter = 8;
            } else {
                self.position += 1;
                let stuffed = u32::from(self.byte_at(self.position));
                self.c = self.c.wrapping_add(0xFE00).wrapping_sub(stuffed << 9);
                self.counter = 7;
            }
        } else {
            self.position += 1;
            let next = u32::from(self.byte_at(self.position));
            self.c = self.c.wrapping_add(0xFF00).wrapping_sub(next << 8);
            self.counter = 8;
        }
    }

    #[inline(always)]
    fn byte_at(&self, position: usize) -> u8 {
        self.data.get(position).copied().unwrap_or(0xFF)
    }
}

/// The adaptive state of one context: I(CX) and MPS(CX).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Context {
    pub(crate) index: u32,
    pub(crate) mps: u32,
}

/// Create a zeroed context array addressed by `context_bits` bits.
pub(crate) fn fresh_contexts(context_bits: u32) -> Vec<Context> {
    vec![Context::default(); 1 << context_bits]
}

/// Create a context array, reusing `prior` when it has the expected size.
///
/// Used by symbol dictionaries that continue with the statistics a previous
/// dictionary left behind.
pub(crate) fn seeded_contexts(context_bits: u32, prior: Option<&[Context]>) -> Vec<Context> {
    match prior {
        Some(prior) if prior.len() == 1 << context_bits => prior.to_vec(),
        _ => fresh_contexts(context_bits),
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct QeState {
    pub(crate) qe: u32,
    pub(crate) nmps: u32,
    pub(crate) nlps: u32,
    pub(crate) switch: bool,
}

macro_rules! qe_table {
    ($($qe:expr, $nmps:expr, $nlps:expr, $switch:expr);+ $(;)?) => {
        [$(QeState { qe: $qe, nmps: $nmps, nlps: $nlps, switch: $switch != 0 }),+]
    };
}

/// Table E.1: Qe, NMPS, NLPS, SWITCH.
#[rustfmt::skip]
pub(crate) static QE_TABLE: [QeState; 47] = qe_table!(
    0x5601,  1,  1, 1;
    0x3401,  2,  6, 0;
    0x1801,  3,  9, 0;
    0x0AC1,  4, 12, 0;
    0x0521,  5, 29, 0;
    0x0221, 38, 33, 0;
    0x5601,  7,  6, 1;
    0x5401,  8, 14, 0;
    0x4801,  9, 14, 0;
    0x3801, 10, 14, 0;
    0x3001, 11, 17, 0;
    0x2401, 12, 18, 0;
    0x1C01, 13, 20, 0;
    0x1601, 29, 21, 0;
    0x5601, 15, 14, 1;
    0x5401, 16, 14, 0;
    0x5101, 17, 15, 0;
    0x4801, 18, 16, 0;
    0x3801, 19, 17, 0;
    0x3401, 20, 18, 0;
    0x3001, 21, 19, 0;
    0x2801, 22, 19, 0;
    0x2401, 23, 20, 0;
    0x2201, 24, 21, 0;
    0x1C01, 25, 22, 0;
    0x1801, 26, 23, 0;
    0x1601, 27, 24, 0;
    0x1401, 28, 25, 0;
    0x1201, 29, 26, 0;
    0x1101, 30, 27, 0;
    0x0AC1, 31, 28, 0;
    0x09C1, 32, 29, 0;
    0x08A1, 33, 30, 0;
    0x0521, 34, 31, 0;
    0x0441, 35, 32, 0;
    0x02A1, 36, 33, 0;
    0x0221, 37, 34, 0;
    0x0141, 38, 35, 0;
    0x0111, 39, 36, 0;
    0x0085, 40, 37, 0;
    0x0049, 41, 38, 0;
    0x0025, 42, 39, 0;
    0x0015, 43, 40, 0;
    0x0009, 44, 41, 0;
    0x0005, 45, 42, 0;
    0x0001, 45, 43, 0;
    0x5601, 46, 46, 0;
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MqEncoder;

    /// The test sequence of Annex H.2.
    const PLAIN: [u8; 32] = [
        0x00, 0x02, 0x00, 0x51, 0x00, 0x00, 0x00, 0xC0, 0x03, 0x52, 0x87, 0x2A, 0xAA, 0xAA,
        0xAA, 0xAA, 0x82, 0xC0, 0x20, 0x00, 0xFC, 0xD7, 0x9E, 0xF6, 0xBF, 0x7F, 0xED, 0x90,
        0x4F, 0x46, 0xA3, 0xBF,
    ];

    /// Its arithmetic-coded form.
    const CODED: [u8; 30] = [
        0x84, 0xC7, 0x3B, 0xFC, 0xE1, 0xA1, 0x43, 0x04, 0x02, 0x20, 0x00, 0x00, 0x41, 0x0D,
        0xBB, 0x86, 0xF4, 0x31, 0x7F, 0xFF, 0x88, 0xFF, 0x37, 0x47, 0x1A, 0xDB, 0x6A, 0xDF,
        0xFF, 0xAC,
    ];

    fn decode_plain(coded: &[u8]) -> Vec<u8> {
        let mut decoder = ArithmeticDecoder::new(coded);
        let mut context = Context::default();

        PLAIN
            .iter()
            .map(|_| {
                (0..8).fold(0_u8, |byte, _| {
                    (byte << 1) | decoder.decode(&mut context) as u8
                })
            })
            .collect()
    }

    #[test]
    fn annex_h_test_sequence() {
        assert_eq!(decode_plain(&CODED), PLAIN);
    }

    #[test]
    fn decoding_is_deterministic() {
        let first = decode_plain(&CODED);
        let second = decode_plain(&CODED);
        assert_eq!(first, second);

        // Restarting a used decoder must behave like a new one.
        let mut decoder = ArithmeticDecoder::new(&[0x12, 0x34]);
        let mut scratch = Context::default();
        for _ in 0..40 {
            decoder.decode(&mut scratch);
        }
        decoder.start(&CODED);
        let mut context = Context::default();
        let bits: Vec<u32> = (0..64).map(|_| decoder.decode(&mut context)).collect();

        let mut fresh = ArithmeticDecoder::new(&CODED);
        let mut context = Context::default();
        let expected: Vec<u32> = (0..64).map(|_| fresh.decode(&mut context)).collect();
        assert_eq!(bits, expected);
    }

    #[test]
    fn round_trip_with_several_contexts() {
        let bits: Vec<u32> = (0..2000_u32)
            .map(|i| u32::from((i * 7 + i / 13) % 5 == 0))
            .collect();

        let mut encoder = MqEncoder::new();
        let mut contexts = fresh_contexts(2);
        for (i, bit) in bits.iter().enumerate() {
            encoder.encode(&mut contexts[i % 4], *bit);
        }
        let coded = encoder.finish();

        let mut decoder = ArithmeticDecoder::new(&coded);
        let mut contexts = fresh_contexts(2);
        let decoded: Vec<u32> = (0..bits.len())
            .map(|i| decoder.decode(&mut contexts[i % 4]))
            .collect();

        assert_eq!(decoded, bits);
    }

    #[test]
    fn seeded_contexts_require_matching_size() {
        let mut prior = fresh_contexts(3);
        prior[5] = Context { index: 9, mps: 1 };

        assert_eq!(seeded_contexts(3, Some(&prior))[5], prior[5]);
        assert_eq!(seeded_contexts(4, Some(&prior))[5], Context::default());
        assert_eq!(seeded_contexts(3, None).len(), 8);
    }
}
