//! Arithmetic integer decoding (Annex A).
//!
//! Two procedures live here: the IAx procedures that decode signed values
//! (with an out-of-band result) and the IAID procedure that decodes
//! fixed-length symbol IDs.

use crate::arithmetic_decoder::{ArithmeticDecoder, Context, fresh_contexts};
use crate::error::{DecodeError, Result};

/// The extension ladder of Figure A.1: number of value bits and the offset
/// added to them, selected by the count of leading 1-bits in the prefix.
const LADDER: [(u32, i64); 6] = [(2, 0), (4, 4), (6, 20), (8, 84), (12, 340), (32, 4436)];

/// One IAx integer decoding procedure with its 512 contexts.
#[derive(Debug, Clone)]
pub(crate) struct IntegerDecoder {
    contexts: Vec<Context>,
}

impl IntegerDecoder {
    pub(crate) fn new() -> Self {
        Self {
            contexts: fresh_contexts(9),
        }
    }

    /// Decode one value; `None` means OOB.
    pub(crate) fn decode(&mut self, decoder: &mut ArithmeticDecoder<'_>) -> Result<Option<i32>> {
        let mut prev = 1_u32;
        let negative = self.bit(decoder, &mut prev) == 1;

        let mut step = 0;
        while step < LADDER.len() - 1 && self.bit(decoder, &mut prev) == 1 {
            step += 1;
        }

        let (bits, offset) = LADDER[step];
        let mut raw = 0_i64;
        for _ in 0..bits {
            raw = (raw << 1) | i64::from(self.bit(decoder, &mut prev));
        }

        let magnitude = raw + offset;
        match (negative, magnitude) {
            (true, 0) => Ok(None),
            (true, v) => Ok(Some(i32::try_from(-v).map_err(|_| DecodeError::Overflow)?)),
            (false, v) => Ok(Some(i32::try_from(v).map_err(|_| DecodeError::Overflow)?)),
        }
    }

    /// Decode a value that must not be OOB.
    pub(crate) fn decode_value(
        &mut self,
        decoder: &mut ArithmeticDecoder<'_>,
        oob: impl Into<DecodeError>,
    ) -> Result<i32> {
        self.decode(decoder)?.ok_or_else(|| oob.into())
    }

    /// Decode a bit with context PREV and shift it into PREV (A.2, step 3).
    #[inline(always)]
    fn bit(&mut self, decoder: &mut ArithmeticDecoder<'_>, prev: &mut u32) -> u32 {
        let bit = decoder.decode(&mut self.contexts[*prev as usize]);

        *prev = if *prev < 256 {
            (*prev << 1) | bit
        } else {
            (((*prev << 1) | bit) & 511) | 256
        };

        bit
    }
}

/// The IAID procedure (A.3).
#[derive(Debug, Clone)]
pub(crate) struct SymbolIdDecoder {
    contexts: Vec<Context>,
    code_len: u32,
}

impl SymbolIdDecoder {
    pub(crate) fn new(code_len: u32) -> Self {
        Self {
            contexts: fresh_contexts(code_len),
            code_len,
        }
    }

    #[inline(always)]
    pub(crate) fn decode(&mut self, decoder: &mut ArithmeticDecoder<'_>) -> u32 {
        let mut prev = 1_u32;

        for _ in 0..self.code_len {
            let bit = decoder.decode(&mut self.contexts[prev as usize]);
            prev = (prev << 1) | bit;
        }

        prev - (1 << self.code_len)
    }
}

/// `ceil(log2(count))`, the number of bits needed to address `count` symbols.
pub(crate) fn symbol_code_length(count: u32) -> u32 {
    match count {
        0 | 1 => 0,
        n => 32 - (n - 1).leading_zeros(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MqEncoder;

    #[test]
    fn integers_round_trip_through_every_ladder_step() {
        let values = [
            Some(0),
            Some(3),
            Some(-3),
            None,
            Some(4),
            Some(19),
            Some(-20),
            Some(83),
            Some(84),
            Some(339),
            Some(-340),
            Some(4435),
            Some(4436),
            Some(-1_000_000),
            Some(7),
        ];

        let mut encoder = MqEncoder::new();
        let mut contexts = fresh_contexts(9);
        for value in values {
            encoder.encode_integer(&mut contexts, value);
        }
        let coded = encoder.finish();

        let mut decoder = ArithmeticDecoder::new(&coded);
        let mut integers = IntegerDecoder::new();
        for value in values {
            assert_eq!(integers.decode(&mut decoder).unwrap(), value);
        }
    }

    #[test]
    fn symbol_ids_round_trip() {
        let ids = [0, 5, 12, 3, 15, 15, 1];

        let mut encoder = MqEncoder::new();
        let mut contexts = fresh_contexts(4);
        for id in ids {
            encoder.encode_symbol_id(&mut contexts, 4, id);
        }
        let coded = encoder.finish();

        let mut decoder = ArithmeticDecoder::new(&coded);
        let mut symbol_ids = SymbolIdDecoder::new(4);
        for id in ids {
            assert_eq!(symbol_ids.decode(&mut decoder), id);
        }
    }

    #[test]
    fn code_lengths() {
        assert_eq!(symbol_code_length(0), 0);
        assert_eq!(symbol_code_length(1), 0);
        assert_eq!(symbol_code_length(2), 1);
        assert_eq!(symbol_code_length(3), 2);
        assert_eq!(symbol_code_length(4), 2);
        assert_eq!(symbol_code_length(5), 3);
        assert_eq!(symbol_code_length(256), 8);
    }
}
