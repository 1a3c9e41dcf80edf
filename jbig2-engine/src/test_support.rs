//! Encoders used to produce fixtures for the decoder tests.

use crate::arithmetic_decoder::{Context, QE_TABLE};
use crate::bitmap::Bitmap;
use crate::decode::AdaptiveTemplatePixel;
use crate::decode::generic::{GenericContextModel, Template};
use crate::decode::generic_refinement::{RefinementContextModel, RefinementParams};
use crate::huffman_table::{HuffmanTable, LineKind};

/// The MQ encoder of Annex E.2.
pub(crate) struct MqEncoder {
    a: u32,
    c: u32,
    counter: u32,
    /// The byte not yet written, which may still receive a carry.
    pending: Option<u8>,
    out: Vec<u8>,
}

impl MqEncoder {
    pub(crate) fn new() -> Self {
        Self {
            a: 0x8000,
            c: 0,
            counter: 12,
            pending: None,
            out: Vec::new(),
        }
    }

    pub(crate) fn encode(&mut self, context: &mut Context, bit: u32) {
        let state = QE_TABLE[context.index as usize];
        self.a -= state.qe;

        if bit == context.mps {
            if self.a & 0x8000 != 0 {
                self.c += state.qe;
                return;
            }

            if self.a < state.qe {
                self.a = state.qe;
            } else {
                self.c += state.qe;
            }
            context.index = state.nmps;
        } else {
            if self.a < state.qe {
                self.c += state.qe;
            } else {
                self.a = state.qe;
            }
            if state.switch {
                context.mps = 1 - context.mps;
            }
            context.index = state.nlps;
        }

        loop {
            self.a <<= 1;
            self.c <<= 1;
            self.counter -= 1;
            if self.counter == 0 {
                self.byte_out();
            }
            if self.a & 0x8000 != 0 {
                break;
            }
        }
    }

    fn byte_out(&mut self) {
        let pending = self.pending.unwrap_or(0);

        if pending == 0xFF {
            self.emit((self.c >> 20) as u8);
            self.c &= 0xF_FFFF;
            self.counter = 7;
        } else if self.c < 0x800_0000 {
            self.emit((self.c >> 19) as u8);
            self.c &= 0x7_FFFF;
            self.counter = 8;
        } else {
            let carried = pending + 1;
            if let Some(byte) = self.pending.as_mut() {
                *byte = carried;
            }
            if carried == 0xFF {
                self.c &= 0x7FF_FFFF;
                self.emit((self.c >> 20) as u8);
                self.c &= 0xF_FFFF;
                self.counter = 7;
            } else {
                self.emit((self.c >> 19) as u8);
                self.c &= 0x7_FFFF;
                self.counter = 8;
            }
        }
    }

    fn emit(&mut self, byte: u8) {
        if let Some(previous) = self.pending.replace(byte) {
            self.out.push(previous);
        }
    }

    /// FLUSH, followed by the 0xFFAC marker.
    pub(crate) fn finish(mut self) -> Vec<u8> {
        let temp = self.c + self.a;
        self.c |= 0xFFFF;
        if self.c >= temp {
            self.c -= 0x8000;
        }
        self.c <<= self.counter;
        self.byte_out();
        self.c <<= self.counter;
        self.byte_out();

        if let Some(last) = self.pending.take() {
            if last != 0xFF {
                self.out.push(last);
            }
        }
        self.out.extend_from_slice(&[0xFF, 0xAC]);

        self.out
    }

    /// Encode a value with an IAx procedure (Annex A.2), `None` is OOB.
    pub(crate) fn encode_integer(&mut self, contexts: &mut [Context], value: Option<i32>) {
        let mut prev = 1_u32;
        let mut put = |encoder: &mut Self, bit: u32| {
            encoder.encode(&mut contexts[prev as usize], bit);
            prev = if prev < 256 {
                (prev << 1) | bit
            } else {
                (((prev << 1) | bit) & 511) | 256
            };
        };

        let Some(value) = value else {
            for bit in [1, 0, 0, 0] {
                put(self, bit);
            }
            return;
        };

        let magnitude = value.unsigned_abs();
        let (prefix, bits, offset): (&[u32], u32, u32) = match magnitude {
            0..=3 => (&[0], 2, 0),
            4..=19 => (&[1, 0], 4, 4),
            20..=83 => (&[1, 1, 0], 6, 20),
            84..=339 => (&[1, 1, 1, 0], 8, 84),
            340..=4435 => (&[1, 1, 1, 1, 0], 12, 340),
            _ => (&[1, 1, 1, 1, 1], 32, 4436),
        };

        put(self, u32::from(value < 0));
        for bit in prefix {
            put(self, *bit);
        }
        let rest = magnitude - offset;
        for i in (0..bits).rev() {
            put(self, (rest >> i) & 1);
        }
    }

    /// Encode a symbol ID with the IAID procedure (Annex A.3).
    pub(crate) fn encode_symbol_id(&mut self, contexts: &mut [Context], code_len: u32, id: u32) {
        let mut prev = 1_usize;
        for i in (0..code_len).rev() {
            let bit = (id >> i) & 1;
            self.encode(&mut contexts[prev], bit);
            prev = (prev << 1) | bit as usize;
        }
    }

    /// Encode a bitmap with generic region coding (TPGDON off).
    pub(crate) fn encode_generic(
        &mut self,
        contexts: &mut [Context],
        bitmap: &Bitmap,
        template: Template,
        at_pixels: &[AdaptiveTemplatePixel],
    ) {
        let model = GenericContextModel::new(template, at_pixels);

        for y in 0..bitmap.height() {
            for x in 0..bitmap.width() {
                let cx = model.context(bitmap, x, y);
                self.encode(&mut contexts[cx as usize], u32::from(bitmap.get_pixel(x, y)));
            }
        }
    }

    /// Encode `target` as a refinement of `params.reference`, including the
    /// SLTP bits when `params.tpgron` is set.
    pub(crate) fn encode_refinement(
        &mut self,
        contexts: &mut [Context],
        target: &Bitmap,
        params: &RefinementParams<'_>,
    ) {
        let model = RefinementContextModel::new(
            params.template,
            params.at_pixels,
            params.dx,
            params.dy,
        );
        let reference = params.reference;
        let sltp_context = params.template.sltp_context();
        let mut ltp = false;

        for y in 0..target.height() {
            if params.tpgron {
                let typical = (0..target.width()).all(|x| {
                    model
                        .typical_value(reference, x, y)
                        .is_none_or(|value| value == target.get_pixel(x, y))
                });
                self.encode(&mut contexts[sltp_context], u32::from(typical != ltp));
                ltp = typical;
            }

            for x in 0..target.width() {
                if ltp && model.typical_value(reference, x, y).is_some() {
                    continue;
                }

                let cx = model.context(target, reference, x, y);
                self.encode(&mut contexts[cx as usize], u32::from(target.get_pixel(x, y)));
            }
        }
    }
}

/// An MSB-first bit writer for assembling Huffman-coded fixtures.
#[derive(Default)]
pub(crate) struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn write(&mut self, value: u32, count: u8) {
        for i in (0..count).rev() {
            if self.bit_len % 8 == 0 {
                self.bytes.push(0);
            }
            if (value >> i) & 1 == 1 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 0x80 >> (self.bit_len % 8);
            }
            self.bit_len += 1;
        }
    }

    /// Write a string of `0` and `1` characters.
    pub(crate) fn write_str(&mut self, bits: &str) {
        for c in bits.chars() {
            self.write(u32::from(c == '1'), 1);
        }
    }

    pub(crate) fn align(&mut self) {
        self.bit_len = self.bytes.len() * 8;
    }

    /// Write the code of `value` (`None` for OOB) in `table`, preferring
    /// plain range lines over the lower range line.
    pub(crate) fn write_huffman(&mut self, table: &HuffmanTable, value: Option<i32>) {
        let codes = table.codes();
        let entry = match value {
            None => codes.iter().find(|c| c.line.kind == LineKind::OutOfBand),
            Some(value) => codes
                .iter()
                .filter(|c| c.line.kind == LineKind::Value)
                .find(|c| {
                    let low = i64::from(c.line.range_low);
                    let value = i64::from(value);
                    value >= low && value - low < (1_i64 << c.line.range_len)
                })
                .or_else(|| {
                    codes.iter().find(|c| {
                        c.line.kind == LineKind::Lower && value <= c.line.range_low
                    })
                }),
        };
        let entry = entry.unwrap();

        self.write(entry.code as u32, entry.line.prefix_len);
        if let Some(value) = value {
            let offset = match entry.line.kind {
                LineKind::Lower => i64::from(entry.line.range_low) - i64::from(value),
                _ => i64::from(value) - i64::from(entry.line.range_low),
            };
            self.write(offset as u32, entry.line.range_len);
        }
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) {
        self.align();
        self.bytes.extend_from_slice(bytes);
        self.bit_len = self.bytes.len() * 8;
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Build a bitmap from rows of `#` (black) and `.` (white).
pub(crate) fn bitmap_from_rows(rows: &[&str]) -> Bitmap {
    let height = rows.len() as u32;
    let width = rows.first().map_or(0, |r| r.len()) as u32;
    let mut bitmap = Bitmap::new(width, height).unwrap();

    for (y, row) in rows.iter().enumerate() {
        for (x, c) in row.chars().enumerate() {
            bitmap.set_pixel(x as u32, y as u32, c == '#');
        }
    }

    bitmap
}

/// Assemble a segment header with short-form references and a 1-byte page association.
pub(crate) fn segment_header(
    number: u32,
    segment_type: u8,
    referred: &[u8],
    page: u8,
    data_len: u32,
) -> Vec<u8> {
    let mut out = number.to_be_bytes().to_vec();
    out.push(segment_type & 0x3F);
    out.push((referred.len() as u8) << 5);
    out.extend_from_slice(referred);
    out.push(page);
    out.extend_from_slice(&data_len.to_be_bytes());
    out
}

/// A complete segment: header followed by its data.
pub(crate) fn segment(number: u32, segment_type: u8, referred: &[u8], page: u8, data: &[u8]) -> Vec<u8> {
    let mut out = segment_header(number, segment_type, referred, page, data.len() as u32);
    out.extend_from_slice(data);
    out
}
