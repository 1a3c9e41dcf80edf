//! Huffman tables (Annex B).
//!
//! A table is a list of lines, each describing a value range and the length
//! of the prefix code selecting it. Codes are never transmitted: they follow
//! from the prefix lengths alone (B.3). Decoding scans the lines in code
//! order and reads one more prefix bit whenever the next line needs it.

use std::cell::OnceCell;

use crate::error::{DecodeError, HuffmanError, Result, bail};
use crate::reader::Reader;

/// What a table line decodes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineKind {
    /// `range_low + offset`.
    Value,
    /// The lower range line: `range_low - offset`, where `range_low` is the
    /// top of the range (HTLOW - 1).
    Lower,
    /// The out-of-band line.
    OutOfBand,
}

/// One line of a table before codes are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Line {
    pub(crate) range_low: i32,
    pub(crate) prefix_len: u8,
    pub(crate) range_len: u8,
    pub(crate) kind: LineKind,
}

impl Line {
    pub(crate) const fn value(range_low: i32, prefix_len: u8, range_len: u8) -> Self {
        Self {
            range_low,
            prefix_len,
            range_len,
            kind: LineKind::Value,
        }
    }

    pub(crate) const fn lower(range_high: i32, prefix_len: u8) -> Self {
        Self {
            range_low: range_high,
            prefix_len,
            range_len: 32,
            kind: LineKind::Lower,
        }
    }

    pub(crate) const fn upper(range_low: i32, prefix_len: u8) -> Self {
        Self::value(range_low, prefix_len, 32)
    }

    pub(crate) const fn oob(prefix_len: u8) -> Self {
        Self {
            range_low: 0,
            prefix_len,
            range_len: 0,
            kind: LineKind::OutOfBand,
        }
    }
}

/// A line together with its assigned prefix code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Code {
    pub(crate) line: Line,
    pub(crate) code: u64,
}

/// A table ready for decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HuffmanTable {
    /// Used lines ordered by prefix length, then by their position in the table.
    codes: Vec<Code>,
}

impl HuffmanTable {
    /// Assign canonical prefix codes to the given lines (B.3).
    pub(crate) fn build(lines: &[Line]) -> Self {
        let mut sorted = lines.to_vec();
        // Stable, so lines of equal length keep their table order. Unused lines
        // (prefix length 0) go last and are dropped.
        sorted.sort_by_key(|line| (line.prefix_len == 0, line.prefix_len));
        sorted.retain(|line| line.prefix_len != 0);

        let max_len = sorted.last().map_or(0, |line| line.prefix_len as usize);
        let mut counts = vec![0_u64; max_len + 1];
        for line in &sorted {
            counts[line.prefix_len as usize] += 1;
        }

        let mut next_code = vec![0_u64; max_len + 1];
        for len in 1..=max_len {
            next_code[len] = (next_code[len - 1] + counts[len - 1]) << 1;
        }

        let codes = sorted
            .into_iter()
            .map(|line| {
                let slot = &mut next_code[line.prefix_len as usize];
                let code = *slot;
                *slot += 1;
                Code { line, code }
            })
            .collect();

        Self { codes }
    }

    /// The lines and codes of this table, in code order.
    pub(crate) fn codes(&self) -> &[Code] {
        &self.codes
    }

    /// Whether the prefix lengths describe a valid prefix code.
    fn is_valid(&self) -> bool {
        self.codes.iter().all(|code| {
            code.line.prefix_len <= 32 && code.code < (1_u64 << code.line.prefix_len)
        })
    }

    /// Decode one value (B.4). `None` is the out-of-band value.
    pub(crate) fn decode(&self, reader: &mut Reader<'_>) -> Result<Option<i32>> {
        let mut prefix = 0_u64;
        let mut prefix_len = 0_u8;

        for entry in &self.codes {
            while prefix_len < entry.line.prefix_len {
                prefix = (prefix << 1) | u64::from(reader.read_bit()?);
                prefix_len += 1;
            }

            if prefix != entry.code {
                continue;
            }

            let line = entry.line;
            let value = match line.kind {
                LineKind::OutOfBand => return Ok(None),
                LineKind::Value => {
                    i64::from(line.range_low) + i64::from(reader.read_bits(line.range_len)?)
                }
                LineKind::Lower => {
                    i64::from(line.range_low) - i64::from(reader.read_bits(line.range_len)?)
                }
            };

            return i32::try_from(value)
                .map(Some)
                .map_err(|_| DecodeError::Overflow);
        }

        bail!(HuffmanError::InvalidCode)
    }

    /// Decode a value where OOB is not allowed.
    pub(crate) fn decode_value(&self, reader: &mut Reader<'_>) -> Result<i32> {
        self.decode(reader)?
            .ok_or_else(|| HuffmanError::UnexpectedOob.into())
    }

    /// Decode a value that must not be negative.
    pub(crate) fn decode_unsigned(&self, reader: &mut Reader<'_>) -> Result<u32> {
        u32::try_from(self.decode_value(reader)?).map_err(|_| HuffmanError::InvalidCode.into())
    }

    /// Parse the data of a tables segment (B.2).
    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);

        let flags = reader.read_byte()?;
        let has_oob = flags & 1 != 0;
        let prefix_bits = ((flags >> 1) & 7) + 1;
        let range_bits = ((flags >> 4) & 7) + 1;

        let low = reader.read_i32()?;
        let high = reader.read_i32()?;
        if low >= high {
            bail!(HuffmanError::InvalidTable);
        }

        let mut lines = Vec::new();
        let mut current = i64::from(low);

        while current < i64::from(high) {
            let prefix_len = reader.read_bits(prefix_bits)? as u8;
            let range_len = reader.read_bits(range_bits)? as u8;
            if prefix_len > 32 || range_len > 32 {
                bail!(HuffmanError::InvalidTable);
            }

            // `current` stays within i32 range inside this loop.
            lines.push(Line::value(current as i32, prefix_len, range_len));
            current += 1_i64 << range_len;
        }

        let upper_low = i32::try_from(current).map_err(|_| HuffmanError::InvalidTable)?;
        let lower_high = low.checked_sub(1).ok_or(HuffmanError::InvalidTable)?;

        lines.push(Line::lower(lower_high, reader.read_bits(prefix_bits)? as u8));
        lines.push(Line::upper(upper_low, reader.read_bits(prefix_bits)? as u8));

        if has_oob {
            lines.push(Line::oob(reader.read_bits(prefix_bits)? as u8));
        }

        if lines.iter().any(|line| line.prefix_len > 32) {
            bail!(HuffmanError::InvalidTable);
        }

        let table = Self::build(&lines);
        if !table.is_valid() {
            bail!(HuffmanError::InvalidTable);
        }

        Ok(table)
    }
}

/// The standard tables B.1 to B.15.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StandardTable {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
    M,
    N,
    O,
}

impl StandardTable {
    fn lines(self) -> &'static [Line] {
        match self {
            Self::A => TABLE_A,
            Self::B => TABLE_B,
            Self::C => TABLE_C,
            Self::D => TABLE_D,
            Self::E => TABLE_E,
            Self::F => TABLE_F,
            Self::G => TABLE_G,
            Self::H => TABLE_H,
            Self::I => TABLE_I,
            Self::J => TABLE_J,
            Self::K => TABLE_K,
            Self::L => TABLE_L,
            Self::M => TABLE_M,
            Self::N => TABLE_N,
            Self::O => TABLE_O,
        }
    }
}

/// Standard tables, built on first use and kept for one document.
#[derive(Debug, Default)]
pub(crate) struct StandardTables {
    tables: [OnceCell<HuffmanTable>; 15],
}

impl StandardTables {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, table: StandardTable) -> &HuffmanTable {
        self.tables[table as usize].get_or_init(|| HuffmanTable::build(table.lines()))
    }
}

/// A table selected by a segment's flags: either standard or from a tables segment.
#[derive(Debug, Clone, Copy)]
pub(crate) enum TableChoice {
    Standard(StandardTable),
    Custom,
}

/// Resolves table choices, handing out referred custom tables in order (7.4.2.1.6,
/// 7.4.3.1.6).
pub(crate) struct TableSelector<'a> {
    standard: &'a StandardTables,
    custom: std::slice::Iter<'a, &'a HuffmanTable>,
}

impl<'a> TableSelector<'a> {
    pub(crate) fn new(standard: &'a StandardTables, custom: &'a [&'a HuffmanTable]) -> Self {
        Self {
            standard,
            custom: custom.iter(),
        }
    }

    pub(crate) fn select(&mut self, choice: TableChoice) -> Result<&'a HuffmanTable> {
        match choice {
            TableChoice::Standard(table) => Ok(self.standard.get(table)),
            TableChoice::Custom => self
                .custom
                .next()
                .copied()
                .ok_or_else(|| HuffmanError::MissingTables.into()),
        }
    }
}

macro_rules! table {
    ($($kind:ident ( $($arg:expr),* ));* $(;)?) => {
        &[$(Line::$kind($($arg),*)),*]
    };
}

#[rustfmt::skip]
static TABLE_A: &[Line] = table!(
    value(0, 1, 4); value(16, 2, 8); value(272, 3, 16); upper(65808, 3);
);

#[rustfmt::skip]
static TABLE_B: &[Line] = table!(
    value(0, 1, 0); value(1, 2, 0); value(2, 3, 0); value(3, 4, 3); value(11, 5, 6);
    upper(75, 6); oob(6);
);

#[rustfmt::skip]
static TABLE_C: &[Line] = table!(
    value(-256, 8, 8); value(0, 1, 0); value(1, 2, 0); value(2, 3, 0); value(3, 4, 3);
    value(11, 5, 6); lower(-257, 8); upper(75, 7); oob(6);
);

#[rustfmt::skip]
static TABLE_D: &[Line] = table!(
    value(1, 1, 0); value(2, 2, 0); value(3, 3, 0); value(4, 4, 3); value(12, 5, 6);
    upper(76, 5);
);

#[rustfmt::skip]
static TABLE_E: &[Line] = table!(
    value(-255, 7, 8); value(1, 1, 0); value(2, 2, 0); value(3, 3, 0); value(4, 4, 3);
    value(12, 5, 6); lower(-256, 7); upper(76, 6);
);

#[rustfmt::skip]
static TABLE_F: &[Line] = table!(
    value(-2048, 5, 10); value(-1024, 4, 9); value(-512, 4, 8); value(-256, 4, 7);
    value(-128, 5, 6); value(-64, 5, 5); value(-32, 4, 5); value(0, 2, 7);
    value(128, 3, 7); value(256, 3, 8); value(512, 4, 9); value(1024, 4, 10);
    lower(-2049, 6); upper(2048, 6);
);

#[rustfmt::skip]
static TABLE_G: &[Line] = table!(
    value(-1024, 4, 9); value(-512, 3, 8); value(-256, 4, 7); value(-128, 5, 6);
    value(-64, 5, 5); value(-32, 4, 5); value(0, 4, 5); value(32, 5, 5);
    value(64, 5, 6); value(128, 4, 7); value(256, 3, 8); value(512, 3, 9);
    value(1024, 3, 10); lower(-1025, 5); upper(2048, 5);
);

#[rustfmt::skip]
static TABLE_H: &[Line] = table!(
    value(-15, 8, 3); value(-7, 9, 1); value(-5, 8, 1); value(-3, 9, 0); value(-2, 7, 0);
    value(-1, 4, 0); value(0, 2, 1); value(2, 5, 0); value(3, 6, 0); value(4, 3, 4);
    value(20, 6, 1); value(22, 4, 4); value(38, 4, 5); value(70, 5, 6); value(134, 5, 7);
    value(262, 6, 7); value(390, 7, 8); value(646, 6, 10); lower(-16, 9); upper(1670, 9);
    oob(2);
);

#[rustfmt::skip]
static TABLE_I: &[Line] = table!(
    value(-31, 8, 4); value(-15, 9, 2); value(-11, 8, 2); value(-7, 9, 1); value(-5, 7, 1);
    value(-3, 4, 1); value(-1, 3, 1); value(1, 3, 1); value(3, 5, 1); value(5, 6, 1);
    value(7, 3, 5); value(39, 6, 2); value(43, 4, 5); value(75, 4, 6); value(139, 5, 7);
    value(267, 5, 8); value(523, 6, 8); value(779, 7, 9); value(1291, 6, 11);
    lower(-32, 9); upper(3339, 9); oob(2);
);

#[rustfmt::skip]
static TABLE_J: &[Line] = table!(
    value(-21, 7, 4); value(-5, 8, 0); value(-4, 7, 0); value(-3, 5, 0); value(-2, 2, 2);
    value(2, 5, 0); value(3, 6, 0); value(4, 7, 0); value(5, 8, 0); value(6, 2, 6);
    value(70, 5, 5); value(102, 6, 5); value(134, 6, 6); value(198, 6, 7); value(326, 6, 8);
    value(582, 6, 9); value(1094, 6, 10); value(2118, 7, 11); lower(-22, 8); upper(4166, 8);
    oob(2);
);

#[rustfmt::skip]
static TABLE_K: &[Line] = table!(
    value(1, 1, 0); value(2, 2, 1); value(4, 4, 0); value(5, 4, 1); value(7, 5, 1);
    value(9, 5, 2); value(13, 6, 2); value(17, 7, 2); value(21, 7, 3); value(29, 7, 4);
    value(45, 7, 5); value(77, 7, 6); upper(141, 7);
);

#[rustfmt::skip]
static TABLE_L: &[Line] = table!(
    value(1, 1, 0); value(2, 2, 0); value(3, 3, 1); value(5, 5, 0); value(6, 5, 1);
    value(8, 6, 1); value(10, 7, 0); value(11, 7, 1); value(13, 7, 2); value(17, 7, 3);
    value(25, 7, 4); value(41, 8, 5); upper(73, 8);
);

#[rustfmt::skip]
static TABLE_M: &[Line] = table!(
    value(1, 1, 0); value(2, 3, 0); value(3, 4, 0); value(4, 5, 0); value(5, 4, 1);
    value(7, 3, 3); value(15, 6, 1); value(17, 6, 2); value(21, 6, 3); value(29, 6, 4);
    value(45, 6, 5); value(77, 7, 6); upper(141, 7);
);

#[rustfmt::skip]
static TABLE_N: &[Line] = table!(
    value(-2, 3, 0); value(-1, 3, 0); value(0, 1, 0); value(1, 3, 0); value(2, 3, 0);
);

#[rustfmt::skip]
static TABLE_O: &[Line] = table!(
    value(-24, 7, 4); value(-8, 6, 2); value(-4, 5, 1); value(-2, 4, 0); value(-1, 3, 0);
    value(0, 1, 0); value(1, 3, 0); value(2, 4, 0); value(3, 5, 1); value(5, 6, 2);
    value(9, 7, 4); lower(-25, 7); upper(25, 7);
);
