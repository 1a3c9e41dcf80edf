//! Text region decoding (6.4) and text region segments (7.4.3).
//!
//! The same procedure places the symbol instances of refinement/aggregate
//! symbols in symbol dictionaries, so the decoding state lives in
//! [`TextCoder`], which the symbol dictionary decoder builds itself.

use super::generic_refinement::{RefinementParams, RefinementTemplate, decode_refinement};
use super::{
    AdaptiveTemplatePixel, AtPixels, RegionBitmap, RegionSegmentInfo, parse_refinement_at_pixels,
};
use crate::arithmetic_decoder::{ArithmeticDecoder, Context, fresh_contexts};
use crate::bitmap::{Bitmap, CombinationOperator};
use crate::error::{
    DecodeError, FormatError, HuffmanError, RegionError, Result, SymbolError, bail,
};
use crate::huffman_table::{
    HuffmanTable, Line, StandardTable, StandardTables, TableChoice, TableSelector,
};
use crate::integer_decoder::{IntegerDecoder, SymbolIdDecoder, symbol_code_length};
use crate::reader::Reader;

/// The corner of a symbol instance that its coordinates refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReferenceCorner {
    BottomLeft,
    TopLeft,
    BottomRight,
    TopRight,
}

impl ReferenceCorner {
    fn from_value(value: u8) -> Self {
        match value & 0x03 {
            0 => Self::BottomLeft,
            1 => Self::TopLeft,
            2 => Self::BottomRight,
            _ => Self::TopRight,
        }
    }

    fn is_right(self) -> bool {
        matches!(self, Self::BottomRight | Self::TopRight)
    }

    fn is_bottom(self) -> bool {
        matches!(self, Self::BottomLeft | Self::BottomRight)
    }
}

/// The parameters of the text region decoding procedure (Table 9).
#[derive(Debug, Clone)]
pub(crate) struct TextParams<'a> {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) instances: u32,
    pub(crate) log_strip_size: u8,
    pub(crate) corner: ReferenceCorner,
    pub(crate) transposed: bool,
    /// How symbols are drawn into the region.
    pub(crate) operator: CombinationOperator,
    pub(crate) default_pixel: bool,
    pub(crate) ds_offset: i32,
    pub(crate) refine: bool,
    pub(crate) refinement_template: RefinementTemplate,
    pub(crate) refinement_at_pixels: &'a [AdaptiveTemplatePixel],
}

/// The integer decoders of arithmetic text region coding (Table 31).
#[derive(Debug, Clone)]
pub(crate) struct TextContexts {
    iadt: IntegerDecoder,
    iafs: IntegerDecoder,
    iads: IntegerDecoder,
    iait: IntegerDecoder,
    iari: IntegerDecoder,
    iardw: IntegerDecoder,
    iardh: IntegerDecoder,
    pub(crate) iardx: IntegerDecoder,
    pub(crate) iardy: IntegerDecoder,
    pub(crate) iaid: SymbolIdDecoder,
}

impl TextContexts {
    pub(crate) fn new(symbol_code_len: u32) -> Self {
        Self {
            iadt: IntegerDecoder::new(),
            iafs: IntegerDecoder::new(),
            iads: IntegerDecoder::new(),
            iait: IntegerDecoder::new(),
            iari: IntegerDecoder::new(),
            iardw: IntegerDecoder::new(),
            iardh: IntegerDecoder::new(),
            iardx: IntegerDecoder::new(),
            iardy: IntegerDecoder::new(),
            iaid: SymbolIdDecoder::new(symbol_code_len),
        }
    }
}

/// The Huffman tables of a text region (7.4.3.1.6).
#[derive(Debug, Clone, Copy)]
pub(crate) struct TextTables<'a> {
    first_s: &'a HuffmanTable,
    delta_s: &'a HuffmanTable,
    delta_t: &'a HuffmanTable,
    refinement_width: &'a HuffmanTable,
    refinement_height: &'a HuffmanTable,
    refinement_x: &'a HuffmanTable,
    refinement_y: &'a HuffmanTable,
    refinement_size: &'a HuffmanTable,
}

impl<'a> TextTables<'a> {
    /// The fixed tables used for symbols made of several instances in
    /// Huffman-coded symbol dictionaries (Table 17).
    pub(crate) fn aggregate(standard: &'a StandardTables) -> Self {
        Self {
            first_s: standard.get(StandardTable::F),
            delta_s: standard.get(StandardTable::H),
            delta_t: standard.get(StandardTable::K),
            refinement_width: standard.get(StandardTable::O),
            refinement_height: standard.get(StandardTable::O),
            refinement_x: standard.get(StandardTable::O),
            refinement_y: standard.get(StandardTable::O),
            refinement_size: standard.get(StandardTable::A),
        }
    }

    /// Select tables from the Huffman flags of a text region segment.
    /// Custom tables are taken in the order the flags are listed in.
    fn select(flags: u16, refine: bool, selector: &mut TableSelector<'a>) -> Result<Self> {
        let field = |shift: u16| ((flags >> shift) & 0x03) as u8;

        let first_s = selector.select(match field(0) {
            0 => TableChoice::Standard(StandardTable::F),
            1 => TableChoice::Standard(StandardTable::G),
            3 => TableChoice::Custom,
            _ => bail!(HuffmanError::InvalidSelection),
        })?;
        let delta_s = selector.select(match field(2) {
            0 => TableChoice::Standard(StandardTable::H),
            1 => TableChoice::Standard(StandardTable::I),
            2 => TableChoice::Standard(StandardTable::J),
            _ => TableChoice::Custom,
        })?;
        let delta_t = selector.select(match field(4) {
            0 => TableChoice::Standard(StandardTable::K),
            1 => TableChoice::Standard(StandardTable::L),
            2 => TableChoice::Standard(StandardTable::M),
            _ => TableChoice::Custom,
        })?;

        let mut refinement = |shift: u16| -> Result<&'a HuffmanTable> {
            if !refine {
                return selector.select(TableChoice::Standard(StandardTable::O));
            }

            selector.select(match field(shift) {
                0 => TableChoice::Standard(StandardTable::N),
                1 => TableChoice::Standard(StandardTable::O),
                3 => TableChoice::Custom,
                _ => bail!(HuffmanError::InvalidSelection),
            })
        };
        let refinement_width = refinement(6)?;
        let refinement_height = refinement(8)?;
        let refinement_x = refinement(10)?;
        let refinement_y = refinement(12)?;

        let refinement_size = selector.select(if refine && flags & 0x4000 != 0 {
            TableChoice::Custom
        } else {
            TableChoice::Standard(StandardTable::A)
        })?;

        Ok(Self {
            first_s,
            delta_s,
            delta_t,
            refinement_width,
            refinement_height,
            refinement_x,
            refinement_y,
            refinement_size,
        })
    }
}

/// How symbol IDs are coded in Huffman mode.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SymbolIdCoding<'a> {
    /// The code table of a text region segment (7.4.3.1.7).
    Table(&'a HuffmanTable),
    /// Plain fixed-length numbers, as inside symbol dictionaries.
    Fixed(u8),
}

/// The source of every value the text region procedure decodes.
pub(crate) enum TextCoder<'a, 'd> {
    Huffman {
        reader: &'a mut Reader<'d>,
        tables: TextTables<'a>,
        symbol_ids: SymbolIdCoding<'a>,
    },
    Arithmetic {
        decoder: &'a mut ArithmeticDecoder<'d>,
        contexts: &'a mut TextContexts,
        refinement_contexts: &'a mut [Context],
    },
}

impl TextCoder<'_, '_> {
    /// DT, in units of strips (6.4.6).
    fn strip_delta_t(&mut self) -> Result<i32> {
        match self {
            Self::Huffman { reader, tables, .. } => tables.delta_t.decode_value(reader),
            Self::Arithmetic {
                decoder, contexts, ..
            } => contexts.iadt.decode_value(decoder, SymbolError::UnexpectedOob),
        }
    }

    /// DFS (6.4.7).
    fn first_s(&mut self) -> Result<i32> {
        match self {
            Self::Huffman { reader, tables, .. } => tables.first_s.decode_value(reader),
            Self::Arithmetic {
                decoder, contexts, ..
            } => contexts.iafs.decode_value(decoder, SymbolError::UnexpectedOob),
        }
    }

    /// IDS, `None` at the end of a strip (6.4.8).
    fn delta_s(&mut self) -> Result<Option<i32>> {
        match self {
            Self::Huffman { reader, tables, .. } => tables.delta_s.decode(reader),
            Self::Arithmetic {
                decoder, contexts, ..
            } => contexts.iads.decode(decoder),
        }
    }

    /// CURT (6.4.9).
    fn instance_t(&mut self, log_strip_size: u8) -> Result<i32> {
        if log_strip_size == 0 {
            return Ok(0);
        }

        match self {
            Self::Huffman { reader, .. } => Ok(reader.read_bits(log_strip_size)? as i32),
            Self::Arithmetic {
                decoder, contexts, ..
            } => contexts.iait.decode_value(decoder, SymbolError::UnexpectedOob),
        }
    }

    /// ID (6.4.10).
    fn symbol_id(&mut self) -> Result<usize> {
        match self {
            Self::Huffman {
                reader, symbol_ids, ..
            } => match symbol_ids {
                SymbolIdCoding::Table(table) => Ok(table.decode_unsigned(reader)? as usize),
                SymbolIdCoding::Fixed(len) => Ok(reader.read_bits(*len)? as usize),
            },
            Self::Arithmetic {
                decoder, contexts, ..
            } => Ok(contexts.iaid.decode(decoder) as usize),
        }
    }

    /// RI, whether the instance is refined (6.4.11).
    fn refinement_flag(&mut self) -> Result<bool> {
        match self {
            Self::Huffman { reader, .. } => Ok(reader.read_bit()? == 1),
            Self::Arithmetic {
                decoder, contexts, ..
            } => Ok(contexts
                .iari
                .decode_value(decoder, SymbolError::UnexpectedOob)?
                != 0),
        }
    }

    /// RDW, RDH, RDX and RDY (6.4.11.1 to 6.4.11.4).
    fn refinement_deltas(&mut self) -> Result<[i32; 4]> {
        match self {
            Self::Huffman { reader, tables, .. } => Ok([
                tables.refinement_width.decode_value(reader)?,
                tables.refinement_height.decode_value(reader)?,
                tables.refinement_x.decode_value(reader)?,
                tables.refinement_y.decode_value(reader)?,
            ]),
            Self::Arithmetic {
                decoder, contexts, ..
            } => {
                let oob = SymbolError::UnexpectedOob;
                Ok([
                    contexts.iardw.decode_value(decoder, oob)?,
                    contexts.iardh.decode_value(decoder, oob)?,
                    contexts.iardx.decode_value(decoder, oob)?,
                    contexts.iardy.decode_value(decoder, oob)?,
                ])
            }
        }
    }

    /// Decode the refined bitmap of an instance. In Huffman mode it is
    /// arithmetic coded in a byte-aligned block of its own.
    fn refine(&mut self, params: &RefinementParams<'_>) -> Result<Bitmap> {
        match self {
            Self::Huffman { reader, tables, .. } => {
                let size = tables.refinement_size.decode_unsigned(reader)?;
                reader.align();
                let data = reader.read_bytes(size as usize)?;

                let mut decoder = ArithmeticDecoder::new(data);
                let mut contexts = fresh_contexts(params.template.context_bits());
                decode_refinement(&mut decoder, &mut contexts, params)
            }
            Self::Arithmetic {
                decoder,
                refinement_contexts,
                ..
            } => decode_refinement(decoder, refinement_contexts, params),
        }
    }
}

/// Decode a text region (6.4.5).
pub(crate) fn decode_text(
    coder: &mut TextCoder<'_, '_>,
    symbols: &[&Bitmap],
    params: &TextParams<'_>,
) -> Result<Bitmap> {
    let mut region = Bitmap::new_filled(params.width, params.height, params.default_pixel)?;
    let strip_size = 1_i64 << params.log_strip_size;

    let mut strip_t = -(i64::from(coder.strip_delta_t()?) * strip_size);
    let mut first_s = 0_i64;
    let mut count = 0_u32;

    while count < params.instances {
        strip_t = add(strip_t, i64::from(coder.strip_delta_t()?) * strip_size)?;

        first_s = add(first_s, i64::from(coder.first_s()?))?;
        let mut cur_s = first_s;
        let mut first_in_strip = true;

        loop {
            if !first_in_strip {
                let Some(delta_s) = coder.delta_s()? else {
                    break;
                };
                cur_s = add(cur_s, i64::from(delta_s) + i64::from(params.ds_offset))?;
            }
            first_in_strip = false;

            if count >= params.instances {
                bail!(SymbolError::TooManySymbols);
            }

            let t = add(strip_t, i64::from(coder.instance_t(params.log_strip_size)?))?;
            let id = coder.symbol_id()?;
            let symbol = *symbols.get(id).ok_or(SymbolError::OutOfRange)?;

            let refined = if params.refine && coder.refinement_flag()? {
                Some(refine_instance(coder, symbol, params)?)
            } else {
                None
            };
            let bitmap = refined.as_ref().unwrap_or(symbol);

            let (width, height) = (i64::from(bitmap.width()), i64::from(bitmap.height()));
            let (extent, far_side_first) = if params.transposed {
                (height, params.corner.is_bottom())
            } else {
                (width, params.corner.is_right())
            };

            if far_side_first {
                cur_s = add(cur_s, extent - 1)?;
            }

            let right = if params.corner.is_right() { width - 1 } else { 0 };
            let bottom = if params.corner.is_bottom() { height - 1 } else { 0 };
            let (x, y) = if params.transposed {
                (t - right, cur_s - bottom)
            } else {
                (cur_s - right, t - bottom)
            };

            region.combine(bitmap, x, y, params.operator);

            if !far_side_first {
                cur_s = add(cur_s, extent - 1)?;
            }

            count += 1;
        }
    }

    Ok(region)
}

fn refine_instance(
    coder: &mut TextCoder<'_, '_>,
    symbol: &Bitmap,
    params: &TextParams<'_>,
) -> Result<Bitmap> {
    let [rdw, rdh, rdx, rdy] = coder.refinement_deltas()?;

    let width = i64::from(symbol.width()) + i64::from(rdw);
    let height = i64::from(symbol.height()) + i64::from(rdh);
    let (Ok(width), Ok(height)) = (u32::try_from(width), u32::try_from(height)) else {
        bail!(RegionError::InvalidDimension);
    };

    let dx = rdw.div_euclid(2).checked_add(rdx).ok_or(DecodeError::Overflow)?;
    let dy = rdh.div_euclid(2).checked_add(rdy).ok_or(DecodeError::Overflow)?;

    coder.refine(&RefinementParams {
        width,
        height,
        template: params.refinement_template,
        reference: symbol,
        dx,
        dy,
        tpgron: false,
        at_pixels: params.refinement_at_pixels,
    })
}

fn add(a: i64, b: i64) -> Result<i64> {
    a.checked_add(b).ok_or(DecodeError::Overflow)
}

/// The data header of a text region segment (7.4.3.1).
#[derive(Debug, Clone)]
pub(crate) struct TextRegionHeader {
    pub(crate) info: RegionSegmentInfo,
    pub(crate) huffman: bool,
    pub(crate) refine: bool,
    pub(crate) log_strip_size: u8,
    pub(crate) corner: ReferenceCorner,
    pub(crate) transposed: bool,
    pub(crate) operator: CombinationOperator,
    pub(crate) default_pixel: bool,
    pub(crate) ds_offset: i32,
    pub(crate) refinement_template: RefinementTemplate,
    pub(crate) huffman_flags: u16,
    pub(crate) refinement_at_pixels: AtPixels,
    pub(crate) instances: u32,
    /// The symbol ID code table, present in Huffman mode.
    pub(crate) symbol_ids: Option<HuffmanTable>,
}

impl TextRegionHeader {
    pub(crate) fn parse(reader: &mut Reader<'_>, symbol_count: u32) -> Result<Self> {
        let info = RegionSegmentInfo::parse(reader)?;

        let flags = reader.read_u16()?;
        let huffman = flags & 0x0001 != 0;
        let refine = flags & 0x0002 != 0;
        let log_strip_size = ((flags >> 2) & 0x03) as u8;
        let corner = ReferenceCorner::from_value((flags >> 4) as u8);
        let transposed = flags & 0x0040 != 0;
        let operator = CombinationOperator::from_value(((flags >> 7) & 0x03) as u8)?;
        let default_pixel = flags & 0x0200 != 0;
        // Five-bit two's complement.
        let ds_offset = (((flags >> 10) & 0x1F) as i32 ^ 0x10) - 0x10;
        let refinement_template = RefinementTemplate::from_value((flags >> 15) as u8);

        let huffman_flags = if huffman { reader.read_u16()? } else { 0 };
        if huffman_flags & 0x8000 != 0 {
            bail!(FormatError::ReservedBits);
        }

        let refinement_at_pixels = if refine && refinement_template == RefinementTemplate::Template0
        {
            parse_refinement_at_pixels(reader)?
        } else {
            AtPixels::new()
        };

        let instances = reader.read_u32()?;

        let symbol_ids = if huffman {
            Some(parse_symbol_id_table(reader, symbol_count)?)
        } else {
            None
        };

        Ok(Self {
            info,
            huffman,
            refine,
            log_strip_size,
            corner,
            transposed,
            operator,
            default_pixel,
            ds_offset,
            refinement_template,
            huffman_flags,
            refinement_at_pixels,
            instances,
            symbol_ids,
        })
    }

    fn params(&self) -> TextParams<'_> {
        TextParams {
            width: self.info.width,
            height: self.info.height,
            instances: self.instances,
            log_strip_size: self.log_strip_size,
            corner: self.corner,
            transposed: self.transposed,
            operator: self.operator,
            default_pixel: self.default_pixel,
            ds_offset: self.ds_offset,
            refine: self.refine,
            refinement_template: self.refinement_template,
            refinement_at_pixels: &self.refinement_at_pixels,
        }
    }
}

/// Read the run-length coded symbol ID code table (7.4.3.1.7).
fn parse_symbol_id_table(reader: &mut Reader<'_>, symbol_count: u32) -> Result<HuffmanTable> {
    let lengths = read_symbol_code_lengths(reader, symbol_count as usize)?;
    reader.align();

    let lines: Vec<Line> = lengths
        .iter()
        .enumerate()
        .map(|(id, len)| Line::value(id as i32, *len, 0))
        .collect();

    Ok(HuffmanTable::build(&lines))
}

fn read_symbol_code_lengths(reader: &mut Reader<'_>, count: usize) -> Result<Vec<u8>> {
    let mut run_lines = Vec::with_capacity(35);
    for code in 0..35 {
        run_lines.push(Line::value(code, reader.read_bits(4)? as u8, 0));
    }
    let run_codes = HuffmanTable::build(&run_lines);

    let mut lengths = Vec::with_capacity(count);
    while lengths.len() < count {
        let (length, repeat) = match run_codes.decode_value(reader)? {
            length @ 0..=31 => (length as u8, 1),
            32 => {
                let previous = *lengths.last().ok_or(HuffmanError::InvalidCode)?;
                (previous, 3 + reader.read_bits(2)? as usize)
            }
            33 => (0, 3 + reader.read_bits(3)? as usize),
            34 => (0, 11 + reader.read_bits(7)? as usize),
            _ => bail!(HuffmanError::InvalidCode),
        };

        if lengths.len() + repeat > count {
            bail!(HuffmanError::InvalidCode);
        }
        lengths.resize(lengths.len() + repeat, length);
    }

    Ok(lengths)
}

/// Decode the data part of a text region segment.
pub(crate) fn decode_region<'a>(
    reader: &mut Reader<'a>,
    decoder: &mut ArithmeticDecoder<'a>,
    symbols: &[&Bitmap],
    custom_tables: &[&HuffmanTable],
    standard: &StandardTables,
) -> Result<RegionBitmap> {
    let symbol_count = u32::try_from(symbols.len()).map_err(|_| DecodeError::Overflow)?;
    let header = TextRegionHeader::parse(reader, symbol_count)?;

    if symbols.is_empty() && header.instances > 0 {
        bail!(SymbolError::NoSymbols);
    }

    ltrace!(
        "text region {}x{} at ({}, {}), {} instances of {} symbols, huffman: {}, refine: {}",
        header.info.width,
        header.info.height,
        header.info.x,
        header.info.y,
        header.instances,
        symbols.len(),
        header.huffman,
        header.refine
    );

    let params = header.params();
    let bitmap = match &header.symbol_ids {
        Some(symbol_ids) => {
            let mut selector = TableSelector::new(standard, custom_tables);
            let tables = TextTables::select(header.huffman_flags, header.refine, &mut selector)?;
            let mut coder = TextCoder::Huffman {
                reader,
                tables,
                symbol_ids: SymbolIdCoding::Table(symbol_ids),
            };
            decode_text(&mut coder, symbols, &params)?
        }
        None => {
            decoder.start(reader.tail());
            let mut contexts = TextContexts::new(symbol_code_length(symbol_count));
            let mut refinement_contexts =
                fresh_contexts(header.refinement_template.context_bits());
            let mut coder = TextCoder::Arithmetic {
                decoder,
                contexts: &mut contexts,
                refinement_contexts: &mut refinement_contexts,
            };
            decode_text(&mut coder, symbols, &params)?
        }
    };

    Ok(RegionBitmap::new(bitmap, &header.info))
}
