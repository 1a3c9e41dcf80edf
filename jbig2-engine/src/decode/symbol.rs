//! Symbol dictionary decoding (6.5) and symbol dictionary segments (7.4.2).

use super::generic::{GenericParams, Template, decode_arithmetic, decode_mmr};
use super::generic_refinement::{RefinementParams, RefinementTemplate, decode_refinement};
use super::text::{
    ReferenceCorner, SymbolIdCoding, TextCoder, TextContexts, TextParams, TextTables, decode_text,
};
use super::{AtPixels, parse_at_pixels, parse_refinement_at_pixels};
use crate::arithmetic_decoder::{ArithmeticDecoder, Context, fresh_contexts, seeded_contexts};
use crate::bitmap::{Bitmap, CombinationOperator};
use crate::error::{
    DecodeError, FormatError, HuffmanError, RegionError, Result, SymbolError, bail,
};
use crate::huffman_table::{
    HuffmanTable, StandardTable, StandardTables, TableChoice, TableSelector,
};
use crate::integer_decoder::{IntegerDecoder, symbol_code_length};
use crate::reader::Reader;

/// A decoded symbol dictionary.
#[derive(Debug, Clone)]
pub(crate) struct SymbolDictionary {
    /// The exported symbols, in export order.
    pub(crate) exported: Vec<Bitmap>,
    /// How many symbols the dictionary defined itself.
    pub(crate) new_symbols: u32,
    /// Coding statistics kept for a later dictionary.
    pub(crate) retained: Option<RetainedContexts>,
}

/// The generic and refinement contexts at the end of a dictionary.
#[derive(Debug, Clone)]
pub(crate) struct RetainedContexts {
    generic: Vec<Context>,
    refinement: Vec<Context>,
}

/// The data header of a symbol dictionary segment (7.4.2.1).
#[derive(Debug, Clone)]
pub(crate) struct SymbolDictionaryHeader {
    pub(crate) huffman: bool,
    pub(crate) refagg: bool,
    height_table: TableChoice,
    width_table: TableChoice,
    custom_bitmap_size_table: bool,
    custom_aggregate_table: bool,
    pub(crate) context_used: bool,
    pub(crate) context_retained: bool,
    pub(crate) template: Template,
    pub(crate) refinement_template: RefinementTemplate,
    pub(crate) at_pixels: AtPixels,
    pub(crate) refinement_at_pixels: AtPixels,
    pub(crate) exported_count: u32,
    pub(crate) new_count: u32,
}

impl SymbolDictionaryHeader {
    pub(crate) fn parse(reader: &mut Reader<'_>) -> Result<Self> {
        let flags = reader.read_u16()?;
        if flags & 0xE000 != 0 {
            bail!(FormatError::ReservedBits);
        }

        let huffman = flags & 0x0001 != 0;
        let refagg = flags & 0x0002 != 0;

        let height_table = match (flags >> 2) & 0x03 {
            0 => TableChoice::Standard(StandardTable::D),
            1 => TableChoice::Standard(StandardTable::E),
            3 => TableChoice::Custom,
            _ => bail!(HuffmanError::InvalidSelection),
        };
        let width_table = match (flags >> 4) & 0x03 {
            0 => TableChoice::Standard(StandardTable::B),
            1 => TableChoice::Standard(StandardTable::C),
            3 => TableChoice::Custom,
            _ => bail!(HuffmanError::InvalidSelection),
        };

        let template = Template::from_value((flags >> 10) as u8);
        let refinement_template = RefinementTemplate::from_value((flags >> 12) as u8);

        let at_pixels = if huffman {
            AtPixels::new()
        } else {
            parse_at_pixels(reader, template.at_pixel_count())?
        };
        let refinement_at_pixels = if refagg && refinement_template == RefinementTemplate::Template0
        {
            parse_refinement_at_pixels(reader)?
        } else {
            AtPixels::new()
        };

        Ok(Self {
            huffman,
            refagg,
            height_table,
            width_table,
            custom_bitmap_size_table: flags & 0x0040 != 0,
            custom_aggregate_table: flags & 0x0080 != 0,
            context_used: flags & 0x0100 != 0,
            context_retained: flags & 0x0200 != 0,
            template,
            refinement_template,
            at_pixels,
            refinement_at_pixels,
            exported_count: reader.read_u32()?,
            new_count: reader.read_u32()?,
        })
    }
}

/// The Huffman tables of a dictionary (7.4.2.1.6).
struct DictionaryTables<'a> {
    height: &'a HuffmanTable,
    width: &'a HuffmanTable,
    bitmap_size: &'a HuffmanTable,
    aggregate_instances: &'a HuffmanTable,
    export: &'a HuffmanTable,
}

impl<'a> DictionaryTables<'a> {
    fn select(header: &SymbolDictionaryHeader, selector: &mut TableSelector<'a>) -> Result<Self> {
        let custom_or_a = |custom: bool| {
            if custom {
                TableChoice::Custom
            } else {
                TableChoice::Standard(StandardTable::A)
            }
        };

        Ok(Self {
            height: selector.select(header.height_table)?,
            width: selector.select(header.width_table)?,
            bitmap_size: selector.select(custom_or_a(header.custom_bitmap_size_table))?,
            aggregate_instances: selector.select(custom_or_a(
                header.refagg && header.custom_aggregate_table,
            ))?,
            export: selector.select(TableChoice::Standard(StandardTable::A))?,
        })
    }
}

enum Coding<'a, 'd> {
    Huffman {
        reader: &'a mut Reader<'d>,
        tables: DictionaryTables<'a>,
    },
    Arithmetic {
        decoder: &'a mut ArithmeticDecoder<'d>,
        iadh: IntegerDecoder,
        iadw: IntegerDecoder,
        iaex: IntegerDecoder,
        iaai: IntegerDecoder,
    },
}

/// The state of decoding one dictionary.
struct DictionaryDecoder<'a, 'd> {
    header: &'a SymbolDictionaryHeader,
    coding: Coding<'a, 'd>,
    standard: &'a StandardTables,
    generic_contexts: Vec<Context>,
    refinement_contexts: Vec<Context>,
    /// The text region decoders shared by all refinement/aggregate symbols.
    text_contexts: TextContexts,
    symbol_code_len: u32,
}

impl DictionaryDecoder<'_, '_> {
    /// HCDH (6.5.6).
    fn height_delta(&mut self) -> Result<i32> {
        match &mut self.coding {
            Coding::Huffman { reader, tables } => tables.height.decode_value(reader),
            Coding::Arithmetic { decoder, iadh, .. } => {
                iadh.decode_value(decoder, SymbolError::UnexpectedOob)
            }
        }
    }

    /// DW, `None` at the end of a height class (6.5.7).
    fn width_delta(&mut self) -> Result<Option<i32>> {
        match &mut self.coding {
            Coding::Huffman { reader, tables } => tables.width.decode(reader),
            Coding::Arithmetic { decoder, iadw, .. } => iadw.decode(decoder),
        }
    }

    /// REFAGGNINST (6.5.8.2).
    fn instance_count(&mut self) -> Result<i32> {
        match &mut self.coding {
            Coding::Huffman { reader, tables } => tables.aggregate_instances.decode_value(reader),
            Coding::Arithmetic { decoder, iaai, .. } => {
                iaai.decode_value(decoder, SymbolError::UnexpectedOob)
            }
        }
    }

    /// EXRUNLENGTH (6.5.10).
    fn export_run(&mut self) -> Result<i32> {
        match &mut self.coding {
            Coding::Huffman { reader, tables } => tables.export.decode_value(reader),
            Coding::Arithmetic { decoder, iaex, .. } => {
                iaex.decode_value(decoder, SymbolError::UnexpectedOob)
            }
        }
    }

    /// A symbol coded on its own with the generic procedure (6.5.8.1).
    fn generic_symbol(&mut self, width: u32, height: u32) -> Result<Bitmap> {
        let Coding::Arithmetic { decoder, .. } = &mut self.coding else {
            bail!(SymbolError::Invalid);
        };

        decode_arithmetic(
            decoder,
            &mut self.generic_contexts,
            &GenericParams {
                width,
                height,
                template: self.header.template,
                tpgdon: false,
                at_pixels: &self.header.at_pixels,
                skip: None,
            },
        )
    }

    /// A refinement of one known symbol (6.5.8.2.2).
    fn refined_symbol(&mut self, width: u32, height: u32, known: &[&Bitmap]) -> Result<Bitmap> {
        let header = self.header;

        match &mut self.coding {
            Coding::Huffman { reader, .. } => {
                let offset_table = self.standard.get(StandardTable::O);

                let id = reader.read_bits(self.symbol_code_len.max(1) as u8)? as usize;
                let dx = offset_table.decode_value(reader)?;
                let dy = offset_table.decode_value(reader)?;
                let size = self.standard.get(StandardTable::A).decode_unsigned(reader)?;
                reader.align();
                let data = reader.read_bytes(size as usize)?;

                let reference = *known.get(id).ok_or(SymbolError::OutOfRange)?;
                let mut decoder = ArithmeticDecoder::new(data);
                let mut contexts = fresh_contexts(header.refinement_template.context_bits());
                decode_refinement(
                    &mut decoder,
                    &mut contexts,
                    &refinement_params(header, width, height, reference, dx, dy),
                )
            }
            Coding::Arithmetic { decoder, .. } => {
                let oob = SymbolError::UnexpectedOob;
                let id = self.text_contexts.iaid.decode(decoder) as usize;
                let dx = self.text_contexts.iardx.decode_value(decoder, oob)?;
                let dy = self.text_contexts.iardy.decode_value(decoder, oob)?;

                let reference = *known.get(id).ok_or(SymbolError::OutOfRange)?;
                decode_refinement(
                    decoder,
                    &mut self.refinement_contexts,
                    &refinement_params(header, width, height, reference, dx, dy),
                )
            }
        }
    }

    /// A symbol assembled from several refined instances of known symbols,
    /// decoded as a text region (6.5.8.2.1).
    fn aggregate_symbol(
        &mut self,
        width: u32,
        height: u32,
        instances: u32,
        known: &[&Bitmap],
    ) -> Result<Bitmap> {
        let header = self.header;
        let params = TextParams {
            width,
            height,
            instances,
            log_strip_size: 0,
            corner: ReferenceCorner::TopLeft,
            transposed: false,
            operator: CombinationOperator::Or,
            default_pixel: false,
            ds_offset: 0,
            refine: true,
            refinement_template: header.refinement_template,
            refinement_at_pixels: &header.refinement_at_pixels,
        };

        let mut coder = match &mut self.coding {
            Coding::Huffman { reader, .. } => TextCoder::Huffman {
                reader: &mut **reader,
                tables: TextTables::aggregate(self.standard),
                symbol_ids: SymbolIdCoding::Fixed(self.symbol_code_len.max(1) as u8),
            },
            Coding::Arithmetic { decoder, .. } => TextCoder::Arithmetic {
                decoder: &mut **decoder,
                contexts: &mut self.text_contexts,
                refinement_contexts: &mut self.refinement_contexts,
            },
        };

        decode_text(&mut coder, known, &params)
    }

    /// The collective bitmap of a Huffman-coded height class, split into
    /// its symbols (6.5.9).
    fn collective_symbols(&mut self, widths: &[u32], height: u32) -> Result<Vec<Bitmap>> {
        let Coding::Huffman { reader, tables } = &mut self.coding else {
            bail!(SymbolError::Invalid);
        };

        let total_width = widths
            .iter()
            .try_fold(0_u32, |total, width| total.checked_add(*width))
            .ok_or(DecodeError::Overflow)?;

        let size = tables.bitmap_size.decode_unsigned(reader)?;
        reader.align();

        let collective = if size == 0 {
            let stride = (total_width as usize).div_ceil(8);
            let len = stride
                .checked_mul(height as usize)
                .ok_or(RegionError::InvalidDimension)?;
            Bitmap::from_packed(total_width, height, reader.read_bytes(len)?)?
        } else {
            decode_mmr(reader.read_bytes(size as usize)?, total_width, height)?.0
        };

        let mut x = 0;
        widths
            .iter()
            .map(|width| {
                let symbol = collective.slice(x, 0, *width, height);
                x += width;
                symbol
            })
            .collect()
    }
}

fn refinement_params<'a>(
    header: &'a SymbolDictionaryHeader,
    width: u32,
    height: u32,
    reference: &'a Bitmap,
    dx: i32,
    dy: i32,
) -> RefinementParams<'a> {
    RefinementParams {
        width,
        height,
        template: header.refinement_template,
        reference,
        dx,
        dy,
        tpgron: false,
        at_pixels: &header.refinement_at_pixels,
    }
}

/// Decode the data part of a symbol dictionary segment.
///
/// `input` holds the exported symbols of the referred dictionaries and
/// `prior` the contexts retained by the last of them.
pub(crate) fn decode_dictionary<'a>(
    reader: &mut Reader<'a>,
    decoder: &mut ArithmeticDecoder<'a>,
    input: &[&Bitmap],
    custom_tables: &[&HuffmanTable],
    standard: &StandardTables,
    prior: Option<&RetainedContexts>,
    strict: bool,
) -> Result<SymbolDictionary> {
    let header = SymbolDictionaryHeader::parse(reader)?;
    let input_count = u32::try_from(input.len()).map_err(|_| DecodeError::Overflow)?;
    let total = input_count
        .checked_add(header.new_count)
        .ok_or(DecodeError::Overflow)?;

    ltrace!(
        "symbol dictionary: {} input, {} new, {} exported, huffman: {}, refagg: {}",
        input_count,
        header.new_count,
        header.exported_count,
        header.huffman,
        header.refagg
    );

    let coding = if header.huffman {
        let mut selector = TableSelector::new(standard, custom_tables);
        Coding::Huffman {
            reader,
            tables: DictionaryTables::select(&header, &mut selector)?,
        }
    } else {
        decoder.start(reader.tail());
        Coding::Arithmetic {
            decoder,
            iadh: IntegerDecoder::new(),
            iadw: IntegerDecoder::new(),
            iaex: IntegerDecoder::new(),
            iaai: IntegerDecoder::new(),
        }
    };

    let prior = if header.context_used {
        if prior.is_none() {
            lwarn!("symbol dictionary reuses contexts, but none were retained");
        }
        prior
    } else {
        None
    };

    let symbol_code_len = symbol_code_length(total);
    let mut state = DictionaryDecoder {
        header: &header,
        coding,
        standard,
        generic_contexts: seeded_contexts(
            header.template.context_bits(),
            prior.map(|p| p.generic.as_slice()),
        ),
        refinement_contexts: seeded_contexts(
            header.refinement_template.context_bits(),
            prior.map(|p| p.refinement.as_slice()),
        ),
        text_contexts: TextContexts::new(symbol_code_len),
        symbol_code_len,
    };

    let new_symbols = decode_new_symbols(&mut state, input)?;
    let exported = export_symbols(&mut state, input, &new_symbols, total)?;

    let actual = exported.len() as u32;
    if actual != header.exported_count {
        if strict {
            bail!(SymbolError::InconsistentCount {
                declared: header.exported_count,
                actual,
            });
        }

        lwarn!(
            "symbol dictionary exports {} symbols but declares {}",
            actual,
            header.exported_count
        );
    }

    let retained = header.context_retained.then(|| RetainedContexts {
        generic: state.generic_contexts,
        refinement: state.refinement_contexts,
    });

    Ok(SymbolDictionary {
        exported,
        new_symbols: header.new_count,
        retained,
    })
}

/// The height class loop (6.5.5, step 4).
fn decode_new_symbols(
    state: &mut DictionaryDecoder<'_, '_>,
    input: &[&Bitmap],
) -> Result<Vec<Bitmap>> {
    let header = state.header;
    let new_count = header.new_count as usize;
    let collective = header.huffman && !header.refagg;

    let mut symbols: Vec<Bitmap> = Vec::with_capacity(new_count.min(1024));
    let mut height = 0_i64;

    while symbols.len() < new_count {
        height += i64::from(state.height_delta()?);
        let class_height = u32::try_from(height).map_err(|_| RegionError::InvalidDimension)?;

        let mut width = 0_i64;
        let mut class_widths = Vec::new();

        while let Some(delta) = state.width_delta()? {
            if symbols.len() + class_widths.len() >= new_count {
                bail!(SymbolError::TooManySymbols);
            }

            width += i64::from(delta);
            let symbol_width = u32::try_from(width).map_err(|_| RegionError::InvalidDimension)?;

            if collective {
                class_widths.push(symbol_width);
                continue;
            }

            let symbol = if header.refagg {
                let known: Vec<&Bitmap> = input.iter().copied().chain(symbols.iter()).collect();

                match state.instance_count()? {
                    1 => state.refined_symbol(symbol_width, class_height, &known)?,
                    n if n > 1 => {
                        state.aggregate_symbol(symbol_width, class_height, n as u32, &known)?
                    }
                    _ => bail!(SymbolError::Invalid),
                }
            } else {
                state.generic_symbol(symbol_width, class_height)?
            };

            ltrace!(
                "symbol {}: {}x{}",
                input.len() + symbols.len(),
                symbol_width,
                class_height
            );
            symbols.push(symbol);
        }

        if collective {
            symbols.extend(state.collective_symbols(&class_widths, class_height)?);
        }
    }

    Ok(symbols)
}

/// Select the exported symbols from the input and new symbols by
/// alternating run lengths (6.5.10).
fn export_symbols(
    state: &mut DictionaryDecoder<'_, '_>,
    input: &[&Bitmap],
    new_symbols: &[Bitmap],
    total: u32,
) -> Result<Vec<Bitmap>> {
    let total = total as usize;
    let mut exported = Vec::new();
    let mut index = 0_usize;
    let mut exporting = false;
    let mut runs = 0_usize;

    while index < total {
        runs += 1;
        if runs > 2 * total + 2 {
            bail!(SymbolError::Invalid);
        }

        let run = usize::try_from(state.export_run()?).map_err(|_| SymbolError::Invalid)?;
        let end = index
            .checked_add(run)
            .filter(|end| *end <= total)
            .ok_or(SymbolError::OutOfRange)?;

        if exporting {
            for i in index..end {
                let symbol = match input.get(i) {
                    Some(symbol) => *symbol,
                    None => new_symbols
                        .get(i - input.len())
                        .ok_or(SymbolError::OutOfRange)?,
                };
                exported.push(symbol.clone());
            }
        }

        index = end;
        exporting = !exporting;
    }

    Ok(exported)
}
