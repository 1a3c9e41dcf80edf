//! Pattern dictionary decoding (6.7) and pattern dictionary segments (7.4.4).

use super::{AdaptiveTemplatePixel, AtPixels};
use super::generic::{GenericParams, Template, decode_arithmetic, decode_mmr, nominal_at_pixels};
use crate::arithmetic_decoder::{ArithmeticDecoder, fresh_contexts};
use crate::bitmap::Bitmap;
use crate::error::{DecodeError, FormatError, RegionError, Result, bail};
use crate::reader::Reader;

/// The patterns of a dictionary, indexed by gray-scale value.
#[derive(Debug, Clone)]
pub(crate) struct PatternDictionary {
    pub(crate) patterns: Vec<Bitmap>,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

#[derive(Debug, Clone)]
struct PatternDictionaryHeader {
    mmr: bool,
    template: Template,
    /// HDPW
    width: u8,
    /// HDPH
    height: u8,
    /// GRAYMAX
    gray_max: u32,
}

impl PatternDictionaryHeader {
    fn parse(reader: &mut Reader<'_>) -> Result<Self> {
        let flags = reader.read_byte()?;
        if flags & 0xF8 != 0 {
            bail!(FormatError::ReservedBits);
        }

        let width = reader.read_byte()?;
        let height = reader.read_byte()?;
        if width == 0 || height == 0 {
            bail!(RegionError::InvalidDimension);
        }

        Ok(Self {
            mmr: flags & 0x01 != 0,
            template: Template::from_value(flags >> 1),
            width,
            height,
            gray_max: reader.read_u32()?,
        })
    }

    /// The nominal AT pixels, except that the first one sits one pattern
    /// width to the left (Table 27).
    fn at_pixels(&self) -> AtPixels {
        let mut pixels = nominal_at_pixels(self.template);
        pixels[0] = AdaptiveTemplatePixel::new(-i16::from(self.width), 0);
        pixels
    }
}

/// Decode the data part of a pattern dictionary segment.
pub(crate) fn decode_dictionary<'a>(
    reader: &mut Reader<'a>,
    decoder: &mut ArithmeticDecoder<'a>,
) -> Result<PatternDictionary> {
    let header = PatternDictionaryHeader::parse(reader)?;
    let width = u32::from(header.width);
    let height = u32::from(header.height);

    let count = header.gray_max.checked_add(1).ok_or(DecodeError::Overflow)?;
    let collective_width = count.checked_mul(width).ok_or(DecodeError::Overflow)?;

    ltrace!(
        "pattern dictionary: {} patterns of {}x{}, mmr: {}",
        count,
        width,
        height,
        header.mmr
    );

    let collective = if header.mmr {
        decode_mmr(reader.tail(), collective_width, height)?.0
    } else {
        decoder.start(reader.tail());
        let mut contexts = fresh_contexts(header.template.context_bits());
        decode_arithmetic(
            decoder,
            &mut contexts,
            &GenericParams {
                width: collective_width,
                height,
                template: header.template,
                tpgdon: false,
                at_pixels: &header.at_pixels(),
                skip: None,
            },
        )?
    };

    let patterns = (0..count)
        .map(|gray| collective.slice(gray * width, 0, width, height))
        .collect::<Result<Vec<_>>>()?;

    Ok(PatternDictionary {
        patterns,
        width,
        height,
    })
}
