//! Generic region decoding (6.2) and generic region segments (7.4.6).

use super::{AdaptiveTemplatePixel, AtPixels, RegionBitmap, RegionSegmentInfo, parse_at_pixels};
use crate::arithmetic_decoder::{ArithmeticDecoder, Context, fresh_contexts};
use crate::bitmap::Bitmap;
use crate::error::{FormatError, RegionError, Result, Unsupported, bail};
use crate::reader::Reader;

/// The pixel templates of generic coding (6.2.5.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Template {
    /// 16 pixels, 4 of them adaptive.
    Template0,
    /// 13 pixels, 1 adaptive.
    Template1,
    /// 10 pixels, 1 adaptive.
    Template2,
    /// 10 pixels, 1 adaptive.
    Template3,
}

impl Template {
    /// Decode the two-bit template field.
    pub(crate) fn from_value(value: u8) -> Self {
        match value & 0x03 {
            0 => Self::Template0,
            1 => Self::Template1,
            2 => Self::Template2,
            _ => Self::Template3,
        }
    }

    pub(crate) fn context_bits(self) -> u32 {
        match self {
            Self::Template0 => 16,
            Self::Template1 => 13,
            Self::Template2 | Self::Template3 => 10,
        }
    }

    pub(crate) fn at_pixel_count(self) -> usize {
        match self {
            Self::Template0 => 4,
            _ => 1,
        }
    }

    /// The context used for the SLTP bit of typical prediction (Figures 8 to 11).
    fn sltp_context(self) -> usize {
        match self {
            Self::Template0 => 0x9B25,
            Self::Template1 => 0x0795,
            Self::Template2 => 0x00E5,
            Self::Template3 => 0x0195,
        }
    }
}

/// Forms the context of a pixel from its already decoded neighbours.
#[derive(Debug, Clone)]
pub(crate) struct GenericContextModel {
    template: Template,
    at: [(i32, i32); 4],
}

impl GenericContextModel {
    pub(crate) fn new(template: Template, at_pixels: &[AdaptiveTemplatePixel]) -> Self {
        let mut at = [(0, 0); 4];
        for (slot, pixel) in at.iter_mut().zip(at_pixels) {
            *slot = (i32::from(pixel.x), i32::from(pixel.y));
        }

        Self { template, at }
    }

    #[inline(always)]
    pub(crate) fn context(&self, bitmap: &Bitmap, x: u32, y: u32) -> u32 {
        let (x, y) = (x as i32, y as i32);
        let p = |dx: i32, dy: i32| bitmap.pixel(x + dx, y + dy);
        let a = |i: usize| p(self.at[i].0, self.at[i].1);

        match self.template {
            Template::Template0 => pack(&[
                a(3),
                p(-1, -2),
                p(0, -2),
                p(1, -2),
                a(2),
                a(1),
                p(-2, -1),
                p(-1, -1),
                p(0, -1),
                p(1, -1),
                p(2, -1),
                a(0),
                p(-4, 0),
                p(-3, 0),
                p(-2, 0),
                p(-1, 0),
            ]),
            Template::Template1 => pack(&[
                p(-1, -2),
                p(0, -2),
                p(1, -2),
                p(2, -2),
                p(-2, -1),
                p(-1, -1),
                p(0, -1),
                p(1, -1),
                p(2, -1),
                a(0),
                p(-3, 0),
                p(-2, 0),
                p(-1, 0),
            ]),
            Template::Template2 => pack(&[
                p(-1, -2),
                p(0, -2),
                p(1, -2),
                p(-2, -1),
                p(-1, -1),
                p(0, -1),
                p(1, -1),
                a(0),
                p(-2, 0),
                p(-1, 0),
            ]),
            Template::Template3 => pack(&[
                p(-3, -1),
                p(-2, -1),
                p(-1, -1),
                p(0, -1),
                p(1, -1),
                a(0),
                p(-4, 0),
                p(-3, 0),
                p(-2, 0),
                p(-1, 0),
            ]),
        }
    }
}

#[inline(always)]
pub(crate) fn pack(bits: &[u32]) -> u32 {
    bits.iter().fold(0, |context, bit| (context << 1) | bit)
}

/// Parameters of one invocation of the arithmetic generic decoding procedure.
#[derive(Debug, Clone)]
pub(crate) struct GenericParams<'a> {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) template: Template,
    pub(crate) tpgdon: bool,
    pub(crate) at_pixels: &'a [AdaptiveTemplatePixel],
    /// Pixels set here are not coded and stay white (USESKIP).
    pub(crate) skip: Option<&'a Bitmap>,
}

/// Decode a bitmap with template-based arithmetic coding (6.2.5).
///
/// `contexts` must hold `1 << template.context_bits()` entries. They are
/// shared with the caller so that symbol dictionaries can keep their
/// statistics from one symbol to the next.
pub(crate) fn decode_arithmetic(
    decoder: &mut ArithmeticDecoder<'_>,
    contexts: &mut [Context],
    params: &GenericParams<'_>,
) -> Result<Bitmap> {
    debug_assert_eq!(contexts.len(), 1 << params.template.context_bits());

    let model = GenericContextModel::new(params.template, params.at_pixels);
    let sltp_context = params.template.sltp_context();
    let mut bitmap = Bitmap::new(params.width, params.height)?;
    let mut ltp = false;

    for y in 0..params.height {
        if params.tpgdon {
            ltp ^= decoder.decode(&mut contexts[sltp_context]) == 1;
        }

        if ltp {
            bitmap.copy_row_from_above(y);
            continue;
        }

        for x in 0..params.width {
            if let Some(skip) = params.skip
                && skip.get_pixel(x, y)
            {
                continue;
            }

            let context = model.context(&bitmap, x, y);
            if decoder.decode(&mut contexts[context as usize]) == 1 {
                bitmap.set_pixel(x, y, true);
            }
        }
    }

    Ok(bitmap)
}

/// Decode an MMR (T.6) coded bitmap (6.2.6). Black pixels are 1.
///
/// Also returns how many bytes of `data` the bitmap occupies, through its
/// EOFB when there is one.
pub(crate) fn decode_mmr(data: &[u8], width: u32, height: u32) -> Result<(Bitmap, usize)> {
    let mut bitmap = Bitmap::new(width, height)?;
    if width == 0 || height == 0 {
        return Ok((bitmap, 0));
    }

    let (Ok(columns), Ok(rows)) = (u16::try_from(width), u16::try_from(height)) else {
        bail!(Unsupported::MmrDimensions);
    };

    let mut fetched = 0_usize;
    let mut y = 0;
    let finished = fax::decoder::decode_g4(
        data.iter().copied().inspect(|_| fetched += 1),
        columns,
        Some(rows),
        |transitions: &[u16]| {
            if y < height {
                fill_transitions(bitmap.row_mut(y), transitions, width);
            }
            y += 1;
        },
    );

    if y < height {
        if finished.is_none() {
            bail!(RegionError::InvalidMmrData);
        }
        ltrace!("MMR data ended after {} of {} rows", y, height);
    }

    Ok((bitmap, mmr_length(data, fetched)))
}

/// The end-of-facsimile-block marker: two EOL codes.
const EOFB: u32 = 0x00_1001;

/// The byte length of an MMR bitmap whose decoding fetched `fetched` bytes.
///
/// The Group 4 decoder buffers at most three bytes past its position, and
/// eleven zero bits in a row only occur in an EOL, so the first EOFB found
/// from a few bytes before that point ends the bitmap. Without an EOFB the
/// bitmap runs to the end of `data`.
fn mmr_length(data: &[u8], fetched: usize) -> usize {
    let first_bit = fetched.saturating_sub(6) * 8;
    let mut window = 0_u32;

    for bit in first_bit..data.len() * 8 {
        let value = u32::from((data[bit / 8] >> (7 - bit % 8)) & 1);
        window = ((window << 1) | value) & 0xFF_FFFF;

        if bit + 1 >= first_bit + 24 && window == EOFB {
            return (bit + 1).div_ceil(8);
        }
    }

    data.len()
}

/// Set the black runs of a row given as colour changes, starting with white.
fn fill_transitions(row: &mut [u8], transitions: &[u16], width: u32) {
    for run in transitions.chunks(2) {
        let start = u32::from(run[0]).min(width);
        let end = run.get(1).map_or(width, |end| u32::from(*end).min(width));

        for x in start..end {
            row[(x >> 3) as usize] |= 0x80 >> (x & 7);
        }
    }
}

/// The data header of a generic region segment.
#[derive(Debug, Clone)]
pub(crate) struct GenericRegionHeader {
    pub(crate) info: RegionSegmentInfo,
    pub(crate) mmr: bool,
    pub(crate) template: Template,
    pub(crate) tpgdon: bool,
    pub(crate) at_pixels: AtPixels,
}

impl GenericRegionHeader {
    pub(crate) fn parse(reader: &mut Reader<'_>) -> Result<Self> {
        let info = RegionSegmentInfo::parse(reader)?;

        let flags = reader.read_byte()?;
        let mmr = flags & 0x01 != 0;
        let template = Template::from_value(flags >> 1);
        let tpgdon = flags & 0x08 != 0;

        if flags & 0x10 != 0 {
            bail!(Unsupported::ExtendedTemplate);
        }

        if flags & 0xE0 != 0 {
            bail!(FormatError::ReservedBits);
        }

        let at_pixels = if mmr {
            AtPixels::new()
        } else {
            parse_at_pixels(reader, template.at_pixel_count())?
        };

        Ok(Self {
            info,
            mmr,
            template,
            tpgdon,
            at_pixels,
        })
    }
}

/// Decode the data part of a generic region segment.
///
/// With `unknown_length`, the data ends in a four-byte row count that
/// replaces the height given in the region info.
pub(crate) fn decode_region<'a>(
    reader: &mut Reader<'a>,
    decoder: &mut ArithmeticDecoder<'a>,
    unknown_length: bool,
) -> Result<RegionBitmap> {
    let mut header = GenericRegionHeader::parse(reader)?;
    let mut data = reader.tail();

    if unknown_length {
        let Some(split) = data.len().checked_sub(4) else {
            bail!(RegionError::InvalidRowCount);
        };
        let (coded, count) = data.split_at(split);
        let rows = u32::from_be_bytes([count[0], count[1], count[2], count[3]]);

        if rows > header.info.height {
            bail!(RegionError::InvalidRowCount);
        }

        header.info.height = rows;
        data = coded;
    }

    ltrace!(
        "generic region {}x{} at ({}, {}), mmr: {}, template: {:?}, tpgdon: {}",
        header.info.width,
        header.info.height,
        header.info.x,
        header.info.y,
        header.mmr,
        header.template,
        header.tpgdon
    );

    let bitmap = if header.mmr {
        decode_mmr(data, header.info.width, header.info.height)?.0
    } else {
        decoder.start(data);
        let mut contexts = fresh_contexts(header.template.context_bits());

        decode_arithmetic(
            decoder,
            &mut contexts,
            &GenericParams {
                width: header.info.width,
                height: header.info.height,
                template: header.template,
                tpgdon: header.tpgdon,
                at_pixels: &header.at_pixels,
                skip: None,
            },
        )?
    };

    Ok(RegionBitmap::new(bitmap, &header.info))
}

/// The nominal AT pixel positions of each template.
pub(crate) fn nominal_at_pixels(template: Template) -> AtPixels {
    match template {
        Template::Template0 => AtPixels::from_slice(&[
            AdaptiveTemplatePixel::new(3, -1),
            AdaptiveTemplatePixel::new(-3, -1),
            AdaptiveTemplatePixel::new(2, -2),
            AdaptiveTemplatePixel::new(-2, -2),
        ]),
        Template::Template1 => AtPixels::from_slice(&[AdaptiveTemplatePixel::new(3, -1)]),
        Template::Template2 | Template::Template3 => {
            AtPixels::from_slice(&[AdaptiveTemplatePixel::new(2, -1)])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use crate::test_support::{MqEncoder, bitmap_from_rows};

    const TEMPLATES: [Template; 4] = [
        Template::Template0,
        Template::Template1,
        Template::Template2,
        Template::Template3,
    ];

    fn sample(width: u32, height: u32) -> Bitmap {
        let mut bitmap = Bitmap::new(width, height).unwrap();
        for y in 0..height {
            for x in 0..width {
                let inside_ring = (x as i32 - 18).pow(2) + (y as i32 - 10).pow(2) < 64;
                bitmap.set_pixel(x, y, inside_ring || (x + 2 * y) % 11 == 0);
            }
        }
        bitmap
    }

    fn params<'a>(
        bitmap: &Bitmap,
        template: Template,
        at: &'a [AdaptiveTemplatePixel],
    ) -> GenericParams<'a> {
        GenericParams {
            width: bitmap.width(),
            height: bitmap.height(),
            template,
            tpgdon: false,
            at_pixels: at,
            skip: None,
        }
    }

    #[test]
    fn context_bit_positions() {
        // Neighbours from the most significant context bit down, with the
        // nominal AT pixels (Figures 3 to 6).
        let layouts: [(Template, &[(i32, i32)]); 4] = [
            (
                Template::Template0,
                &[
                    (-2, -2),
                    (-1, -2),
                    (0, -2),
                    (1, -2),
                    (2, -2),
                    (-3, -1),
                    (-2, -1),
                    (-1, -1),
                    (0, -1),
                    (1, -1),
                    (2, -1),
                    (3, -1),
                    (-4, 0),
                    (-3, 0),
                    (-2, 0),
                    (-1, 0),
                ],
            ),
            (
                Template::Template1,
                &[
                    (-1, -2),
                    (0, -2),
                    (1, -2),
                    (2, -2),
                    (-2, -1),
                    (-1, -1),
                    (0, -1),
                    (1, -1),
                    (2, -1),
                    (3, -1),
                    (-3, 0),
                    (-2, 0),
                    (-1, 0),
                ],
            ),
            (
                Template::Template2,
                &[
                    (-1, -2),
                    (0, -2),
                    (1, -2),
                    (-2, -1),
                    (-1, -1),
                    (0, -1),
                    (1, -1),
                    (2, -1),
                    (-2, 0),
                    (-1, 0),
                ],
            ),
            (
                Template::Template3,
                &[
                    (-3, -1),
                    (-2, -1),
                    (-1, -1),
                    (0, -1),
                    (1, -1),
                    (2, -1),
                    (-4, 0),
                    (-3, 0),
                    (-2, 0),
                    (-1, 0),
                ],
            ),
        ];

        for (template, neighbours) in layouts {
            let at = nominal_at_pixels(template);
            let model = GenericContextModel::new(template, &at);
            assert_eq!(neighbours.len() as u32, template.context_bits());

            for (index, (dx, dy)) in neighbours.iter().enumerate() {
                let mut bitmap = Bitmap::new(9, 3).unwrap();
                bitmap.set_pixel((4 + dx) as u32, (2 + dy) as u32, true);

                let bit = template.context_bits() - 1 - index as u32;
                assert_eq!(model.context(&bitmap, 4, 2), 1 << bit, "{template:?} ({dx}, {dy})");
            }
        }
    }

    #[test]
    fn every_template_round_trips() {
        let bitmap = sample(37, 21);

        for template in TEMPLATES {
            let at = nominal_at_pixels(template);
            let mut encoder = MqEncoder::new();
            let mut contexts = fresh_contexts(template.context_bits());
            encoder.encode_generic(&mut contexts, &bitmap, template, &at);
            let coded = encoder.finish();

            let mut decoder = ArithmeticDecoder::new(&coded);
            let mut contexts = fresh_contexts(template.context_bits());
            let decoded =
                decode_arithmetic(&mut decoder, &mut contexts, &params(&bitmap, template, &at))
                    .unwrap();

            assert_eq!(decoded, bitmap, "{template:?}");
        }
    }

    #[test]
    fn typical_prediction_copies_rows() {
        let bitmap = bitmap_from_rows(&[
            "..........",
            "..####....",
            "..####....",
            "..####....",
            ".#.#.#.#.#",
            ".#.#.#.#.#",
        ]);
        let template = Template::Template2;
        let at = nominal_at_pixels(template);
        let model = GenericContextModel::new(template, &at);

        let mut encoder = MqEncoder::new();
        let mut contexts = fresh_contexts(template.context_bits());
        let mut ltp = false;
        for y in 0..bitmap.height() {
            let typical = if y == 0 {
                bitmap.row(0).iter().all(|b| *b == 0)
            } else {
                bitmap.row(y) == bitmap.row(y - 1)
            };
            encoder.encode(&mut contexts[template.sltp_context()], u32::from(typical != ltp));
            ltp = typical;

            if !typical {
                for x in 0..bitmap.width() {
                    let cx = model.context(&bitmap, x, y);
                    encoder.encode(&mut contexts[cx as usize], u32::from(bitmap.get_pixel(x, y)));
                }
            }
        }
        let coded = encoder.finish();

        let mut decoder = ArithmeticDecoder::new(&coded);
        let mut contexts = fresh_contexts(template.context_bits());
        let mut p = params(&bitmap, template, &at);
        p.tpgdon = true;
        let decoded = decode_arithmetic(&mut decoder, &mut contexts, &p).unwrap();

        assert_eq!(decoded, bitmap);
    }

    #[test]
    fn skipped_pixels_stay_white() {
        let bitmap = bitmap_from_rows(&["#..#", ".##.", "#..#"]);
        let skip = bitmap_from_rows(&["#...", "....", "...#"]);
        let template = Template::Template3;
        let at = nominal_at_pixels(template);
        let model = GenericContextModel::new(template, &at);

        let mut expected = bitmap.clone();
        expected.set_pixel(0, 0, false);
        expected.set_pixel(3, 2, false);

        let mut encoder = MqEncoder::new();
        let mut contexts = fresh_contexts(template.context_bits());
        for y in 0..3 {
            for x in 0..4 {
                if !skip.get_pixel(x, y) {
                    let cx = model.context(&expected, x, y);
                    encoder.encode(&mut contexts[cx as usize], u32::from(expected.get_pixel(x, y)));
                }
            }
        }
        let coded = encoder.finish();

        let mut decoder = ArithmeticDecoder::new(&coded);
        let mut contexts = fresh_contexts(template.context_bits());
        let mut p = params(&bitmap, template, &at);
        p.skip = Some(&skip);
        let decoded = decode_arithmetic(&mut decoder, &mut contexts, &p).unwrap();

        assert_eq!(decoded, expected);
    }

    #[test]
    fn mmr_vertical_bar() {
        // Row 1: horizontal mode (white 2, black 2) then V0. Rows 2 and 3: three
        // V0 codes each. Then EOFB.
        let data = [0x2F, 0xFF, 0x00, 0x10, 0x01];
        let (decoded, length) = decode_mmr(&data, 8, 3).unwrap();

        assert_eq!(decoded, bitmap_from_rows(&["..##....", "..##....", "..##...."]));
        assert_eq!(length, 5);
    }

    #[test]
    fn mmr_without_eofb_fills_its_data() {
        let (decoded, length) = decode_mmr(&[0x2F, 0xFF], 8, 3).unwrap();

        assert_eq!(decoded, bitmap_from_rows(&["..##....", "..##....", "..##...."]));
        assert_eq!(length, 2);
    }

    #[test]
    fn mmr_too_wide_is_unsupported() {
        assert_eq!(
            decode_mmr(&[0xFF], 70_000, 1).unwrap_err(),
            DecodeError::from(Unsupported::MmrDimensions)
        );
    }

    #[test]
    fn region_segment_with_row_count() {
        let bitmap = sample(24, 5);
        let template = Template::Template0;
        let at = nominal_at_pixels(template);

        let mut encoder = MqEncoder::new();
        let mut contexts = fresh_contexts(template.context_bits());
        encoder.encode_generic(&mut contexts, &bitmap, template, &at);

        let mut data = Vec::new();
        data.extend_from_slice(&24_u32.to_be_bytes());
        data.extend_from_slice(&9_u32.to_be_bytes());
        data.extend_from_slice(&1_u32.to_be_bytes());
        data.extend_from_slice(&2_u32.to_be_bytes());
        data.push(0x00);
        data.push(0x00);
        for pixel in &at {
            data.extend_from_slice(&[pixel.x as u8, pixel.y as u8]);
        }
        data.extend(encoder.finish());
        data.extend_from_slice(&5_u32.to_be_bytes());

        let mut reader = Reader::new(&data);
        let mut decoder = ArithmeticDecoder::new(&[]);
        let region = decode_region(&mut reader, &mut decoder, true).unwrap();

        assert_eq!(region.bitmap, bitmap);
        assert_eq!((region.x, region.y), (1, 2));
    }

    #[test]
    fn extended_template_is_unsupported() {
        let mut data = vec![0; 17];
        data.push(0x10);

        assert_eq!(
            GenericRegionHeader::parse(&mut Reader::new(&data)).unwrap_err(),
            DecodeError::from(Unsupported::ExtendedTemplate)
        );
    }
}
