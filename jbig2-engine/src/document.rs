//! Segment dispatch and the decoded document.

use crate::bitmap::Bitmap;
use crate::context::{DecodeContext, SegmentResult};
use crate::decode::{
    RegionBitmap, RegionSegmentInfo, generic, generic_refinement, halftone, pattern, symbol,
    text,
};
use crate::error::Result;
use crate::huffman_table::HuffmanTable;
use crate::page::{Page, PageFlags, PageInformation};
use crate::reader::Reader;
use crate::segment::{Segment, SegmentHeader, SegmentType};

/// The default limit for the number of pixels of one page.
const DEFAULT_MAX_PAGE_PIXELS: u64 = 1 << 30;

/// Settings that control how strictly a stream is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeSettings {
    /// Fail on inconsistencies that can otherwise be worked around, such as a
    /// symbol dictionary exporting a different number of symbols than it
    /// declares.
    pub strict: bool,
    /// Skip immediate region segments that fail with a recoverable error,
    /// leaving their part of the page untouched.
    pub tolerate_region_errors: bool,
    /// The largest page, in pixels, that may be allocated. Pages of unknown
    /// height may not grow beyond it either.
    pub max_page_pixels: u64,
}

impl Default for DecodeSettings {
    fn default() -> Self {
        Self {
            strict: false,
            tolerate_region_errors: false,
            max_page_pixels: DEFAULT_MAX_PAGE_PIXELS,
        }
    }
}

/// Receives the pixels of a page, row by row.
pub trait PixelSink {
    /// Push a single pixel.
    fn push_pixel(&mut self, black: bool);
    /// Push `chunk_count` runs of eight pixels of the same colour.
    fn push_pixel_chunk(&mut self, black: bool, chunk_count: u32);
    /// The current row is complete.
    fn next_line(&mut self);
}

/// A decoded page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPage {
    number: u32,
    bitmap: Bitmap,
    x_resolution: Option<u32>,
    y_resolution: Option<u32>,
    flags: PageFlags,
}

impl DecodedPage {
    /// The page number the segments of this page were associated with.
    pub fn number(&self) -> u32 {
        self.number
    }

    /// The page image. Set bits are black.
    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    /// Take the page image.
    pub fn into_bitmap(self) -> Bitmap {
        self.bitmap
    }

    /// The width of the page in pixels.
    pub fn width(&self) -> u32 {
        self.bitmap.width()
    }

    /// The height of the page in pixels. For a striped page of unknown
    /// height this is the height reached by its stripes and regions.
    pub fn height(&self) -> u32 {
        self.bitmap.height()
    }

    /// Horizontal resolution in pixels per metre, if known.
    pub fn x_resolution(&self) -> Option<u32> {
        self.x_resolution
    }

    /// Vertical resolution in pixels per metre, if known.
    pub fn y_resolution(&self) -> Option<u32> {
        self.y_resolution
    }

    /// The flags of the page information segment.
    pub fn flags(&self) -> PageFlags {
        self.flags
    }

    /// Stream the page into `sink`. Runs of whole bytes of one colour are
    /// pushed as chunks.
    pub fn emit(&self, sink: &mut impl PixelSink) {
        let width = self.bitmap.width();
        let full_bytes = (width / 8) as usize;

        for y in 0..self.bitmap.height() {
            let row = self.bitmap.row(y);
            let mut run: Option<(bool, u32)> = None;

            for &byte in &row[..full_bytes] {
                let uniform = match byte {
                    0x00 => Some(false),
                    0xFF => Some(true),
                    _ => None,
                };

                match (uniform, run) {
                    (Some(black), Some((run_black, count))) if black == run_black => {
                        run = Some((black, count + 1));
                    }
                    (Some(black), _) => {
                        flush(sink, run.take());
                        run = Some((black, 1));
                    }
                    (None, _) => {
                        flush(sink, run.take());
                        for bit in 0..8 {
                            sink.push_pixel(byte & (0x80 >> bit) != 0);
                        }
                    }
                }
            }
            flush(sink, run);

            for x in (full_bytes as u32 * 8)..width {
                sink.push_pixel(self.bitmap.get_pixel(x, y));
            }

            sink.next_line();
        }
    }
}

fn flush(sink: &mut impl PixelSink, run: Option<(bool, u32)>) {
    if let Some((black, count)) = run {
        sink.push_pixel_chunk(black, count);
    }
}

impl From<Page> for DecodedPage {
    fn from(page: Page) -> Self {
        Self {
            number: page.number,
            bitmap: page.bitmap,
            x_resolution: page.info.x_resolution,
            y_resolution: page.info.y_resolution,
            flags: page.info.flags,
        }
    }
}

/// The pages of a decoded stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pages: Vec<DecodedPage>,
}

impl Document {
    /// The page with the given page number.
    pub fn page(&self, number: u32) -> Option<&DecodedPage> {
        self.pages.iter().find(|page| page.number == number)
    }

    /// All pages, in the order they were decoded.
    pub fn pages(&self) -> &[DecodedPage] {
        &self.pages
    }

    /// Take all pages.
    pub fn into_pages(self) -> Vec<DecodedPage> {
        self.pages
    }
}

/// Decode `segments` in order.
pub(crate) fn decode_segments(
    segments: &[Segment<'_>],
    settings: DecodeSettings,
) -> Result<Document> {
    let mut ctx = DecodeContext::new(settings);

    for segment in segments {
        let header = &segment.header;
        ldebug!(
            "segment {}: {:?}, page {}, {} bytes, refers to {:?}",
            header.number,
            header.segment_type,
            header.page_association,
            segment.data.len(),
            header.referred_segments.as_slice()
        );
        ltrace!(
            "segment {}: retention flags {:?}, deferred non-retain: {}, long page association: {}",
            header.number,
            header.retention_flags.as_slice(),
            header.deferred_non_retain,
            header.page_association_long
        );

        match decode_segment(&mut ctx, segment) {
            Ok(Flow::Continue) => {}
            Ok(Flow::EndOfFile) => break,
            Err(error)
                if header.segment_type.is_immediate()
                    && ctx.settings.tolerate_region_errors
                    && error.is_recoverable() =>
            {
                lwarn!("skipping region segment {}: {}", header.number, error);
            }
            Err(error) => return Err(error),
        }
    }

    let pages = ctx.finish().into_iter().map(DecodedPage::from).collect();
    Ok(Document { pages })
}

enum Flow {
    Continue,
    EndOfFile,
}

fn decode_segment<'a>(ctx: &mut DecodeContext<'a>, segment: &Segment<'a>) -> Result<Flow> {
    let header = &segment.header;
    let mut reader = Reader::new(segment.data);

    match header.segment_type {
        SegmentType::SymbolDictionary => {
            let (input, prior) = ctx.registry.symbols(header)?;
            let tables = ctx.registry.tables(header)?;
            let dictionary = symbol::decode_dictionary(
                &mut reader,
                &mut ctx.decoder,
                &input,
                &tables,
                &ctx.standard,
                prior,
                ctx.settings.strict,
            )?;

            ldebug!(
                "symbol dictionary {}: {} new symbols, {} exported",
                header.number,
                dictionary.new_symbols,
                dictionary.exported.len()
            );
            ctx.registry
                .insert(header.number, SegmentResult::Symbols(dictionary));
        }
        SegmentType::IntermediateTextRegion
        | SegmentType::ImmediateTextRegion
        | SegmentType::ImmediateLosslessTextRegion => {
            let (symbols, _) = ctx.registry.symbols(header)?;
            let tables = ctx.registry.tables(header)?;
            let region = text::decode_region(
                &mut reader,
                &mut ctx.decoder,
                &symbols,
                &tables,
                &ctx.standard,
            )?;
            place_region(ctx, header, region)?;
        }
        SegmentType::PatternDictionary => {
            let dictionary = pattern::decode_dictionary(&mut reader, &mut ctx.decoder)?;
            ctx.registry
                .insert(header.number, SegmentResult::Patterns(dictionary));
        }
        SegmentType::IntermediateHalftoneRegion
        | SegmentType::ImmediateHalftoneRegion
        | SegmentType::ImmediateLosslessHalftoneRegion => {
            let patterns = ctx.registry.patterns(header)?;
            let region = halftone::decode_region(&mut reader, &mut ctx.decoder, patterns)?;
            place_region(ctx, header, region)?;
        }
        SegmentType::IntermediateGenericRegion
        | SegmentType::ImmediateGenericRegion
        | SegmentType::ImmediateLosslessGenericRegion => {
            let unknown_length = header.data_length.is_none();
            let region = generic::decode_region(&mut reader, &mut ctx.decoder, unknown_length)?;
            place_region(ctx, header, region)?;
        }
        SegmentType::IntermediateRefinementRegion
        | SegmentType::ImmediateRefinementRegion
        | SegmentType::ImmediateLosslessRefinementRegion => {
            let page_reference;
            let reference = match ctx.registry.region(header)? {
                Some(region) => &region.bitmap,
                None => {
                    let info = RegionSegmentInfo::parse(&mut Reader::new(segment.data))?;
                    page_reference = ctx.page_slice(&info)?;
                    &page_reference
                }
            };

            let region =
                generic_refinement::decode_region(&mut reader, &mut ctx.decoder, reference)?;
            place_region(ctx, header, region)?;
        }
        SegmentType::PageInformation => {
            let info = PageInformation::parse(&mut reader)?;
            ctx.open_page(header.page_association, info)?;
        }
        SegmentType::EndOfPage => ctx.close_page(),
        SegmentType::EndOfStripe => {
            let end_row = reader.read_u32()?;
            ctx.page_mut()?.end_stripe(end_row)?;
        }
        SegmentType::EndOfFile => return Ok(Flow::EndOfFile),
        SegmentType::Tables => {
            let table = HuffmanTable::parse(segment.data)?;
            ctx.registry.insert(header.number, SegmentResult::Table(table));
        }
        SegmentType::Profiles | SegmentType::ColourPalette => {
            ldebug!("ignoring {:?} segment {}", header.segment_type, header.number);
        }
        SegmentType::Extension => {
            let extension_type = reader.read_u32()?;
            lwarn!(
                "ignoring extension segment {} of type {:#010x}",
                header.number,
                extension_type
            );
        }
    }

    Ok(Flow::Continue)
}

/// Draw an immediate region onto the page, or keep an intermediate one.
fn place_region(
    ctx: &mut DecodeContext<'_>,
    header: &SegmentHeader,
    region: RegionBitmap,
) -> Result<()> {
    if header.segment_type.is_immediate() {
        ctx.page_mut()?.composite(&region)
    } else {
        ctx.registry.insert(header.number, SegmentResult::Region(region));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::bitmap_from_rows;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl PixelSink for Recorder {
        fn push_pixel(&mut self, black: bool) {
            self.events.push(if black { "#" } else { "." }.to_string());
        }

        fn push_pixel_chunk(&mut self, black: bool, chunk_count: u32) {
            self.events
                .push(format!("{}x{}", if black { "#" } else { "." }, chunk_count));
        }

        fn next_line(&mut self) {
            self.events.push("/".to_string());
        }
    }

    fn page(rows: &[&str]) -> DecodedPage {
        DecodedPage {
            number: 1,
            bitmap: bitmap_from_rows(rows),
            x_resolution: None,
            y_resolution: None,
            flags: PageFlags::empty(),
        }
    }

    #[test]
    fn uniform_bytes_are_coalesced() {
        let page = page(&[
            "################........#.#.#.#.##",
            "................................##",
        ]);
        let mut recorder = Recorder::default();
        page.emit(&mut recorder);

        let expected = [
            "#x2", ".x1", "#", ".", "#", ".", "#", ".", "#", ".", "#", "#", "/", ".x4", "#",
            "#", "/",
        ];
        assert_eq!(recorder.events, expected);
    }

    #[test]
    fn narrow_rows_are_pushed_pixel_by_pixel() {
        let page = page(&["#.#", "..."]);
        let mut recorder = Recorder::default();
        page.emit(&mut recorder);

        assert_eq!(recorder.events, ["#", ".", "#", "/", ".", ".", ".", "/"]);
    }

    #[test]
    fn default_settings() {
        let settings = DecodeSettings::default();
        assert!(!settings.strict);
        assert!(!settings.tolerate_region_errors);
        assert_eq!(settings.max_page_pixels, 1 << 30);
    }
}
