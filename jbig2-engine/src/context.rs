//! The state of one decode: decoded segments, pages and shared decoders.

use std::collections::BTreeMap;

use crate::arithmetic_decoder::ArithmeticDecoder;
use crate::bitmap::Bitmap;
use crate::decode::pattern::PatternDictionary;
use crate::decode::symbol::{RetainedContexts, SymbolDictionary};
use crate::decode::{RegionBitmap, RegionSegmentInfo};
use crate::document::DecodeSettings;
use crate::error::{FormatError, Result, SegmentError, bail};
use crate::huffman_table::{HuffmanTable, StandardTables};
use crate::page::{Page, PageInformation};
use crate::segment::SegmentHeader;

/// What a segment left behind for later segments to refer to.
#[derive(Debug)]
pub(crate) enum SegmentResult {
    /// An intermediate region.
    Region(RegionBitmap),
    Symbols(SymbolDictionary),
    Patterns(PatternDictionary),
    /// A custom Huffman table.
    Table(HuffmanTable),
}

/// Decoded segments by number.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    segments: BTreeMap<u32, SegmentResult>,
}

impl Registry {
    pub(crate) fn insert(&mut self, number: u32, result: SegmentResult) {
        self.segments.insert(number, result);
    }

    pub(crate) fn get(&self, number: u32) -> Result<&SegmentResult> {
        self.segments
            .get(&number)
            .ok_or(SegmentError::UnresolvedReference(number).into())
    }

    /// The results of all referred-to segments, in reference order.
    fn referred<'s>(
        &'s self,
        header: &SegmentHeader,
    ) -> impl Iterator<Item = Result<(u32, &'s SegmentResult)>> {
        header
            .referred_segments
            .iter()
            .map(move |number| Ok((*number, self.get(*number)?)))
    }

    /// The custom Huffman tables among the referred-to segments.
    pub(crate) fn tables(&self, header: &SegmentHeader) -> Result<Vec<&HuffmanTable>> {
        let mut tables = Vec::new();
        for entry in self.referred(header) {
            if let (_, SegmentResult::Table(table)) = entry? {
                tables.push(table);
            }
        }

        Ok(tables)
    }

    /// The symbols exported by the referred-to symbol dictionaries, and the
    /// contexts retained by the last of them.
    pub(crate) fn symbols(
        &self,
        header: &SegmentHeader,
    ) -> Result<(Vec<&Bitmap>, Option<&RetainedContexts>)> {
        let mut symbols = Vec::new();
        let mut retained = None;

        for entry in self.referred(header) {
            match entry? {
                (_, SegmentResult::Symbols(dictionary)) => {
                    symbols.extend(dictionary.exported.iter());
                    retained = dictionary.retained.as_ref();
                }
                (_, SegmentResult::Table(_)) => {}
                (number, _) => bail!(SegmentError::UnexpectedReference(number)),
            }
        }

        Ok((symbols, retained))
    }

    /// The first referred-to pattern dictionary.
    pub(crate) fn patterns(&self, header: &SegmentHeader) -> Result<&PatternDictionary> {
        for entry in self.referred(header) {
            if let (_, SegmentResult::Patterns(patterns)) = entry? {
                return Ok(patterns);
            }
        }

        bail!(SegmentError::MissingPatternDictionary)
    }

    /// The intermediate region a refinement region refines, if it refers to one.
    pub(crate) fn region(&self, header: &SegmentHeader) -> Result<Option<&RegionBitmap>> {
        match header.referred_segments.first() {
            None => Ok(None),
            Some(number) => match self.get(*number)? {
                SegmentResult::Region(region) => Ok(Some(region)),
                _ => bail!(SegmentError::UnexpectedReference(*number)),
            },
        }
    }
}

/// Everything shared between the segments of one decode.
pub(crate) struct DecodeContext<'a> {
    pub(crate) registry: Registry,
    pub(crate) decoder: ArithmeticDecoder<'a>,
    pub(crate) standard: StandardTables,
    pub(crate) settings: DecodeSettings,
    page: Option<Page>,
    finished: Vec<Page>,
}

impl DecodeContext<'_> {
    pub(crate) fn new(settings: DecodeSettings) -> Self {
        Self {
            registry: Registry::default(),
            decoder: ArithmeticDecoder::new(&[]),
            standard: StandardTables::new(),
            settings,
            page: None,
            finished: Vec::new(),
        }
    }

    /// Start a new page, closing the current one.
    pub(crate) fn open_page(&mut self, number: u32, info: PageInformation) -> Result<()> {
        self.close_page();
        self.page = Some(Page::new(number, info, self.settings.max_page_pixels)?);
        Ok(())
    }

    pub(crate) fn close_page(&mut self) {
        if let Some(page) = self.page.take() {
            ldebug!("page {} finished", page.number);
            self.finished.push(page);
        }
    }

    pub(crate) fn page_mut(&mut self) -> Result<&mut Page> {
        self.page
            .as_mut()
            .ok_or(FormatError::MissingPageInfo.into())
    }

    /// The part of the current page a region covers, used as the reference of
    /// a refinement region that refers to no other region.
    pub(crate) fn page_slice(&self, info: &RegionSegmentInfo) -> Result<Bitmap> {
        let Some(page) = &self.page else {
            bail!(FormatError::MissingPageInfo);
        };

        page.slice(info.x, info.y, info.width, info.height)
    }

    /// Close the current page and hand out all pages in decoding order.
    pub(crate) fn finish(mut self) -> Vec<Page> {
        self.close_page();
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::CombinationOperator;
    use crate::error::DecodeError;
    use crate::segment::SegmentType;
    use crate::test_support::bitmap_from_rows;
    use smallvec::smallvec;

    fn header(number: u32, referred: &[u32]) -> SegmentHeader {
        SegmentHeader {
            number,
            segment_type: SegmentType::ImmediateTextRegion,
            page_association_long: false,
            deferred_non_retain: false,
            retention_flags: smallvec![0],
            referred_segments: referred.iter().copied().collect(),
            page_association: 1,
            data_length: Some(0),
        }
    }

    fn dictionary(rows: &[&str]) -> SegmentResult {
        SegmentResult::Symbols(SymbolDictionary {
            exported: vec![bitmap_from_rows(rows)],
            new_symbols: 1,
            retained: None,
        })
    }

    #[test]
    fn symbols_are_concatenated_in_reference_order() {
        let mut registry = Registry::default();
        registry.insert(0, dictionary(&["#"]));
        registry.insert(1, dictionary(&["##"]));

        let header = header(2, &[1, 0]);
        let (symbols, retained) = registry.symbols(&header).unwrap();

        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].width(), 2);
        assert_eq!(symbols[1].width(), 1);
        assert!(retained.is_none());
    }

    #[test]
    fn missing_segment_is_unresolved() {
        let registry = Registry::default();

        assert_eq!(
            registry.symbols(&header(5, &[3])).unwrap_err(),
            DecodeError::from(SegmentError::UnresolvedReference(3))
        );
    }

    #[test]
    fn wrong_kind_of_reference() {
        let mut registry = Registry::default();
        registry.insert(
            0,
            SegmentResult::Region(RegionBitmap {
                bitmap: bitmap_from_rows(&["#"]),
                x: 0,
                y: 0,
                operator: CombinationOperator::Or,
            }),
        );
        registry.insert(1, dictionary(&["#"]));

        assert_eq!(
            registry.symbols(&header(2, &[0])).unwrap_err(),
            DecodeError::from(SegmentError::UnexpectedReference(0))
        );
        assert_eq!(
            registry.region(&header(2, &[1])).unwrap_err(),
            DecodeError::from(SegmentError::UnexpectedReference(1))
        );
        assert!(registry.region(&header(2, &[0])).unwrap().is_some());
        assert_eq!(
            registry.patterns(&header(2, &[1])).unwrap_err(),
            DecodeError::from(SegmentError::MissingPatternDictionary)
        );
    }

    #[test]
    fn page_slice_needs_a_page() {
        let context = DecodeContext::new(DecodeSettings::default());
        let info = RegionSegmentInfo {
            width: 1,
            height: 1,
            x: 0,
            y: 0,
            operator: CombinationOperator::Or,
        };

        assert_eq!(
            context.page_slice(&info).unwrap_err(),
            DecodeError::from(FormatError::MissingPageInfo)
        );
    }
}
