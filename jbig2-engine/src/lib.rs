/*!
A memory-safe, pure-Rust JBIG2 decoder.

`jbig2-engine` decodes bi-level images coded as specified in ITU-T T.88
(ISO/IEC 14492). It handles the embedded organisation used by the
`JBIG2Decode` filter of PDF, where the segments of a page follow each other
directly and shared segments come in a separate globals stream, as well as
standalone JBIG2 files.

Every kind of region is supported: generic (arithmetic and MMR coded),
refinement, text with symbol dictionaries (arithmetic and Huffman coded) and
halftone with pattern dictionaries.

# Example
```rust,no_run
let data = std::fs::read("image.jb2").unwrap();
let document = jbig2_engine::decode_file(&data).unwrap();

for page in document.pages() {
    println!("page {}: {}x{}", page.number(), page.width(), page.height());
}
```

# Safety
This crate forbids unsafe code via a crate-level attribute.

# Cargo features
- `logging` (enabled by default): report decoding progress and recovered
  inconsistencies through the `log` crate.
*/

#![forbid(unsafe_code)]

#[macro_use]
mod log;

mod arithmetic_decoder;
mod bitmap;
mod context;
mod decode;
mod document;
mod error;
mod file;
mod gray_scale;
mod huffman_table;
mod integer_decoder;
mod page;
mod reader;
mod segment;

#[cfg(test)]
mod test_support;

pub use bitmap::{Bitmap, CombinationOperator};
pub use document::{DecodeSettings, DecodedPage, Document, PixelSink};
pub use error::{
    DecodeError, ErrorKind, FormatError, HuffmanError, ParseError, RegionError, Result,
    SegmentError, SymbolError, TemplateError, Unsupported,
};
pub use page::PageFlags;

use reader::Reader;

/// Decode an embedded JBIG2 stream, as found in a PDF `JBIG2Decode` filter.
///
/// `globals` holds the segments shared between the images of a document
/// (the `JBIG2Globals` stream), if any. They are decoded before `data`.
pub fn decode(data: &[u8], globals: Option<&[u8]>) -> Result<Document> {
    decode_with_settings(data, globals, DecodeSettings::default())
}

/// Like [`decode`], with explicit settings.
pub fn decode_with_settings(
    data: &[u8],
    globals: Option<&[u8]>,
    settings: DecodeSettings,
) -> Result<Document> {
    let mut segments = match globals {
        Some(globals) => segment::parse_segments(&mut Reader::new(globals))?,
        None => Vec::new(),
    };
    segments.extend(segment::parse_segments(&mut Reader::new(data))?);

    document::decode_segments(&segments, settings)
}

/// Decode a standalone JBIG2 file (Annex D).
pub fn decode_file(data: &[u8]) -> Result<Document> {
    decode_file_with_settings(data, DecodeSettings::default())
}

/// Like [`decode_file`], with explicit settings.
pub fn decode_file_with_settings(data: &[u8], settings: DecodeSettings) -> Result<Document> {
    let (header, segments) = file::parse_file(data)?;

    ldebug!(
        "file header: {:?}, {:?} pages, extended templates: {}, coloured regions: {}",
        header.organization,
        header.page_count,
        header.uses_extended_templates,
        header.has_coloured_regions
    );

    document::decode_segments(&segments, settings)
}
