//! Plain text and Markdown codec.
//!
//! Pages are separated by form feeds (`\x0C`). Text without any form feed
//! is paginated every [`LINES_PER_PAGE`] lines. Rasterization does not draw
//! glyphs: every non-whitespace character becomes a solid cell on a
//! monospace grid, which is enough for page previews and is fully
//! deterministic.

use crate::error::{ErrorKind, Result};
use crate::{Codec, DocumentFormat, DocumentHandle, Metadata, Raster};

const FORM_FEED: char = '\x0C';
pub(crate) const LINES_PER_PAGE: usize = 50;
/// Only this many leading lines are inspected for an author line.
const AUTHOR_SEARCH_LINES: usize = 10;

// US Letter at 72 points per inch.
const PAGE_WIDTH_PT: f32 = 612.0;
const PAGE_HEIGHT_PT: f32 = 792.0;
const MARGIN_PT: f32 = 36.0;
const CELL_WIDTH_PT: f32 = 7.2;
const LINE_HEIGHT_PT: f32 = 14.0;
const MAX_SCALE: f32 = 4.0;

const PAPER: [u8; 4] = [255, 255, 255, 255];
const INK: [u8; 4] = [32, 32, 32, 255];

/// Codec for `.txt` and Markdown files.
#[derive(Debug, Clone, Copy)]
pub struct PlainTextCodec {
    format: DocumentFormat,
}

impl PlainTextCodec {
    pub fn plain() -> Self {
        Self { format: DocumentFormat::Txt }
    }

    pub fn markdown() -> Self {
        Self { format: DocumentFormat::Markdown }
    }
}

impl Codec for PlainTextCodec {
    fn open(&self, bytes: Vec<u8>) -> Result<Box<dyn DocumentHandle>> {
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => exn::bail!(ErrorKind::Decode(format!("not valid UTF-8 ({})", e.utf8_error()))),
        };
        let metadata = Metadata {
            title: find_title(&text, self.format),
            author: find_author(&text),
            file_type: self.format,
        };
        let pages = paginate(&text);
        tracing::trace!(format = %self.format, pages = pages.len(), "Opened plain text document");
        Ok(Box::new(TextDocument { pages, metadata }))
    }
}

struct TextDocument {
    pages: Vec<String>,
    metadata: Metadata,
}

impl TextDocument {
    fn page(&self, page: usize) -> Result<&str> {
        match page.checked_sub(1).and_then(|index| self.pages.get(index)) {
            Some(text) => Ok(text),
            None => exn::bail!(ErrorKind::PageOutOfRange { page, total: self.pages.len() }),
        }
    }
}

impl DocumentHandle for TextDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn metadata(&self) -> Metadata {
        self.metadata.clone()
    }

    fn page_text(&self, page: usize) -> Result<String> {
        self.page(page).map(str::to_string)
    }

    fn rasterize(&self, page: usize, scale: f32) -> Result<Raster> {
        let text = self.page(page)?;
        if !scale.is_finite() || scale <= 0.0 || scale > MAX_SCALE {
            exn::bail!(ErrorKind::Rasterize(format!("scale {scale} outside (0, {MAX_SCALE}]")));
        }
        Ok(draw(text, scale))
    }
}

fn paginate(text: &str) -> Vec<String> {
    if text.contains(FORM_FEED) {
        return text.split(FORM_FEED).map(str::to_string).collect();
    }
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return vec![String::new()];
    }
    lines.chunks(LINES_PER_PAGE).map(|chunk| chunk.join("\n")).collect()
}

fn find_title(text: &str, format: DocumentFormat) -> Option<String> {
    let line = text.lines().map(str::trim).find(|line| !line.is_empty())?;
    let line = match format {
        DocumentFormat::Markdown => line.trim_start_matches('#').trim(),
        _ => line,
    };
    (!line.is_empty()).then(|| line.to_string())
}

fn find_author(text: &str) -> Option<String> {
    text.lines().take(AUTHOR_SEARCH_LINES).map(str::trim).find_map(|line| {
        let rest = strip_prefix_ignore_case(line, "author:").or_else(|| strip_prefix_ignore_case(line, "by "))?;
        let name = rest.trim();
        (!name.is_empty()).then(|| name.to_string())
    })
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &line[prefix.len()..])
}

fn draw(text: &str, scale: f32) -> Raster {
    let width = (PAGE_WIDTH_PT * scale).round().max(1.0) as u32;
    let height = (PAGE_HEIGHT_PT * scale).round().max(1.0) as u32;
    let mut pixels = PAPER.repeat(width as usize * height as usize);

    for (row, line) in text.lines().enumerate() {
        let top = MARGIN_PT + row as f32 * LINE_HEIGHT_PT;
        if top + LINE_HEIGHT_PT > PAGE_HEIGHT_PT - MARGIN_PT {
            break;
        }
        for (column, ch) in line.chars().enumerate() {
            let left = MARGIN_PT + column as f32 * CELL_WIDTH_PT;
            if left + CELL_WIDTH_PT > PAGE_WIDTH_PT - MARGIN_PT {
                break;
            }
            if ch.is_whitespace() {
                continue;
            }
            let x0 = ((left + 1.0) * scale) as u32;
            let x1 = (((left + CELL_WIDTH_PT - 1.0) * scale) as u32).min(width);
            let y0 = ((top + 2.0) * scale) as u32;
            let y1 = (((top + LINE_HEIGHT_PT - 2.0) * scale) as u32).min(height);
            for y in y0..y1 {
                let start = (y as usize * width as usize + x0 as usize) * 4;
                let end = (y as usize * width as usize + x1 as usize) * 4;
                for pixel in pixels[start..end].chunks_exact_mut(4) {
                    pixel.copy_from_slice(&INK);
                }
            }
        }
    }

    Raster { width, height, pixels }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn open(codec: PlainTextCodec, text: &str) -> Box<dyn DocumentHandle> {
        codec.open(text.as_bytes().to_vec()).unwrap()
    }

    #[test]
    fn form_feeds_separate_pages() {
        let doc = open(PlainTextCodec::plain(), "one\x0Ctwo\x0Cthree");
        assert_eq!(doc.page_count(), 3);
        assert_eq!(doc.page_text(2).unwrap(), "two");
    }

    #[test]
    fn long_text_is_paginated_by_lines() {
        let text = (1..=120).map(|n| format!("line {n}")).collect::<Vec<_>>().join("\n");
        let doc = open(PlainTextCodec::plain(), &text);
        assert_eq!(doc.page_count(), 3);
        assert!(doc.page_text(3).unwrap().starts_with("line 101"));
    }

    #[test]
    fn empty_document_has_one_blank_page() {
        let doc = open(PlainTextCodec::plain(), "");
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.page_text(1).unwrap(), "");
        assert_eq!(doc.metadata().title, None);
    }

    #[rstest]
    #[case(0)]
    #[case(4)]
    fn pages_outside_the_document_are_rejected(#[case] page: usize) {
        let doc = open(PlainTextCodec::plain(), "a\x0Cb\x0Cc");
        let err = doc.page_text(page).unwrap_err();
        assert_eq!(*err, ErrorKind::PageOutOfRange { page, total: 3 });
        assert!(doc.rasterize(page, 1.0).is_err());
    }

    #[test]
    fn invalid_utf8_is_a_decode_failure() {
        let err = PlainTextCodec::plain().open(vec![0xff, 0xfe, 0x00]).err().unwrap();
        assert!(matches!(&*err, ErrorKind::Decode(_)));
    }

    #[rstest]
    #[case(PlainTextCodec::plain(), "\n\n  Moby Dick  \nCall me Ishmael.", Some("Moby Dick"))]
    #[case(PlainTextCodec::markdown(), "# Field Notes\n\nbody", Some("Field Notes"))]
    #[case(PlainTextCodec::plain(), "# Not a heading\n", Some("# Not a heading"))]
    #[case(PlainTextCodec::markdown(), "###\n", None)]
    fn title_is_the_first_line(#[case] codec: PlainTextCodec, #[case] text: &str, #[case] expected: Option<&str>) {
        assert_eq!(open(codec, text).metadata().title.as_deref(), expected);
    }

    #[rstest]
    #[case("Title\nAuthor: Herman Melville\n", Some("Herman Melville"))]
    #[case("Title\nby Jane Austen\n", Some("Jane Austen"))]
    #[case("Title\nAUTHOR:   \n", None)]
    #[case("Title\nNobody in particular\n", None)]
    fn author_line_is_detected(#[case] text: &str, #[case] expected: Option<&str>) {
        assert_eq!(open(PlainTextCodec::plain(), text).metadata().author.as_deref(), expected);
    }

    #[test]
    fn rasterization_is_deterministic_and_scaled() {
        let doc = open(PlainTextCodec::plain(), "the quick brown fox");
        let first = doc.rasterize(1, 1.0).unwrap();
        let second = doc.rasterize(1, 1.0).unwrap();
        assert_eq!(first, second);
        assert_eq!((first.width, first.height), (612, 792));
        assert_eq!(first.pixels.len(), 612 * 792 * 4);
        assert!(first.pixels.chunks_exact(4).any(|px| px == INK));

        let half = doc.rasterize(1, 0.5).unwrap();
        assert_eq!((half.width, half.height), (306, 396));
    }

    #[test]
    fn blank_page_rasterizes_to_paper() {
        let doc = open(PlainTextCodec::plain(), "   ");
        let raster = doc.rasterize(1, 0.25).unwrap();
        assert!(raster.pixels.chunks_exact(4).all(|px| px == PAPER));
    }

    #[rstest]
    #[case(0.0)]
    #[case(-1.0)]
    #[case(f32::NAN)]
    #[case(10.0)]
    fn absurd_scales_are_refused(#[case] scale: f32) {
        let doc = open(PlainTextCodec::plain(), "text");
        let err = doc.rasterize(1, scale).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Rasterize(_)));
    }
}
