//! Boundary-aware, lossless text splitting.
//!
//! Text is cut into pieces at the coarsest boundary that fits the budget and then merged
//! greedily back into chunks:
//!
//! - paragraph breaks (`\n\n`), then single line breaks,
//! - Unicode sentence boundaries, then word boundaries,
//! - grapheme clusters, and finally hard character cuts.
//!
//! Separators stay attached to the piece they terminate, so concatenating the chunks of a
//! document reproduces its text byte for byte. Sizes are measured in `char`s.

use super::types::{Chunk, ParsedDocument};
use unicode_segmentation::UnicodeSegmentation;

#[derive(Clone, Copy, Debug)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
    Word,
    Grapheme,
    Character,
}

impl Boundary {
    fn finer(self) -> Self {
        match self {
            Self::Paragraph => Self::Line,
            Self::Line => Self::Sentence,
            Self::Sentence => Self::Word,
            Self::Word => Self::Grapheme,
            Self::Grapheme | Self::Character => Self::Character,
        }
    }

    fn split(self, text: &str) -> Vec<&str> {
        match self {
            Self::Paragraph => text.split_inclusive("\n\n").collect(),
            Self::Line => text.split_inclusive('\n').collect(),
            Self::Sentence => text.split_sentence_bounds().collect(),
            Self::Word => text.split_word_bounds().collect(),
            Self::Grapheme => text.graphemes(true).collect(),
            Self::Character => text
                .char_indices()
                .map(|(start, ch)| &text[start..start + ch.len_utf8()])
                .collect(),
        }
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split `text` into chunks of at most `chunk_size` characters.
///
/// Returns an empty vector for empty input. A `chunk_size` of zero is treated as one.
pub fn split_text(text: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let mut pieces = Vec::new();
    collect_pieces(text, Boundary::Paragraph, chunk_size, &mut pieces);
    merge_pieces(pieces, chunk_size)
}

fn collect_pieces<'a>(
    text: &'a str,
    boundary: Boundary,
    chunk_size: usize,
    out: &mut Vec<&'a str>,
) {
    if text.is_empty() {
        return;
    }
    if char_len(text) <= chunk_size {
        out.push(text);
        return;
    }
    if let Boundary::Character = boundary {
        let mut start = 0;
        for (count, (offset, _)) in text.char_indices().enumerate() {
            if count > 0 && count % chunk_size == 0 {
                out.push(&text[start..offset]);
                start = offset;
            }
        }
        out.push(&text[start..]);
        return;
    }
    for piece in boundary.split(text) {
        if char_len(piece) <= chunk_size {
            out.push(piece);
        } else {
            collect_pieces(piece, boundary.finer(), chunk_size, out);
        }
    }
}

fn merge_pieces(pieces: Vec<&str>, chunk_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for piece in pieces {
        let piece_len = char_len(piece);
        if current_len > 0 && current_len + piece_len > chunk_size {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(piece);
        current_len += piece_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Split a parsed document into indexed chunks tagged with the document name.
pub fn chunk_document(document: &ParsedDocument, chunk_size: usize) -> Vec<Chunk> {
    split_text(&document.text, chunk_size)
        .into_iter()
        .enumerate()
        .map(|(chunk_index, text)| Chunk {
            text,
            source_name: document.name.clone(),
            chunk_index,
        })
        .collect()
}
