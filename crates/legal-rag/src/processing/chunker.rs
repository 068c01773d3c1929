use crate::types::{DocumentChunk, RawDocument};

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkResult {
    pub text: String,
    pub index: usize,
    /// Char offsets into the source text, end exclusive.
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Sliding-window splitter measured in chars.
///
/// Every window holds at most `chunk_size` chars and the next window starts
/// `chunk_overlap` chars before the previous one ended. Window ends snap back
/// to a paragraph, sentence, line or word break when one falls in the second
/// half of the window.
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

const SENTENCE_BREAKS: [&str; 4] = [". ", ".\n", "? ", "! "];

impl TextChunker {
    /// `chunk_overlap` must be smaller than `chunk_size`; `Settings::validate`
    /// enforces this for configured values.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        debug_assert!(chunk_overlap < chunk_size, "overlap must be below chunk size");
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
        }
    }

    pub fn chunk(&self, text: &str) -> Vec<ChunkResult> {
        // bounds[c] is the byte offset of char c; the final entry is text.len().
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let total = bounds.len() - 1;

        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut index = 0usize;

        while start < total {
            let raw_end = (start + self.chunk_size).min(total);
            let end = if raw_end < total {
                self.find_break_point(text, &bounds, start, raw_end)
            } else {
                raw_end
            };

            let chunk_text = &text[bounds[start]..bounds[end]];
            if !chunk_text.trim().is_empty() {
                chunks.push(ChunkResult {
                    text: chunk_text.to_string(),
                    index,
                    start_offset: start,
                    end_offset: end,
                });
                index += 1;
            }

            if end >= total {
                break;
            }

            // Move forward with overlap
            start = if end - start > self.chunk_overlap {
                end - self.chunk_overlap
            } else {
                end
            };
        }

        chunks
    }

    /// Split loader records into chunks, numbering them per record and
    /// carrying the record's source and page onto each chunk.
    pub fn split_documents(&self, documents: &[RawDocument]) -> Vec<DocumentChunk> {
        documents
            .iter()
            .flat_map(|doc| {
                self.chunk(&doc.text)
                    .into_iter()
                    .map(move |c| DocumentChunk {
                        text: c.text,
                        source_path: doc.source_path.clone(),
                        page_number: doc.page_number,
                        chunk_index: c.index as u32,
                    })
            })
            .collect()
    }

    fn find_break_point(&self, text: &str, bounds: &[usize], start: usize, preferred_end: usize) -> usize {
        // The break must leave the chunk longer than the overlap so the
        // window always advances.
        let search_start = (start + self.chunk_overlap).max(start + self.chunk_size / 2);
        if search_start >= preferred_end {
            return preferred_end;
        }

        let region_start = bounds[search_start];
        let region = &text[region_start..bounds[preferred_end]];

        // Priority: paragraph break > sentence end > line break > word break
        let candidate = region
            .rfind("\n\n")
            .map(|pos| pos + 2)
            .or_else(|| {
                SENTENCE_BREAKS
                    .iter()
                    .filter_map(|sep| region.rfind(sep).map(|pos| pos + sep.len()))
                    .max()
            })
            .or_else(|| region.rfind('\n').map(|pos| pos + 1))
            .or_else(|| region.rfind(' ').map(|pos| pos + 1));

        match candidate {
            Some(offset) => bounds
                .binary_search(&(region_start + offset))
                .unwrap_or(preferred_end),
            None => preferred_end,
        }
    }
}
