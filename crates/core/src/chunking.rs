use crate::error::IngestError;
use crate::models::{Chunk, IngestionOptions, PageText};
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    /// Shortest window a natural break may produce. Never used to drop text.
    pub min_chars: usize,
    /// How far back from a window's end to look for a newline or sentence end.
    pub break_search_chars: usize,
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
            min_chars: value.min_chunk_chars,
            break_search_chars: value.break_search_chars,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from(&IngestionOptions::default())
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than max_chars {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }

    /// Short documents get smaller windows so they still split into a few chunks.
    pub fn adapted_to(&self, text_chars: usize) -> Self {
        if text_chars > 3_000 {
            return *self;
        }

        let max_chars = (text_chars / 3).max(500);
        Self {
            max_chars,
            overlap_chars: (max_chars / 10).min(100),
            min_chars: self.min_chars.min(max_chars / 2),
            break_search_chars: self.break_search_chars.min(max_chars),
        }
    }
}

/// Strips layout residue left by PDF text extraction while keeping line breaks.
pub fn clean_text(text: &str) -> Result<String, IngestError> {
    let checkbox_re = Regex::new(r"(?i):(un)?selected:")?;
    let rule_re = Regex::new(r"[-•=_*~#]{3,}")?;
    let spaces_re = Regex::new(r"[ \t\u{a0}]+")?;
    let blank_lines_re = Regex::new(r"\n\s*\n(\s*\n)+")?;

    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = checkbox_re.replace_all(&text, "");
    let text = rule_re.replace_all(&text, "");
    let text = spaces_re.replace_all(&text, " ");
    let text = blank_lines_re.replace_all(&text, "\n\n");

    Ok(text
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string())
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits the pages of one document into overlapping chunks.
///
/// Chunk boundaries depend only on the page texts and `config`, so re-running
/// on the same document yields the same `(chunk_index, page_from, page_to, text)`
/// sequence and therefore the same record ids.
pub fn chunk_document(
    document_id: &str,
    pages: &[PageText],
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    config.validate()?;

    let mut chars: Vec<char> = Vec::new();
    let mut page_of: Vec<u32> = Vec::new();

    for page in pages {
        let cleaned = clean_text(&page.text)?;
        if cleaned.is_empty() {
            continue;
        }

        if let Some(&previous_page) = page_of.last() {
            chars.push('\n');
            page_of.push(previous_page);
        }

        for character in cleaned.chars() {
            chars.push(character);
            page_of.push(page.number);
        }
    }

    let total = chars.len();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < total {
        let mut end = (start + config.max_chars).min(total);
        if end < total {
            if let Some(break_at) = natural_break(&chars, start, end, config) {
                end = break_at;
            }
        }

        let (mut span_start, mut span_end) = (start, end);
        while span_start < span_end && chars[span_start].is_whitespace() {
            span_start += 1;
        }
        while span_end > span_start && chars[span_end - 1].is_whitespace() {
            span_end -= 1;
        }

        if span_start < span_end {
            let pages_touched = &page_of[span_start..span_end];
            let page_from = pages_touched.iter().copied().min().unwrap_or_default();
            let page_to = pages_touched.iter().copied().max().unwrap_or_default();

            chunks.push(Chunk {
                document_id: document_id.to_string(),
                chunk_index: chunks.len() as u32,
                page_from,
                page_to,
                text: chars[span_start..span_end].iter().collect(),
                vector: None,
                structured: None,
            });
        }

        if end >= total {
            break;
        }

        let next = end.saturating_sub(config.overlap_chars);
        start = if next > start { next } else { end };
    }

    Ok(chunks)
}

/// End position just after the last newline, or else the last `". "`, inside the
/// search tail of the window, if that still leaves `min_chars` in the window.
fn natural_break(chars: &[char], start: usize, end: usize, config: ChunkingConfig) -> Option<usize> {
    let search_from = end.saturating_sub(config.break_search_chars).max(start);
    let acceptable = |candidate: usize| candidate > start && candidate - start >= config.min_chars;

    let newline = (search_from..end)
        .rev()
        .find(|&position| chars[position] == '\n')
        .map(|position| position + 1)
        .filter(|&candidate| acceptable(candidate));
    if newline.is_some() {
        return newline;
    }

    (search_from..end.saturating_sub(1))
        .rev()
        .find(|&position| chars[position] == '.' && chars[position + 1] == ' ')
        .map(|position| position + 1)
        .filter(|&candidate| acceptable(candidate))
}
