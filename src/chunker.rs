//! Splitting extracted pages into semantically coherent chunks.
//!
//! The default chunker is token-aware with a configurable budget and overlap.
//! Markdown gets its own chunker that prefers header boundaries and carries
//! the header trail, tags and wikilinks as structural metadata.

use crate::types::{ChunkMetadata, ExtractedChunk, Page};

#[derive(Debug, Clone)]
pub struct ChunkConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            overlap_tokens: 48,
        }
    }
}

pub trait Chunker: Send + Sync {
    fn chunk(&self, pages: &[Page], cfg: &ChunkConfig) -> Vec<ExtractedChunk>;
}

/// Whitespace token estimate. Close enough for budgeting; the embedder does
/// its own truncation.
fn token_count(text: &str) -> usize {
    text.split_whitespace().count()
}

// ---------------------------------------------------------------------------
// Token chunker (default)
// ---------------------------------------------------------------------------

/// Line-accumulating chunker: lines are appended until the token budget is
/// exceeded, then the chunk is emitted and the trailing `overlap_tokens`
/// worth of lines seed the next chunk. Page origin is preserved — chunks
/// never span pages.
pub struct TokenChunker;

impl Chunker for TokenChunker {
    fn chunk(&self, pages: &[Page], cfg: &ChunkConfig) -> Vec<ExtractedChunk> {
        let mut chunks = Vec::new();
        for page in pages {
            chunk_page(&page.text, page.number, cfg, &mut chunks, |_| {
                ChunkMetadata::default()
            });
        }
        renumber(&mut chunks);
        chunks
    }
}

fn chunk_page(
    text: &str,
    page: Option<u32>,
    cfg: &ChunkConfig,
    out: &mut Vec<ExtractedChunk>,
    mut meta_for: impl FnMut(&str) -> ChunkMetadata,
) {
    let max = cfg.max_tokens.max(1);

    let mut current: Vec<&str> = Vec::new();
    let mut current_tokens = 0usize;

    let mut emit = |lines: &[&str], out: &mut Vec<ExtractedChunk>| {
        let text = lines.join("\n").trim().to_string();
        if !text.is_empty() {
            let metadata = meta_for(&text);
            out.push(ExtractedChunk {
                text,
                ordinal: 0,
                page,
                metadata,
            });
        }
    };

    for line in text.lines() {
        let line_tokens = token_count(line);

        // A single line over budget is hard-split on word boundaries.
        if line_tokens > max {
            if !current.is_empty() {
                emit(&current, out);
                current.clear();
                current_tokens = 0;
            }
            let words: Vec<&str> = line.split_whitespace().collect();
            for piece in words.chunks(max) {
                emit(&[piece.join(" ").as_str()], out);
            }
            continue;
        }

        if current_tokens + line_tokens > max && !current.is_empty() {
            emit(&current, out);

            // Seed the next chunk with the trailing overlap.
            let mut kept = Vec::new();
            let mut kept_tokens = 0usize;
            for l in current.iter().rev() {
                let t = token_count(l);
                if kept_tokens + t > cfg.overlap_tokens {
                    break;
                }
                kept_tokens += t;
                kept.push(*l);
            }
            kept.reverse();
            current = kept;
            current_tokens = kept_tokens;
        }

        current.push(line);
        current_tokens += line_tokens;
    }

    if !current.is_empty() {
        emit(&current, out);
    }
}

fn renumber(chunks: &mut [ExtractedChunk]) {
    for (i, c) in chunks.iter_mut().enumerate() {
        c.ordinal = i;
    }
}

// ---------------------------------------------------------------------------
// Markdown chunker
// ---------------------------------------------------------------------------

/// Splits at ATX header boundaries first, then applies the token budget
/// within each section. Each chunk carries its header trail plus any tags
/// and wikilinks found in its text.
pub struct MarkdownChunker;

impl Chunker for MarkdownChunker {
    fn chunk(&self, pages: &[Page], cfg: &ChunkConfig) -> Vec<ExtractedChunk> {
        let mut chunks = Vec::new();

        for page in pages {
            let mut trail: Vec<(usize, String)> = Vec::new();
            let mut section: Vec<&str> = Vec::new();

            let mut flush =
                |section: &mut Vec<&str>, trail: &[(usize, String)], out: &mut Vec<ExtractedChunk>| {
                    if section.is_empty() {
                        return;
                    }
                    let text = section.join("\n");
                    section.clear();
                    let headers: Vec<String> =
                        trail.iter().map(|(_, h)| h.clone()).collect();
                    chunk_page(&text, page.number, cfg, out, |chunk_text| ChunkMetadata {
                        tags: extract_tags(chunk_text),
                        links: extract_wikilinks(chunk_text),
                        headers: headers.clone(),
                    });
                };

            for line in page.text.lines() {
                if let Some((level, title)) = parse_header(line) {
                    flush(&mut section, &trail, &mut chunks);
                    trail.retain(|(l, _)| *l < level);
                    trail.push((level, title));
                    section.push(line);
                } else {
                    section.push(line);
                }
            }
            flush(&mut section, &trail, &mut chunks);
        }

        renumber(&mut chunks);
        chunks
    }
}

fn parse_header(line: &str) -> Option<(usize, String)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = trimmed[level..].trim();
    if rest.is_empty() {
        return None;
    }
    Some((level, rest.to_string()))
}

/// `[[target]]` and `[[target|alias]]` — the target side only.
pub fn extract_wikilinks(text: &str) -> Vec<String> {
    let mut links = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("[[") {
        rest = &rest[start + 2..];
        let Some(end) = rest.find("]]") else { break };
        let inner = &rest[..end];
        let target = inner.split('|').next().unwrap_or("").trim();
        if !target.is_empty() && !links.iter().any(|l| l == target) {
            links.push(target.to_string());
        }
        rest = &rest[end + 2..];
    }
    links
}

/// `#tag` tokens (Obsidian style). Headers are excluded by requiring the
/// `#` to be preceded by whitespace or start-of-line and followed by a
/// non-`#` word character.
pub fn extract_tags(text: &str) -> Vec<String> {
    let mut tags = Vec::new();
    for line in text.lines() {
        if line.trim_start().starts_with('#') && parse_header(line).is_some() {
            continue;
        }
        let bytes = line.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'#'
                && (i == 0 || bytes[i - 1].is_ascii_whitespace())
                && i + 1 < bytes.len()
            {
                let tag: String = line[i + 1..]
                    .chars()
                    .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || *c == '/')
                    .collect();
                if !tag.is_empty() && !tag.chars().all(|c| c.is_ascii_digit()) {
                    if !tags.contains(&tag) {
                        tags.push(tag.clone());
                    }
                    i += 1 + tag.len();
                    continue;
                }
            }
            i += 1;
        }
    }
    tags
}
