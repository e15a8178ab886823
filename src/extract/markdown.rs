//! Markdown extractor. Strips YAML frontmatter, returns the body as a single
//! page, and can derive the Obsidian note payload (title, wikilinks, tags)
//! for the graph store.

use std::path::Path;

use crate::chunker::{extract_tags, extract_wikilinks};
use crate::error::EngineResult;
use crate::types::{NotePayload, Page};

use super::Extractor;

pub struct MarkdownExtractor;

impl Extractor for MarkdownExtractor {
    fn method(&self) -> &'static str {
        "markdown"
    }

    fn supports(&self, ext: &str) -> bool {
        matches!(ext, "md" | "mdx")
    }

    fn extract(&self, path: &Path) -> EngineResult<Vec<Page>> {
        let raw = std::fs::read(path)?;
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        let text = String::from_utf8_lossy(&raw);
        let (_, body) = split_frontmatter(&text);
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Page {
            text: body.to_string(),
            number: None,
        }])
    }
}

/// Split `---`-fenced YAML frontmatter off the top of a note.
/// Returns (frontmatter or "", body).
pub fn split_frontmatter(text: &str) -> (&str, &str) {
    let Some(rest) = text.strip_prefix("---") else {
        return ("", text);
    };
    let Some(rest) = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n")) else {
        return ("", text);
    };
    for line in rest.match_indices('\n').map(|(i, _)| i) {
        let candidate = &rest[line + 1..];
        if candidate.starts_with("---\n")
            || candidate.starts_with("---\r\n")
            || candidate.trim_end() == "---"
        {
            let fm = &rest[..line];
            let body_start = candidate
                .find('\n')
                .map(|n| &candidate[n + 1..])
                .unwrap_or("");
            return (fm, body_start);
        }
    }
    ("", text)
}

/// Note attributes for the graph: title comes from frontmatter `title:`,
/// the first `#` header, or the file stem, in that order.
pub fn note_payload(path: &Path, text: &str) -> NotePayload {
    let (frontmatter, body) = split_frontmatter(text);

    let fm_title = frontmatter.lines().find_map(|l| {
        let l = l.trim();
        l.strip_prefix("title:")
            .map(|t| t.trim().trim_matches('"').trim_matches('\'').to_string())
            .filter(|t| !t.is_empty())
    });

    let header_title = body.lines().find_map(|l| {
        let t = l.trim_start();
        t.strip_prefix("# ").map(|s| s.trim().to_string())
    });

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut tags = extract_tags(body);
    // frontmatter `tags: [a, b]` or `tags: a, b`
    if let Some(fm_tags) = frontmatter.lines().find_map(|l| {
        l.trim().strip_prefix("tags:").map(|t| t.trim().to_string())
    }) {
        for tag in fm_tags
            .trim_start_matches('[')
            .trim_end_matches(']')
            .split(',')
        {
            let tag = tag.trim().trim_start_matches('#').to_string();
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
    }

    NotePayload {
        title: fm_title.or(header_title).unwrap_or(stem),
        links: extract_wikilinks(body),
        tags,
    }
}
