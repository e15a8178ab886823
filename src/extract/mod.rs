//! Pluggable format extractors.
//!
//! Each extractor handles a set of extensions and produces plain-text pages;
//! the registry routes a path to (extractor, chunker) at ingest time.
//! Extractors are constructed once and injected — never picked at call time
//! by anything other than the extension lookup here. Binary formats
//! (PDF/DOCX/EPUB) plug in through the same trait via `register`.

pub mod markdown;
pub mod notebook;
pub mod text;

use std::path::Path;
use std::sync::Arc;

use crate::chunker::{Chunker, MarkdownChunker, TokenChunker};
use crate::error::EngineResult;
use crate::types::Page;

pub trait Extractor: Send + Sync {
    /// Short tag recorded on the document row (e.g. "markdown", "text").
    fn method(&self) -> &'static str;

    fn supports(&self, ext: &str) -> bool;

    fn extract(&self, path: &Path) -> EngineResult<Vec<Page>>;

    /// Format-specific repair pass, attempted once after a failed `extract`.
    /// Default: no repair path.
    fn repair(&self, _path: &Path) -> Option<EngineResult<Vec<Page>>> {
        None
    }
}

pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn Extractor>>,
    token_chunker: Arc<dyn Chunker>,
    markdown_chunker: Arc<dyn Chunker>,
}

impl ExtractorRegistry {
    /// Registry with the built-in extractors. Reads configuration once;
    /// instances are cached for the engine's lifetime.
    pub fn with_defaults() -> Self {
        Self {
            extractors: vec![
                Arc::new(markdown::MarkdownExtractor),
                Arc::new(notebook::NotebookExtractor),
                Arc::new(text::TextExtractor),
            ],
            token_chunker: Arc::new(TokenChunker),
            markdown_chunker: Arc::new(MarkdownChunker),
        }
    }

    /// Add an extractor with higher priority than the built-ins.
    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        self.extractors.insert(0, extractor);
    }

    pub fn extension_of(path: &Path) -> String {
        path.extension()
            .unwrap_or_default()
            .to_string_lossy()
            .to_lowercase()
    }

    /// Route a path to its extractor and chunker. None when no extractor
    /// claims the extension.
    pub fn for_path(&self, path: &Path) -> Option<(Arc<dyn Extractor>, Arc<dyn Chunker>)> {
        let ext = Self::extension_of(path);
        let extractor = self
            .extractors
            .iter()
            .find(|e| e.supports(&ext))
            .cloned()?;
        let chunker = if ext == "md" || ext == "mdx" {
            self.markdown_chunker.clone()
        } else {
            self.token_chunker.clone()
        };
        Some((extractor, chunker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_by_extension() {
        let reg = ExtractorRegistry::with_defaults();
        let (e, _) = reg.for_path(Path::new("a/b/notes.md")).unwrap();
        assert_eq!(e.method(), "markdown");
        let (e, _) = reg.for_path(Path::new("x.ipynb")).unwrap();
        assert_eq!(e.method(), "notebook");
        let (e, _) = reg.for_path(Path::new("main.rs")).unwrap();
        assert_eq!(e.method(), "text");
        assert!(reg.for_path(Path::new("movie.mkv")).is_none());
    }

    #[test]
    fn registered_extractor_wins() {
        struct Fake;
        impl Extractor for Fake {
            fn method(&self) -> &'static str {
                "fake"
            }
            fn supports(&self, ext: &str) -> bool {
                ext == "md"
            }
            fn extract(&self, _path: &Path) -> EngineResult<Vec<Page>> {
                Ok(vec![])
            }
        }

        let mut reg = ExtractorRegistry::with_defaults();
        reg.register(Arc::new(Fake));
        let (e, _) = reg.for_path(Path::new("n.md")).unwrap();
        assert_eq!(e.method(), "fake");
    }
}
