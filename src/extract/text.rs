//! Plain-text extractor: source code, config and data files, and anything
//! else that is valid (or near-valid) UTF-8 text. One page, no page number.

use std::path::Path;

use crate::error::EngineResult;
use crate::types::Page;

use super::Extractor;

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "rst", "rs", "py", "go", "java", "c", "cpp", "h", "hpp", "cs", "rb", "php", "swift",
    "kt", "scala", "ts", "tsx", "js", "jsx", "json", "yaml", "yml", "toml", "xml", "csv", "sql",
    "graphql", "sh", "bash", "zsh",
];

pub struct TextExtractor;

impl Extractor for TextExtractor {
    fn method(&self) -> &'static str {
        "text"
    }

    fn supports(&self, ext: &str) -> bool {
        TEXT_EXTENSIONS.contains(&ext)
    }

    fn extract(&self, path: &Path) -> EngineResult<Vec<Page>> {
        let bytes = std::fs::read(path)?;
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        let text = String::from_utf8_lossy(&bytes).into_owned();
        Ok(vec![Page {
            text,
            number: None,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_file_as_single_page() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.rs");
        std::fs::write(&p, "fn main() {}\n").unwrap();

        let pages = TextExtractor.extract(&p).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].text, "fn main() {}\n");
        assert_eq!(pages[0].number, None);
    }

    #[test]
    fn empty_file_yields_no_pages() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("empty.txt");
        std::fs::write(&p, "").unwrap();
        assert!(TextExtractor.extract(&p).unwrap().is_empty());
    }

    #[test]
    fn invalid_utf8_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("b.txt");
        std::fs::write(&p, [b'h', b'i', 0xFF, b'!', b' ', b'o', b'k']).unwrap();
        let pages = TextExtractor.extract(&p).unwrap();
        assert!(pages[0].text.contains("hi"));
        assert!(pages[0].text.contains("ok"));
    }
}
