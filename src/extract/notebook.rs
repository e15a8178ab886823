//! Jupyter notebook extractor. Parses the `.ipynb` JSON and emits one page
//! per markdown/code cell, preserving cell order. Outputs are ignored.

use std::path::Path;

use serde::Deserialize;

use crate::error::{EngineError, EngineResult};
use crate::types::Page;

use super::Extractor;

#[derive(Deserialize)]
struct Notebook {
    #[serde(default)]
    cells: Vec<Cell>,
}

#[derive(Deserialize)]
struct Cell {
    #[serde(default)]
    cell_type: String,
    #[serde(default)]
    source: CellSource,
}

/// Notebook `source` is either a string or a list of line strings.
#[derive(Deserialize, Default)]
#[serde(untagged)]
enum CellSource {
    #[default]
    Empty,
    One(String),
    Lines(Vec<String>),
}

impl CellSource {
    fn text(&self) -> String {
        match self {
            CellSource::Empty => String::new(),
            CellSource::One(s) => s.clone(),
            CellSource::Lines(lines) => lines.concat(),
        }
    }
}

pub struct NotebookExtractor;

impl Extractor for NotebookExtractor {
    fn method(&self) -> &'static str {
        "notebook"
    }

    fn supports(&self, ext: &str) -> bool {
        ext == "ipynb"
    }

    fn extract(&self, path: &Path) -> EngineResult<Vec<Page>> {
        let raw = std::fs::read_to_string(path)?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        let notebook: Notebook = serde_json::from_str(&raw).map_err(|e| {
            EngineError::Extraction {
                path: path.display().to_string(),
                reason: format!("invalid notebook JSON: {e}"),
            }
        })?;

        let mut pages = Vec::new();
        for cell in &notebook.cells {
            if !matches!(cell.cell_type.as_str(), "markdown" | "code") {
                continue;
            }
            let text = cell.source.text();
            if text.trim().is_empty() {
                continue;
            }
            pages.push(Page { text, number: None });
        }
        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_become_pages() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("n.ipynb");
        std::fs::write(
            &p,
            r##"{"cells": [
                {"cell_type": "markdown", "source": ["# Title\n", "intro\n"]},
                {"cell_type": "code", "source": "print('hi')"},
                {"cell_type": "raw", "source": "skip me"},
                {"cell_type": "code", "source": []}
            ]}"##,
        )
        .unwrap();

        let pages = NotebookExtractor.extract(&p).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].text, "# Title\nintro\n");
        assert_eq!(pages[1].text, "print('hi')");
    }

    #[test]
    fn invalid_json_is_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("bad.ipynb");
        std::fs::write(&p, "{ not json").unwrap();
        let err = NotebookExtractor.extract(&p).unwrap_err();
        assert!(matches!(err, EngineError::Extraction { .. }));
    }
}
