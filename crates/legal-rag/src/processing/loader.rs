use anyhow::{anyhow, Context, Result};
use lopdf::Document;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::{RagError, RagResult};
use crate::types::{DocumentFormat, RawDocument};

/// Reads PDF and plain-text files into loader records.
pub struct DocumentLoader;

impl Default for DocumentLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load every supported file below `dir`. A missing directory yields no
    /// records; unsupported extensions are skipped.
    pub fn load_directory(&self, dir: &Path) -> RagResult<Vec<RawDocument>> {
        if !dir.exists() {
            tracing::debug!(dir = %dir.display(), "Source directory missing, nothing to load");
            return Ok(Vec::new());
        }

        let mut documents = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| RagError::Load {
                path: dir.to_path_buf(),
                source: anyhow!(e),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            documents.extend(self.load_file(entry.path())?);
        }

        tracing::debug!(dir = %dir.display(), records = documents.len(), "Loaded directory");
        Ok(documents)
    }

    /// Load a single file: one record per PDF page, one per text file.
    pub fn load_file(&self, path: &Path) -> RagResult<Vec<RawDocument>> {
        let result = match DocumentFormat::from_path(path) {
            Some(DocumentFormat::PDF) => self.parse_pdf(path),
            Some(DocumentFormat::TXT) => self.parse_text(path),
            None => return Ok(Vec::new()),
        };

        result.map_err(|source| RagError::Load {
            path: path.to_path_buf(),
            source,
        })
    }

    fn parse_text(&self, path: &Path) -> Result<Vec<RawDocument>> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read text file: {}", path.display()))?;
        Ok(vec![RawDocument {
            text: String::from_utf8_lossy(&bytes).into_owned(),
            source_path: path.display().to_string(),
            page_number: 0,
        }])
    }

    fn parse_pdf(&self, path: &Path) -> Result<Vec<RawDocument>> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read PDF: {}", path.display()))?;
        let source_path = path.display().to_string();

        // Layer 1: lopdf per-page content stream extraction
        let doc = Document::load_mem(&bytes)
            .with_context(|| format!("lopdf: failed to load {}", path.display()))?;

        let mut pages = Vec::new();
        for (i, page_number) in doc.get_pages().keys().enumerate() {
            let text = match doc.extract_text(&[*page_number]) {
                Ok(text) => clean_pdf_text(&text),
                Err(e) => {
                    tracing::debug!(page = page_number, "lopdf page extraction failed: {}", e);
                    String::new()
                }
            };
            if !text.is_empty() {
                pages.push(RawDocument {
                    text,
                    source_path: source_path.clone(),
                    page_number: i as u32,
                });
            }
        }

        if !pages.is_empty() {
            return Ok(pages);
        }

        // Layer 2: pdf_extract over the whole file when no page produced text
        match pdf_extract::extract_text_from_mem(&bytes) {
            Ok(text) => {
                let cleaned = clean_pdf_text(&text);
                if !cleaned.is_empty() {
                    return Ok(vec![RawDocument {
                        text: cleaned,
                        source_path,
                        page_number: 0,
                    }]);
                }
            }
            Err(e) => tracing::debug!("pdf_extract failed for {}: {}", path.display(), e),
        }

        tracing::warn!(
            "PDF contains no extractable text (scanned/image-based): {}",
            path.display()
        );
        Ok(Vec::new())
    }
}

fn clean_pdf_text(text: &str) -> String {
    text.lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
