//! Ingestion contracts: where source files come from and how text is extracted.
//!
//! The engine only depends on [`DocumentSource`] and [`TextExtractor`].
//! Remote stores, authentication and rich-format parsing live behind these
//! traits; this module ships a local [`DirectorySource`] and the
//! [`PlainTextExtractor`].

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::document::SourceDocument;
use crate::error::{RagError, Result};

/// The format of a source file, derived from its extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FormatTag {
    /// `.txt`, `.md` and similar.
    PlainText,
    /// `.doc`, `.docx`, `.odt`, `.rtf`.
    WordProcessor,
    /// `.pdf`.
    Pdf,
    /// Anything else, with the lower-cased extension.
    Other(String),
}

impl FormatTag {
    /// Classify a file name by its extension.
    pub fn from_file_name(name: &str) -> Self {
        let extension =
            name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()).unwrap_or_default();
        match extension.as_str() {
            "txt" | "text" | "md" | "markdown" => Self::PlainText,
            "doc" | "docx" | "odt" | "rtf" => Self::WordProcessor,
            "pdf" => Self::Pdf,
            _ => Self::Other(extension),
        }
    }
}

/// A reference to one source file, as listed by a [`DocumentSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    /// Unique name; becomes the [`SourceDocument`] id.
    pub id: String,
    /// The file's format.
    pub format: FormatTag,
}

impl FileRef {
    /// Create a reference, deriving the format from the name.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let format = FormatTag::from_file_name(&id);
        Self { id, format }
    }
}

/// Lists and fetches raw source files.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// List the files that make up the corpus.
    async fn list_source_files(&self) -> Result<Vec<FileRef>>;

    /// Fetch the raw bytes of one file.
    async fn fetch_content(&self, file: &FileRef) -> Result<Vec<u8>>;
}

/// Turns raw bytes of a given format into plain text.
pub trait TextExtractor: Send + Sync {
    /// Extract the plain text of a file.
    fn extract_text(&self, bytes: &[u8], format: &FormatTag) -> Result<String>;
}

/// Extracts UTF-8 plain text; invalid sequences are replaced rather than rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract_text(&self, bytes: &[u8], format: &FormatTag) -> Result<String> {
        match format {
            FormatTag::PlainText => Ok(String::from_utf8_lossy(bytes).into_owned()),
            other => Err(RagError::Ingestion {
                source_id: String::new(),
                message: format!("plain-text extractor cannot read {other:?} content"),
            }),
        }
    }
}

/// A [`DocumentSource`] over the files directly inside a local directory.
///
/// Only regular files whose extension is in the allow-list are listed
/// (default: `txt`). Listing is sorted by name so builds are reproducible.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    extensions: Vec<String>,
}

impl DirectorySource {
    /// Create a source listing `*.txt` files in `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), extensions: vec!["txt".to_string()] }
    }

    /// Replace the extension allow-list (case-insensitive, without dots).
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(|e| e.into().to_lowercase()).collect();
        self
    }

    fn accepts(&self, name: &str) -> bool {
        name.rsplit_once('.').is_some_and(|(_, ext)| {
            let ext = ext.to_lowercase();
            self.extensions.iter().any(|allowed| *allowed == ext)
        })
    }
}

#[async_trait]
impl DocumentSource for DirectorySource {
    async fn list_source_files(&self) -> Result<Vec<FileRef>> {
        let listing_error = |e: std::io::Error| RagError::Ingestion {
            source_id: "*".to_string(),
            message: format!("cannot list '{}': {e}", self.root.display()),
        };

        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(listing_error)?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(listing_error)? {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = %entry.path().display(), "skipping non UTF-8 file name");
                continue;
            };
            if is_file && self.accepts(&name) {
                files.push(FileRef::new(name));
            }
        }

        files.sort_by(|a, b| a.id.cmp(&b.id));
        debug!(root = %self.root.display(), file_count = files.len(), "listed source files");
        Ok(files)
    }

    async fn fetch_content(&self, file: &FileRef) -> Result<Vec<u8>> {
        tokio::fs::read(self.root.join(&file.id)).await.map_err(|e| RagError::Ingestion {
            source_id: file.id.clone(),
            message: format!("cannot read file: {e}"),
        })
    }
}

/// List, fetch and extract every source file into [`SourceDocument`]s.
///
/// Files with empty extracted text and repeated ids are skipped with a
/// warning. Any other failure aborts with [`RagError::Ingestion`].
pub async fn collect_documents(
    source: &dyn DocumentSource,
    extractor: &dyn TextExtractor,
) -> Result<Vec<SourceDocument>> {
    let files = source.list_source_files().await?;
    let mut seen = HashSet::with_capacity(files.len());
    let mut documents = Vec::with_capacity(files.len());

    for file in files {
        if !seen.insert(file.id.clone()) {
            warn!(source_id = %file.id, "skipping duplicate source id");
            continue;
        }

        let bytes = source.fetch_content(&file).await?;
        let text = extractor.extract_text(&bytes, &file.format).map_err(|e| match e {
            RagError::Ingestion { message, .. } => {
                RagError::Ingestion { source_id: file.id.clone(), message }
            }
            other => other,
        })?;

        if text.is_empty() {
            warn!(source_id = %file.id, "skipping document with no text");
            continue;
        }
        documents.push(SourceDocument::new(file.id, text));
    }

    info!(document_count = documents.len(), "collected source documents");
    Ok(documents)
}
