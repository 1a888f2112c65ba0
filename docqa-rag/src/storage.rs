//! Durable storage for [`VectorIndex`].
//!
//! [`FileIndexStore`] writes a single file: one JSON header line followed by
//! the JSON payload. The header carries a SHA-256 checksum of the payload, so
//! truncated or tampered files are reported as corrupt instead of being
//! half-loaded. Writes go to a temp file in the same directory that is then
//! renamed over the target.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::document::{Chunk, EmbeddedChunk};
use crate::error::{IndexFault, RagError, Result};
use crate::index::VectorIndex;

/// File name used inside the index directory.
pub const INDEX_FILE_NAME: &str = "index.docqa";

const FORMAT_VERSION: u32 = 1;

/// Change-detection token for a persisted index.
///
/// Two equal stamps mean the persisted bytes have not been replaced in
/// between, as far as modification time and size can tell. A replacement of
/// the same length written by another process within one mtime tick of the
/// filesystem produces an equal stamp and goes unnoticed until the next
/// change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStamp {
    /// Last modification time, when the backend reports one.
    pub modified: Option<SystemTime>,
    /// Size of the persisted blob in bytes.
    pub len: u64,
}

/// A storage backend holding at most one persisted index.
///
/// `save` must replace the previous index atomically: a concurrent or later
/// `load` sees either the old index or the new one, never a mix.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Names the storage location. Builds are serialized per location.
    fn location(&self) -> &str;

    /// Returns `None` when nothing is persisted.
    async fn stamp(&self) -> Result<Option<IndexStamp>>;

    /// Load the persisted index.
    ///
    /// Every failure is a [`RagError::IndexUnavailable`].
    async fn load(&self) -> Result<VectorIndex>;

    /// Replace the persisted index.
    async fn save(&self, index: &VectorIndex) -> Result<()>;
}

/// An [`IndexStore`] backed by a file inside a directory.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::FileIndexStore;
///
/// let store = FileIndexStore::new("./vector_index");
/// ```
#[derive(Debug, Clone)]
pub struct FileIndexStore {
    dir: PathBuf,
    path: PathBuf,
    location: String,
}

impl FileIndexStore {
    /// Create a store persisting to `dir/index.docqa`. Nothing is touched on disk yet.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let path = dir.join(INDEX_FILE_NAME);
        let location = path.display().to_string();
        Self { dir, path, location }
    }

    /// The full path of the index file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl IndexStore for FileIndexStore {
    fn location(&self) -> &str {
        &self.location
    }

    async fn stamp(&self) -> Result<Option<IndexStamp>> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Ok(Some(IndexStamp { modified: meta.modified().ok(), len: meta.len() })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RagError::corrupt(&self.location, format!("cannot stat index: {e}"))),
        }
    }

    async fn load(&self) -> Result<VectorIndex> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RagError::IndexUnavailable {
                    location: self.location.clone(),
                    fault: IndexFault::Missing,
                });
            }
            Err(e) => {
                return Err(RagError::corrupt(&self.location, format!("cannot read index: {e}")));
            }
        };

        let index = decode(&bytes).map_err(|reason| RagError::corrupt(&self.location, reason))?;
        debug!(location = %self.location, chunk_count = index.len(), "loaded vector index");
        Ok(index)
    }

    async fn save(&self, index: &VectorIndex) -> Result<()> {
        let bytes = encode(index).map_err(|message| RagError::Storage {
            location: self.location.clone(),
            message,
        })?;
        let size = bytes.len();
        let dir = self.dir.clone();
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomically(&dir, &path, &bytes))
            .await
            .map_err(|e| RagError::Storage {
                location: self.location.clone(),
                message: format!("writer task failed: {e}"),
            })?
            .map_err(|e| RagError::Storage {
                location: self.location.clone(),
                message: e.to_string(),
            })?;

        info!(
            location = %self.location,
            bytes = size,
            chunk_count = index.len(),
            "saved vector index"
        );
        Ok(())
    }
}

fn write_atomically(dir: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[derive(Serialize, Deserialize)]
struct Header {
    format_version: u32,
    dimensions: usize,
    model_id: String,
    chunk_count: usize,
    checksum: String,
}

#[derive(Serialize, Deserialize)]
struct Payload {
    documents: Vec<StoredDocument>,
    entries: Vec<StoredEntry>,
}

#[derive(Serialize, Deserialize)]
struct StoredDocument {
    id: String,
    text: String,
}

/// Vectors are stored as raw `f32` bit patterns so reloads are exact.
#[derive(Serialize, Deserialize)]
struct StoredEntry {
    document: usize,
    text: String,
    vector_bits: Vec<u32>,
}

fn checksum(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    format!("{:x}", hasher.finalize())
}

fn encode(index: &VectorIndex) -> std::result::Result<Vec<u8>, String> {
    let mut positions: HashMap<(&str, &str), usize> = HashMap::new();
    let mut documents = Vec::new();
    let mut entries = Vec::with_capacity(index.len());

    for entry in index.entries() {
        let key = (entry.chunk.source_id(), entry.chunk.full_text());
        let document = *positions.entry(key).or_insert_with(|| {
            documents.push(StoredDocument { id: key.0.to_string(), text: key.1.to_string() });
            documents.len() - 1
        });
        entries.push(StoredEntry {
            document,
            text: entry.chunk.text().to_string(),
            vector_bits: entry.vector.iter().map(|x| x.to_bits()).collect(),
        });
    }

    let payload = serde_json::to_vec(&Payload { documents, entries }).map_err(|e| e.to_string())?;
    let header = Header {
        format_version: FORMAT_VERSION,
        dimensions: index.dimensions(),
        model_id: index.model_id().to_string(),
        chunk_count: index.len(),
        checksum: checksum(&payload),
    };

    let mut out = serde_json::to_vec(&header).map_err(|e| e.to_string())?;
    out.push(b'\n');
    out.extend_from_slice(&payload);
    Ok(out)
}

fn decode(bytes: &[u8]) -> std::result::Result<VectorIndex, String> {
    let split = bytes.iter().position(|b| *b == b'\n').ok_or("missing header line")?;
    let (header_bytes, payload) = (&bytes[..split], &bytes[split + 1..]);

    let header: Header =
        serde_json::from_slice(header_bytes).map_err(|e| format!("invalid header: {e}"))?;
    if header.format_version != FORMAT_VERSION {
        return Err(format!("unsupported format version {}", header.format_version));
    }
    if checksum(payload) != header.checksum {
        return Err("checksum mismatch".to_string());
    }

    let payload: Payload =
        serde_json::from_slice(payload).map_err(|e| format!("invalid payload: {e}"))?;
    if payload.entries.len() != header.chunk_count {
        return Err(format!(
            "header declares {} chunks, payload has {}",
            header.chunk_count,
            payload.entries.len()
        ));
    }

    let mut embedded = Vec::with_capacity(payload.entries.len());
    for entry in payload.entries {
        let document = payload
            .documents
            .get(entry.document)
            .ok_or_else(|| format!("dangling document reference {}", entry.document))?;
        if entry.vector_bits.len() != header.dimensions {
            return Err(format!(
                "entry has {} components, header declares {}",
                entry.vector_bits.len(),
                header.dimensions
            ));
        }
        embedded.push(EmbeddedChunk {
            chunk: Chunk::new(entry.text, document.id.clone(), document.text.clone()),
            vector: entry.vector_bits.into_iter().map(f32::from_bits).collect(),
        });
    }

    VectorIndex::build(embedded, header.model_id).map_err(|e| e.to_string())
}
