use crate::chunking::{chunk_document, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::error::{EmbeddingError, IngestError};
use crate::extractor::{total_chars, DocumentExtractor};
use crate::models::{
    Chunk, DocumentBlob, DocumentFingerprint, DocumentState, ExtractedData, FileIndexStatus,
    IndexOptions, IndexReceipt, IndexStatus, IndexedRecord, IngestionOptions, PageText,
    StalePolicy, StructuredRecord,
};
use crate::retry::RetryPolicy;
use crate::structured::{extract_or_empty, StructuredFieldExtractor};
use crate::traits::IndexStore;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

const ERROR_PREVIEW_CHARS: usize = 200;
const EMBED_BATCH_SIZE: usize = 16;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Stable document id: SHA-256 hex of the file name, so re-uploading the same
/// name replaces the earlier chunks.
pub fn generate_document_id(filename: &str) -> String {
    checksum(filename.as_bytes())
}

pub fn fingerprint(blob: &DocumentBlob) -> DocumentFingerprint {
    DocumentFingerprint {
        document_id: generate_document_id(&blob.filename),
        filename: blob.filename.clone(),
        checksum: checksum(&blob.bytes),
        ingested_at: Utc::now(),
    }
}

/// Name of `path` relative to `root`, with `/` separators.
pub fn relative_name(root: &Path, path: &Path) -> Result<String, IngestError> {
    match path.strip_prefix(root) {
        Ok(relative) if !relative.as_os_str().is_empty() => Ok(relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")),
        _ => path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string())),
    }
}

pub async fn read_blob(path: &Path, filename: String) -> Result<DocumentBlob, IngestError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(DocumentBlob::new(filename, bytes))
}

fn preview_text(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte_index, _)) => format!("{}...", &text[..byte_index]),
        None => text.to_string(),
    }
}

fn joined_text(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|page| page.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Ids of `document_id` whose chunk index is not below `chunk_count`.
fn stale_ids(existing: Vec<String>, document_id: &str, chunk_count: u32) -> Vec<String> {
    existing
        .into_iter()
        .filter(|id| match id.rsplit_once('#') {
            Some((owner, index)) => {
                owner == document_id && index.parse::<u32>().is_ok_and(|index| index >= chunk_count)
            }
            None => false,
        })
        .collect()
}

/// Two-phase ingestion: `extract_preview` reads documents without writing,
/// `confirm_and_index` chunks, embeds and stores a (possibly edited) snapshot.
pub struct IngestionPipeline<X, F, E, S> {
    extractor: X,
    fields: F,
    embedder: E,
    store: S,
    options: IngestionOptions,
    retry: RetryPolicy,
}

impl<X, F, E, S> IngestionPipeline<X, F, E, S>
where
    X: DocumentExtractor,
    F: StructuredFieldExtractor,
    E: Embedder,
    S: IndexStore,
{
    pub fn new(extractor: X, fields: F, embedder: E, store: S, options: IngestionOptions) -> Self {
        Self {
            extractor,
            fields,
            embedder,
            store,
            options,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn options(&self) -> &IngestionOptions {
        &self.options
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// One entry per input file, in input order. Never writes to the store.
    #[instrument(skip_all, fields(files = files.len()))]
    pub async fn extract_preview(&self, files: Vec<DocumentBlob>) -> Vec<ExtractedData> {
        stream::iter(files)
            .map(|blob| self.preview_one(blob))
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await
    }

    async fn preview_one(&self, blob: DocumentBlob) -> ExtractedData {
        let fingerprint = fingerprint(&blob);
        debug!(
            filename = %blob.filename,
            checksum = %fingerprint.checksum,
            state = ?DocumentState::Pending,
            "queued for extraction"
        );
        debug!(filename = %blob.filename, state = ?DocumentState::Extracting, "extracting");

        let pages = match self.extractor.extract_pages(&blob).await {
            Ok(pages) => pages,
            Err(error) => {
                warn!(filename = %blob.filename, state = ?DocumentState::ExtractionError, %error, "extraction failed");
                return ExtractedData::failed(blob.filename, fingerprint.document_id, error.to_string());
            }
        };

        let text = joined_text(&pages);
        let length = text.chars().count();

        if length < self.options.min_text_chars {
            let details = if length == 0 {
                "no text could be extracted; the PDF may be scanned or image-only".to_string()
            } else {
                "the PDF may be mostly images or have formatting issues".to_string()
            };
            let error = IngestError::InsufficientText { length, details };
            warn!(filename = %blob.filename, state = ?DocumentState::ExtractionError, %error, "extraction failed");
            let mut data =
                ExtractedData::failed(blob.filename, fingerprint.document_id, error.to_string());
            data.text_length = Some(length);
            data.raw_text_preview = Some(text.chars().take(ERROR_PREVIEW_CHARS).collect());
            return data;
        }

        let structured = extract_or_empty(&self.fields, &text, &self.retry).await;
        info!(
            filename = %blob.filename,
            state = ?DocumentState::Extracted,
            characters = length,
            fields = structured.len(),
            "extracted"
        );

        ExtractedData {
            filename: blob.filename,
            document_id: fingerprint.document_id,
            status: DocumentState::Extracted,
            text_length: Some(length),
            structured_info: Some(structured),
            raw_text_preview: Some(preview_text(&text, self.options.preview_chars)),
            pages: Some(pages),
            error: None,
        }
    }

    /// Indexes every entry that extracted cleanly. Per-file failures are
    /// reported in the receipt and never abort the other files.
    #[instrument(skip_all, fields(files = records.len(), batch_size = options.batch_size))]
    pub async fn confirm_and_index(
        &self,
        records: Vec<ExtractedData>,
        options: IndexOptions,
    ) -> IndexReceipt {
        let statuses = self.index_all(records, options).await;
        let receipt = IndexReceipt::from_statuses(statuses);
        info!(
            indexed = receipt.indexed_count,
            degraded = receipt.degraded_count,
            stale_removed = receipt.stale_removed,
            failures = receipt.failures.len(),
            "confirm finished"
        );
        receipt
    }

    /// Preview and confirm every PDF under `folder` without edits.
    #[instrument(skip(self, options))]
    pub async fn ingest_folder(
        &self,
        folder: &Path,
        options: IndexOptions,
    ) -> Result<IndexReceipt, IngestError> {
        let files = discover_pdf_files(folder);
        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no pdf files found in {}",
                folder.display()
            )));
        }

        let mut blobs = Vec::with_capacity(files.len());
        let mut statuses = Vec::new();
        for path in files {
            let filename = relative_name(folder, &path)?;
            match read_blob(&path, filename.clone()).await {
                Ok(blob) => blobs.push(blob),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping unreadable file");
                    statuses.push(FileIndexStatus {
                        document_id: generate_document_id(&filename),
                        filename,
                        status: IndexStatus::Failed {
                            error: error.to_string(),
                        },
                    });
                }
            }
        }

        let previews = self.extract_preview(blobs).await;
        statuses.extend(self.index_all(previews, options).await);
        Ok(IndexReceipt::from_statuses(statuses))
    }

    /// Entries sharing a document id with an earlier indexable entry are
    /// failed rather than indexed concurrently over the same record ids.
    async fn index_all(&self, records: Vec<ExtractedData>, options: IndexOptions) -> Vec<FileIndexStatus> {
        let mut claimed = HashSet::new();
        stream::iter(records)
            .map(|record| {
                let document_id = if record.document_id.is_empty() {
                    generate_document_id(&record.filename)
                } else {
                    record.document_id.clone()
                };
                let duplicate = record.error.is_none() && !claimed.insert(document_id.clone());
                self.index_one(record, document_id, duplicate, options)
            })
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await
    }

    async fn index_one(
        &self,
        record: ExtractedData,
        document_id: String,
        duplicate: bool,
        options: IndexOptions,
    ) -> FileIndexStatus {
        let filename = record.filename.clone();

        let indexed = if duplicate {
            Err(IngestError::InvalidArgument(format!(
                "document {document_id} appears more than once in the snapshot"
            )))
        } else {
            self.index_document(&document_id, record, options).await
        };

        let status = match indexed {
            Ok(status) => status,
            Err(error) => {
                warn!(%filename, %error, "indexing failed");
                IndexStatus::Failed {
                    error: error.to_string(),
                }
            }
        };

        FileIndexStatus {
            filename,
            document_id,
            status,
        }
    }

    async fn index_document(
        &self,
        document_id: &str,
        record: ExtractedData,
        options: IndexOptions,
    ) -> Result<IndexStatus, IngestError> {
        if let Some(error) = record.error {
            return Err(IngestError::Extraction(error));
        }
        if record.status != DocumentState::Extracted {
            return Err(IngestError::InvalidArgument(format!(
                "document is {:?}, not extracted",
                record.status
            )));
        }
        let pages = record.pages.ok_or_else(|| {
            IngestError::InvalidArgument("snapshot carries no page text".to_string())
        })?;

        let mut config = ChunkingConfig::from(&self.options);
        if self.options.adaptive_chunking {
            config = config.adapted_to(total_chars(&pages));
        }

        let mut chunks = chunk_document(document_id, &pages, config)?;
        if chunks.is_empty() {
            return Err(IngestError::InsufficientText {
                length: 0,
                details: "no chunks produced".to_string(),
            });
        }

        let vectors = self.embed_chunks(&chunks).await;
        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.vector = vector;
        }

        let document_fields = record.structured_info.unwrap_or_default();
        let chunks: Vec<Chunk> = stream::iter(chunks)
            .map(|chunk| self.attach_fields(chunk, &document_fields))
            .buffered(self.options.embed_concurrency.max(1))
            .collect()
            .await;

        let degraded = chunks.iter().filter(|chunk| chunk.vector.is_none()).count();
        let records: Vec<IndexedRecord> = chunks
            .iter()
            .map(|chunk| IndexedRecord::from_chunk(chunk, &record.filename))
            .collect();

        let batch_size = options.batch_size.max(1);
        let batches = records.len().div_ceil(batch_size);
        debug!(document_id, write_mode = ?options.write_mode, batches, "upserting");

        for (position, batch) in records.chunks(batch_size).enumerate() {
            self.retry
                .run("upsert_batch", || self.store.upsert(batch))
                .await
                .map_err(|source| IngestError::BatchUpsert {
                    batch: position + 1,
                    batches,
                    source,
                })?;
        }

        let (stale_removed, stale_error) = match options.stale_policy {
            StalePolicy::Keep => (0, None),
            StalePolicy::Delete => match self.remove_stale(document_id, records.len() as u32).await {
                Ok(removed) => (removed, None),
                Err(error) => {
                    warn!(document_id, %error, "stale cleanup failed, new chunks stay indexed");
                    (0, Some(error.to_string()))
                }
            },
        };

        info!(
            filename = %record.filename,
            chunks = records.len(),
            degraded,
            stale_removed,
            "indexed document"
        );

        Ok(IndexStatus::Indexed {
            chunks: records.len(),
            degraded,
            stale_removed,
            stale_error,
        })
    }

    /// One vector slot per chunk, `None` for chunks that could not be embedded.
    async fn embed_chunks(&self, chunks: &[Chunk]) -> Vec<Option<Vec<f32>>> {
        let groups: Vec<Vec<Option<Vec<f32>>>> = stream::iter(chunks.chunks(EMBED_BATCH_SIZE))
            .map(|group| self.embed_group(group))
            .buffered(self.options.embed_concurrency.max(1))
            .collect()
            .await;
        groups.into_iter().flatten().collect()
    }

    /// Embeds a group in one request; when that keeps failing, each chunk is
    /// retried on its own so only the offending chunks degrade.
    async fn embed_group(&self, group: &[Chunk]) -> Vec<Option<Vec<f32>>> {
        if let [chunk] = group {
            return vec![self.embed_one(chunk).await];
        }

        let texts: Vec<String> = group.iter().map(|chunk| chunk.text.clone()).collect();
        let batch = self
            .retry
            .run("embed_batch", || async {
                let vectors = self.embedder.embed_batch(&texts).await?;
                if vectors.len() != texts.len() {
                    return Err(EmbeddingError::Response(format!(
                        "expected {} vectors, got {}",
                        texts.len(),
                        vectors.len()
                    )));
                }
                for vector in &vectors {
                    self.check_dimension(vector)?;
                }
                Ok(vectors)
            })
            .await;

        match batch {
            Ok(vectors) => vectors.into_iter().map(Some).collect(),
            Err(error) => {
                debug!(chunks = group.len(), %error, "batch embedding failed, embedding chunks one by one");
                let mut vectors = Vec::with_capacity(group.len());
                for chunk in group {
                    vectors.push(self.embed_one(chunk).await);
                }
                vectors
            }
        }
    }

    async fn embed_one(&self, chunk: &Chunk) -> Option<Vec<f32>> {
        let embedded = self
            .retry
            .run("embed_chunk", || async {
                let vector = self.embedder.embed(&chunk.text).await?;
                self.check_dimension(&vector)?;
                Ok::<_, EmbeddingError>(vector)
            })
            .await;

        match embedded {
            Ok(vector) => Some(vector),
            Err(error) => {
                warn!(record_id = %chunk.record_id(), %error, "embedding failed, chunk stays lexical-only");
                None
            }
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), EmbeddingError> {
        let expected = self.embedder.dimensions();
        if vector.len() != expected {
            return Err(EmbeddingError::Dimension {
                expected,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    async fn attach_fields(&self, mut chunk: Chunk, document_fields: &StructuredRecord) -> Chunk {
        let mut structured = document_fields.clone();
        if self.options.per_chunk_fields {
            let chunk_fields = extract_or_empty(&self.fields, &chunk.text, &self.retry).await;
            structured.merge_missing(&chunk_fields);
        }

        chunk.structured = (!structured.is_empty()).then_some(structured);
        chunk
    }

    async fn remove_stale(&self, document_id: &str, chunk_count: u32) -> Result<usize, IngestError> {
        let existing = self
            .retry
            .run("list_record_ids", || self.store.record_ids(document_id))
            .await?;

        let stale = stale_ids(existing, document_id, chunk_count);
        if stale.is_empty() {
            return Ok(0);
        }

        self.retry
            .run("delete_stale", || self.store.delete(&stale))
            .await?;
        debug!(document_id, removed = stale.len(), "removed stale chunks");
        Ok(stale.len())
    }
}
