use crate::cleaning::TextCleaner;
use crate::chunking::Chunker;
use crate::embeddings::{embed_with_retry, Embedder, RetryPolicy};
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::traits::VectorIndex;
use crate::{EmbeddingRecord, IngestError, IngestionReport, Resource};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .map(|entry| entry.path().to_path_buf())
        .collect();

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Source id for a document: its file stem with every non-alphanumeric
/// character replaced by `_` (`3 Radicals-Notes.pdf` -> `3_Radicals_Notes`).
pub fn source_id_from_path(path: &Path) -> Result<String, IngestError> {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| {
            IngestError::InvalidArgument(format!("path has no file stem: {}", path.display()))
        })?;

    Ok(stem
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect())
}

#[derive(Debug)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct FolderReport {
    pub documents: Vec<IngestionReport>,
    pub skipped_files: Vec<SkippedPdf>,
}

impl FolderReport {
    pub fn chunk_count(&self) -> usize {
        self.documents.iter().map(|report| report.chunk_count).sum()
    }
}

/// Extract, clean, chunk, embed and persist documents, one source at a time.
///
/// Chunks are embedded strictly sequentially. Re-ingesting a source replaces
/// all of its previous records once at least one new chunk has been embedded.
pub struct IngestionPipeline<S: ?Sized, E: ?Sized> {
    extractor: Box<dyn PdfExtractor>,
    cleaner: TextCleaner,
    chunker: Chunker,
    embedder: Arc<E>,
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S, E> IngestionPipeline<S, E>
where
    S: VectorIndex + ?Sized,
    E: Embedder + ?Sized,
{
    pub fn new(store: Arc<S>, embedder: Arc<E>) -> Self {
        Self {
            extractor: Box::new(LopdfExtractor),
            cleaner: TextCleaner::new(),
            chunker: Chunker::default(),
            embedder,
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_chunker(mut self, chunker: Chunker) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_extractor(mut self, extractor: impl PdfExtractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    pub async fn ingest(&self, pdf: &[u8], source: &str) -> Result<IngestionReport, IngestError> {
        let raw = self.extractor.extract_text(pdf)?;
        self.ingest_extracted(&raw, source, digest_bytes(pdf)).await
    }

    /// Ingests already-extracted text, skipping the PDF step.
    pub async fn ingest_text(&self, raw: &str, source: &str) -> Result<IngestionReport, IngestError> {
        self.ingest_extracted(raw, source, digest_bytes(raw.as_bytes()))
            .await
    }

    pub async fn ingest_path(
        &self,
        path: &Path,
        source: Option<&str>,
    ) -> Result<IngestionReport, IngestError> {
        let source = match source {
            Some(source) => source.to_string(),
            None => source_id_from_path(path)?,
        };
        let bytes = tokio::fs::read(path).await?;
        self.ingest(&bytes, &source).await
    }

    /// Ingests every PDF below `folder`. A document that fails is recorded in
    /// `skipped_files` and the run continues.
    pub async fn ingest_folder(&self, folder: &Path) -> Result<FolderReport, IngestError> {
        let files = discover_pdf_files(folder);
        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no pdf files found in {}",
                folder.display()
            )));
        }

        let mut report = FolderReport::default();
        for path in files {
            match self.ingest_path(&path, None).await {
                Ok(document) => report.documents.push(document),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping pdf");
                    report.skipped_files.push(SkippedPdf {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        info!(
            documents = report.documents.len(),
            skipped = report.skipped_files.len(),
            chunks = report.chunk_count(),
            "folder ingestion finished"
        );
        Ok(report)
    }

    async fn ingest_extracted(
        &self,
        raw: &str,
        source: &str,
        checksum: String,
    ) -> Result<IngestionReport, IngestError> {
        if source.trim().is_empty() {
            return Err(IngestError::InvalidArgument(
                "source id must not be empty".to_string(),
            ));
        }

        let cleaned = self.cleaner.clean_paragraphs(raw);
        let chunks = self.chunker.chunk(&cleaned, source);

        let mut resources = Vec::with_capacity(chunks.len());
        let mut embeddings = Vec::with_capacity(chunks.len());
        let mut dropped = 0;

        for (position, chunk) in chunks.into_iter().enumerate() {
            let vector = match embed_with_retry(&*self.embedder, &chunk.content, self.retry).await {
                Ok(vector) => vector,
                Err(error) => {
                    warn!(source, chunk = position, %error, "dropping chunk after failed embedding");
                    dropped += 1;
                    continue;
                }
            };

            let created_at = Utc::now();
            let resource = Resource {
                id: Uuid::new_v4().to_string(),
                content: chunk.content,
                source: source.to_string(),
                chunk_index: resources.len() as u64,
                metadata: chunk.metadata,
                created_at,
            };
            embeddings.push(EmbeddingRecord {
                id: Uuid::new_v4().to_string(),
                resource_id: resource.id.clone(),
                content: resource.content.clone(),
                source: resource.source.clone(),
                chunk_index: resource.chunk_index,
                embedding: vector,
                metadata: resource.metadata.clone(),
                created_at,
            });
            resources.push(resource);
        }

        if resources.is_empty() {
            return Err(IngestError::NoChunks {
                source_id: source.to_string(),
            });
        }

        let replaced = self.store.delete_source(source).await?;
        self.store.index_records(&resources, &embeddings).await?;

        info!(
            source,
            chunks = resources.len(),
            dropped,
            replaced,
            "ingested document"
        );

        Ok(IngestionReport {
            source: source.to_string(),
            checksum,
            chunk_count: resources.len(),
            dropped_chunks: dropped,
            replaced_records: replaced,
            ingested_at: Utc::now(),
        })
    }
}
