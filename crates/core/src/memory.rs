use crate::embeddings::Embedder;
use crate::traits::VectorIndex;
use crate::{
    ChunkMetadata, ChunkType, EmbeddingRecord, IngestError, MemoryRole, NeighborQuery, Resource,
    SearchError, SearchHit, SourceFilter,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemoryConfig {
    pub recall_limit: usize,
    pub candidate_pool: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recall_limit: 6,
            candidate_pool: 100,
        }
    }
}

/// Long-term memory for chat threads.
///
/// Uses its own store, with the thread id in the `source` field, so memories
/// never mix with course content. Stored text carries a `[role] ` prefix.
pub struct ConversationMemory<S: ?Sized, E: ?Sized> {
    store: Arc<S>,
    embedder: Arc<E>,
    config: MemoryConfig,
}

impl<S, E> ConversationMemory<S, E>
where
    S: VectorIndex + ?Sized,
    E: Embedder + ?Sized,
{
    pub fn new(store: Arc<S>, embedder: Arc<E>) -> Self {
        Self {
            store,
            embedder,
            config: MemoryConfig::default(),
        }
    }

    pub fn with_config(mut self, config: MemoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Stores the user and assistant sides of turn `turn`. Empty messages are
    /// skipped; returns how many records were written.
    pub async fn remember_exchange(
        &self,
        thread_id: &str,
        turn: u64,
        user: &str,
        assistant: &str,
    ) -> Result<usize, IngestError> {
        if thread_id.trim().is_empty() {
            return Err(IngestError::InvalidArgument(
                "thread id must not be empty".to_string(),
            ));
        }

        let mut resources = Vec::new();
        let mut embeddings = Vec::new();

        for (offset, role, text) in [(0, MemoryRole::User, user), (1, MemoryRole::Assistant, assistant)] {
            let text = text.trim();
            if text.is_empty() {
                continue;
            }

            let content = format!("[{}] {text}", role.as_str());
            let vector = self.embedder.embed(&content).await?;
            let metadata = ChunkMetadata {
                role: Some(role),
                ..ChunkMetadata::new(ChunkType::Content)
            };
            let created_at = Utc::now();
            let resource = Resource {
                id: Uuid::new_v4().to_string(),
                content,
                source: thread_id.to_string(),
                chunk_index: turn * 2 + offset,
                metadata,
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
            return Ok(0);
        }

        self.store.index_records(&resources, &embeddings).await?;
        debug!(thread = thread_id, turn, records = resources.len(), "stored memories");
        Ok(resources.len())
    }

    /// Memories of `thread_id` closest to `query`. A thread with nothing
    /// stored yet returns without embedding the query.
    pub async fn recall(&self, thread_id: &str, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let filter = SourceFilter::single(thread_id);
        if self.store.count_embeddings(Some(&filter)).await? == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query).await?;
        let hits = self
            .store
            .nearest_neighbors(&NeighborQuery {
                vector,
                k: self.config.recall_limit,
                candidate_pool: self.config.candidate_pool,
                filter: Some(filter.clone()),
            })
            .await?;

        Ok(hits
            .into_iter()
            .filter(|hit| filter.admits(hit.source.as_deref()))
            .take(self.config.recall_limit)
            .collect())
    }

    pub async fn forget_thread(&self, thread_id: &str) -> Result<usize, IngestError> {
        Ok(self.store.delete_source(thread_id).await?)
    }
}

/// One line per recalled memory.
pub fn render_memories(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| hit.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::stores::InMemoryStore;

    fn memory() -> (Arc<InMemoryStore>, ConversationMemory<InMemoryStore, CharacterNgramEmbedder>) {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(CharacterNgramEmbedder { dimensions: 64 });
        (store.clone(), ConversationMemory::new(store, embedder))
    }

    #[tokio::test]
    async fn exchanges_are_stored_with_roles() -> Result<(), Box<dyn std::error::Error>> {
        let (store, memory) = memory();
        let written = memory
            .remember_exchange("thread-1", 3, "How do I rationalize?", "Multiply by the conjugate.")
            .await?;
        assert_eq!(written, 2);

        let records = store.resources_for("thread-1").await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].chunk_index, 6);
        assert_eq!(records[0].metadata.role, Some(MemoryRole::User));
        assert_eq!(records[0].content, "[user] How do I rationalize?");
        assert_eq!(records[1].metadata.role, Some(MemoryRole::Assistant));
        Ok(())
    }

    #[tokio::test]
    async fn recall_is_scoped_to_the_thread() -> Result<(), Box<dyn std::error::Error>> {
        let (_, memory) = memory();
        memory
            .remember_exchange("thread-1", 0, "radicals question", "radicals answer")
            .await?;
        memory
            .remember_exchange("thread-2", 0, "exponents question", "exponents answer")
            .await?;

        let hits = memory.recall("thread-1", "radicals").await?;
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|hit| hit.source.as_deref() == Some("thread-1")));

        let rendered = render_memories(&hits);
        assert_eq!(rendered.lines().count(), 2);
        assert!(rendered.contains("[user] radicals question"));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_thread_recalls_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let (_, memory) = memory();
        memory.remember_exchange("thread-1", 0, "hello", "hi").await?;
        assert!(memory.recall("thread-9", "hello").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn empty_messages_are_skipped_and_threads_forgotten() -> Result<(), Box<dyn std::error::Error>> {
        let (store, memory) = memory();
        assert_eq!(memory.remember_exchange("thread-1", 0, "  ", "").await?, 0);
        assert_eq!(memory.remember_exchange("thread-1", 1, "only user", " ").await?, 1);

        assert_eq!(memory.forget_thread("thread-1").await?, 1);
        assert_eq!(store.count_embeddings(None).await?, 0);
        Ok(())
    }
}
