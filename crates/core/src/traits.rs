use crate::{
    EmbeddingRecord, LexicalQuery, NeighborQuery, Resource, SearchHit, SourceFilter, StoreError,
};
use async_trait::async_trait;
use std::collections::BTreeMap;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Persists resources together with their embeddings. Both slices are
    /// paired through `EmbeddingRecord::resource_id`.
    async fn index_records(
        &self,
        resources: &[Resource],
        embeddings: &[EmbeddingRecord],
    ) -> Result<(), StoreError>;

    /// Removes every resource and embedding tagged with `source`, returning
    /// how many embeddings were removed.
    async fn delete_source(&self, source: &str) -> Result<usize, StoreError>;

    async fn count_embeddings(&self, filter: Option<&SourceFilter>) -> Result<usize, StoreError>;

    /// Nearest neighbours by cosine similarity, best first.
    async fn nearest_neighbors(&self, query: &NeighborQuery) -> Result<Vec<SearchHit>, StoreError>;

    async fn source_counts(&self) -> Result<BTreeMap<String, usize>, StoreError>;
}

#[async_trait]
pub trait KeywordIndex: Send + Sync {
    async fn search_keyword(&self, query: &LexicalQuery) -> Result<Vec<SearchHit>, StoreError>;
}

/// A backend that serves both vector and lexical retrieval.
pub trait DocumentStore: VectorIndex + KeywordIndex {}

impl<T: VectorIndex + KeywordIndex + ?Sized> DocumentStore for T {}
