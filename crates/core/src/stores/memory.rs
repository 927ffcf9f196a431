use crate::traits::{KeywordIndex, VectorIndex};
use crate::{
    EmbeddingRecord, LexicalQuery, NeighborQuery, Resource, SearchHit, SourceFilter, StoreError,
};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Snapshot {
    dimensions: Option<usize>,
    /// Set by [`InMemoryStore::with_dimensions`]; the width then survives
    /// the store being emptied.
    #[serde(default)]
    fixed_dimensions: bool,
    resources: Vec<Resource>,
    embeddings: Vec<EmbeddingRecord>,
}

/// Exact brute-force store kept in memory, optionally snapshotted to JSON.
///
/// The first indexed embedding fixes the store's dimensionality; later
/// records and queries of another width are rejected.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<Snapshot>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            state: RwLock::new(Snapshot {
                dimensions: Some(dimensions),
                fixed_dimensions: true,
                ..Snapshot::default()
            }),
        }
    }

    /// Loads a snapshot written by [`InMemoryStore::save`]; a missing file
    /// yields an empty store.
    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(Self::new());
        }

        let bytes = tokio::fs::read(path).await?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        debug!(
            path = %path.display(),
            embeddings = snapshot.embeddings.len(),
            "loaded store snapshot"
        );
        Ok(Self {
            state: RwLock::new(snapshot),
        })
    }

    pub async fn save(&self, path: &Path) -> Result<(), StoreError> {
        let bytes = {
            let state = self.state.read().await;
            serde_json::to_vec(&*state)?
        };
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    pub async fn dimensions(&self) -> Option<usize> {
        self.state.read().await.dimensions
    }

    pub async fn resources_for(&self, source: &str) -> Vec<Resource> {
        let state = self.state.read().await;
        let mut resources: Vec<Resource> = state
            .resources
            .iter()
            .filter(|resource| resource.source == source)
            .cloned()
            .collect();
        resources.sort_by_key(|resource| resource.chunk_index);
        resources
    }
}

#[async_trait]
impl VectorIndex for InMemoryStore {
    async fn index_records(
        &self,
        resources: &[Resource],
        embeddings: &[EmbeddingRecord],
    ) -> Result<(), StoreError> {
        if resources.len() != embeddings.len() {
            return Err(StoreError::Request(format!(
                "embedding count {} doesn't match resource count {}",
                embeddings.len(),
                resources.len()
            )));
        }

        let mut state = self.state.write().await;
        let mut expected = state.dimensions;
        for record in embeddings {
            match expected {
                Some(dimensions) if dimensions != record.embedding.len() => {
                    return Err(StoreError::DimensionMismatch {
                        expected: dimensions,
                        actual: record.embedding.len(),
                    });
                }
                Some(_) => {}
                None => expected = Some(record.embedding.len()),
            }
        }

        state.dimensions = expected;
        state.resources.extend_from_slice(resources);
        state.embeddings.extend_from_slice(embeddings);
        Ok(())
    }

    async fn delete_source(&self, source: &str) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let before = state.embeddings.len();
        state.embeddings.retain(|record| record.source != source);
        state.resources.retain(|resource| resource.source != source);
        if state.embeddings.is_empty() && !state.fixed_dimensions {
            state.dimensions = None;
        }
        Ok(before - state.embeddings.len())
    }

    async fn count_embeddings(&self, filter: Option<&SourceFilter>) -> Result<usize, StoreError> {
        let state = self.state.read().await;
        Ok(match filter {
            Some(filter) => state
                .embeddings
                .iter()
                .filter(|record| filter.admits(Some(&record.source)))
                .count(),
            None => state.embeddings.len(),
        })
    }

    async fn nearest_neighbors(&self, query: &NeighborQuery) -> Result<Vec<SearchHit>, StoreError> {
        let state = self.state.read().await;
        let Some(dimensions) = state.dimensions else {
            return Ok(Vec::new());
        };
        if query.vector.len() != dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: dimensions,
                actual: query.vector.len(),
            });
        }

        // Exact search: every record is a candidate, so `candidate_pool` only
        // matters to approximate backends.
        let mut scored: Vec<(f64, &EmbeddingRecord)> = state
            .embeddings
            .iter()
            .filter(|record| {
                query
                    .filter
                    .as_ref()
                    .map_or(true, |filter| filter.admits(Some(&record.source)))
            })
            .map(|record| (cosine_similarity(&query.vector, &record.embedding), record))
            .collect();

        scored.sort_by(|left, right| right.0.total_cmp(&left.0));
        scored.truncate(query.k);

        Ok(scored
            .into_iter()
            .map(|(similarity, record)| SearchHit {
                content: record.content.clone(),
                similarity,
                resource_id: record.resource_id.clone(),
                source: Some(record.source.clone()),
            })
            .collect())
    }

    async fn source_counts(&self) -> Result<BTreeMap<String, usize>, StoreError> {
        let state = self.state.read().await;
        let mut counts = BTreeMap::new();
        for record in &state.embeddings {
            *counts.entry(record.source.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[async_trait]
impl KeywordIndex for InMemoryStore {
    async fn search_keyword(&self, query: &LexicalQuery) -> Result<Vec<SearchHit>, StoreError> {
        if query.terms.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }

        let pattern = Regex::new(&query.pattern())?;
        let state = self.state.read().await;

        Ok(state
            .resources
            .iter()
            .filter(|resource| {
                query
                    .filter
                    .as_ref()
                    .map_or(true, |filter| filter.admits(Some(&resource.source)))
            })
            .filter(|resource| pattern.is_match(&resource.content))
            .take(query.limit)
            .map(|resource| SearchHit {
                content: resource.content.clone(),
                similarity: 0.0,
                resource_id: resource.id.clone(),
                source: Some(resource.source.clone()),
            })
            .collect())
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() {
        return 0.0;
    }

    let dot: f64 = left
        .iter()
        .zip(right)
        .map(|(a, b)| f64::from(*a) * f64::from(*b))
        .sum();
    let norm_left = left.iter().map(|a| f64::from(*a).powi(2)).sum::<f64>().sqrt();
    let norm_right = right.iter().map(|b| f64::from(*b).powi(2)).sum::<f64>().sqrt();

    if norm_left == 0.0 || norm_right == 0.0 {
        0.0
    } else {
        dot / (norm_left * norm_right)
    }
}
