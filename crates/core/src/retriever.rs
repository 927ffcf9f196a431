use crate::chunking::detect_problem_label;
use crate::embeddings::Embedder;
use crate::traits::DocumentStore;
use crate::{LexicalQuery, NeighborQuery, SearchError, SearchHit, SourceFilter, StoreError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Score adjustments applied when the query names a problem label.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BoostWeights {
    /// Label sits in the leading part of the chunk.
    pub early_label: f64,
    /// Label sits near the end, so the statement probably continues.
    pub late_label: f64,
    pub continuation_after_late: f64,
    pub continuation_likely: f64,
    /// Relative position separating "early" from "near the end".
    pub early_fraction: f64,
    /// How many leading characters of a follower are checked for the next label.
    pub next_label_window: usize,
}

impl Default for BoostWeights {
    fn default() -> Self {
        Self {
            early_label: 0.35,
            late_label: 0.25,
            continuation_after_late: 0.25,
            continuation_likely: 0.2,
            early_fraction: 0.7,
            next_label_window: 150,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub fetch_multiplier: usize,
    pub fetch_floor: usize,
    pub label_fetch_multiplier: usize,
    pub label_fetch_floor: usize,
    pub candidate_pool: usize,
    pub lexical_similarity: f64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub deadline: Duration,
    pub boost: BoostWeights,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            fetch_multiplier: 3,
            fetch_floor: 24,
            label_fetch_multiplier: 5,
            label_fetch_floor: 40,
            candidate_pool: 200,
            lexical_similarity: 0.6,
            deadline: Duration::from_secs(30),
            boost: BoostWeights::default(),
        }
    }
}

impl RetrievalConfig {
    /// Neighbours to request; a labelled query casts a wider net.
    pub fn fetch_size(&self, limit: usize, labelled: bool) -> usize {
        if labelled {
            limit
                .saturating_mul(self.label_fetch_multiplier)
                .max(self.label_fetch_floor)
        } else {
            limit
                .saturating_mul(self.fetch_multiplier)
                .max(self.fetch_floor)
        }
    }
}

pub struct Retriever<S: ?Sized, E: ?Sized> {
    store: Arc<S>,
    embedder: Arc<E>,
    config: RetrievalConfig,
}

impl<S, E> Retriever<S, E>
where
    S: DocumentStore + ?Sized,
    E: Embedder + ?Sized,
{
    pub fn new(store: Arc<S>, embedder: Arc<E>) -> Self {
        Self {
            store,
            embedder,
            config: RetrievalConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Ranked grounding chunks for `query`, at most `limit` of them.
    ///
    /// With `sources` set, only hits from those sources are returned. Falls
    /// back to lexical matching when the store is empty or the vector search
    /// comes back empty; hits removed by the source filter do not trigger the
    /// fallback.
    pub async fn find_relevant_content(
        &self,
        query: &str,
        limit: usize,
        sources: Option<&SourceFilter>,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let deadline = self.config.deadline;
        tokio::time::timeout(deadline, self.search(query, limit, sources))
            .await
            .map_err(|_| SearchError::Timeout(deadline))?
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        sources: Option<&SourceFilter>,
    ) -> Result<Vec<SearchHit>, SearchError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        if self.store.count_embeddings(None).await? == 0 {
            debug!("store holds no embeddings, using lexical search");
            return self.lexical_fallback(query, limit, sources).await;
        }

        let vector = self.embedder.embed(query).await?;
        let label = detect_problem_label(query);
        let k = self.config.fetch_size(limit, label.is_some());

        let raw = self
            .store
            .nearest_neighbors(&NeighborQuery {
                vector,
                k,
                candidate_pool: self.config.candidate_pool,
                filter: sources.cloned(),
            })
            .await?;

        if raw.is_empty() {
            debug!("vector search returned nothing, using lexical search");
            return self.lexical_fallback(query, limit, sources).await;
        }

        let fetched = raw.len();
        let mut hits: Vec<SearchHit> = match sources {
            Some(filter) => raw
                .into_iter()
                .filter(|hit| filter.admits(hit.source.as_deref()))
                .collect(),
            None => raw,
        };

        let continuation = match &label {
            Some(label) if !hits.is_empty() => {
                apply_label_boost(&mut hits, label, &self.config.boost)?
            }
            _ => None,
        };

        let selected = select_top(hits, limit, continuation);
        debug!(
            label = label.as_deref().unwrap_or(""),
            k,
            fetched,
            returned = selected.len(),
            "retrieved content"
        );
        Ok(selected)
    }

    async fn lexical_fallback(
        &self,
        query: &str,
        limit: usize,
        sources: Option<&SourceFilter>,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let lexical = LexicalQuery::from_text(query, sources.cloned(), limit);
        let mut hits = self.store.search_keyword(&lexical).await?;
        hits.truncate(limit);
        for hit in &mut hits {
            hit.similarity = self.config.lexical_similarity;
        }
        Ok(hits)
    }
}

/// Where the label sits inside one hit.
#[derive(Debug, Clone, Copy)]
struct Placement {
    near_end: bool,
}

fn word_pattern(label: &str) -> Result<Regex, StoreError> {
    Ok(Regex::new(&format!(r"\b{}\b", regex::escape(label)))?)
}

fn placement(pattern: &Regex, content: &str, weights: &BoostWeights) -> Option<Placement> {
    let found = pattern.find(content)?;
    let total = content.chars().count().max(1);
    let offset = content[..found.start()].chars().count();
    let relative = offset as f64 / total as f64;
    Some(Placement {
        near_end: relative >= weights.early_fraction,
    })
}

/// `A1` -> `A2`; `None` when the label has no numeric tail.
pub fn next_sequential_label(label: &str) -> Option<String> {
    let mut chars = label.chars();
    let prefix = chars.next()?;
    let number: u64 = chars.as_str().parse().ok()?;
    Some(format!("{prefix}{}", number.checked_add(1)?))
}

fn starts_with_label(content: &str, next: Option<&Regex>, window: usize) -> bool {
    let Some(next) = next else {
        return false;
    };
    let head: String = content.chars().take(window).collect();
    next.is_match(&head)
}

/// Boosts label-bearing hits and their rank followers, then re-sorts. Returns
/// the resource id that must be kept in the final selection, if any.
fn apply_label_boost(
    hits: &mut [SearchHit],
    label: &str,
    weights: &BoostWeights,
) -> Result<Option<String>, StoreError> {
    let pattern = word_pattern(label)?;
    let next = next_sequential_label(label)
        .map(|next| word_pattern(&next))
        .transpose()?;

    let placements: Vec<Option<Placement>> = hits
        .iter()
        .map(|hit| placement(&pattern, &hit.content, weights))
        .collect();

    let mut deltas = vec![0.0_f64; hits.len()];
    for (index, found) in placements.iter().enumerate() {
        let Some(found) = found else { continue };
        deltas[index] += if found.near_end {
            weights.late_label
        } else {
            weights.early_label
        };

        if let Some(follower) = hits.get(index + 1) {
            if found.near_end {
                deltas[index + 1] += weights.continuation_after_late;
            } else if !starts_with_label(&follower.content, next.as_ref(), weights.next_label_window) {
                deltas[index + 1] += weights.continuation_likely;
            }
        }
    }

    // Follower of the best label hit, by pre-boost rank.
    let mut best: Option<(usize, f64)> = None;
    for (index, found) in placements.iter().enumerate() {
        if found.is_some() {
            let boosted = (hits[index].similarity + deltas[index]).min(1.0);
            if best.map_or(true, |(_, score)| boosted > score) {
                best = Some((index, boosted));
            }
        }
    }
    let continuation = best.and_then(|(index, _)| {
        let near_end = placements[index].is_some_and(|found| found.near_end);
        near_end
            .then(|| hits.get(index + 1).map(|hit| hit.resource_id.clone()))
            .flatten()
    });

    for (hit, delta) in hits.iter_mut().zip(&deltas) {
        if *delta > 0.0 {
            hit.similarity = (hit.similarity + delta).min(1.0);
        }
    }
    hits.sort_by(|left, right| right.similarity.total_cmp(&left.similarity));

    Ok(continuation)
}

fn select_top(hits: Vec<SearchHit>, limit: usize, continuation: Option<String>) -> Vec<SearchHit> {
    let mut remaining = hits.into_iter();
    let mut selected: Vec<SearchHit> = remaining.by_ref().take(limit).collect();

    let Some(continuation) = continuation else {
        return selected;
    };
    if limit < 2 || selected.iter().any(|hit| hit.resource_id == continuation) {
        return selected;
    }
    if let Some(follower) = remaining.find(|hit| hit.resource_id == continuation) {
        selected.pop();
        selected.push(follower);
    }
    selected
}

/// Formats hits as the grounding text handed to the chat layer.
pub fn render_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| {
            format!(
                "[{}]\n{}",
                hit.source.as_deref().unwrap_or("unknown"),
                hit.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
