use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkType {
    Problem,
    Paragraph,
    Sentence,
    Part,
    FixedSize,
    ProblemFragment,
    Content,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Problem => "problem",
            ChunkType::Paragraph => "paragraph",
            ChunkType::Sentence => "sentence",
            ChunkType::Part => "part",
            ChunkType::FixedSize => "fixed-size",
            ChunkType::ProblemFragment => "problem-fragment",
            ChunkType::Content => "content",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MemoryRole {
    User,
    Assistant,
}

impl MemoryRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryRole::User => "user",
            MemoryRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub chunk_type: ChunkType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_label: Option<String>,
    /// Only set on conversation-memory records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MemoryRole>,
}

impl ChunkMetadata {
    pub fn new(chunk_type: ChunkType) -> Self {
        Self {
            chunk_type,
            problem_label: None,
            role: None,
        }
    }

    pub fn labelled(chunk_type: ChunkType, label: impl Into<String>) -> Self {
        Self {
            chunk_type,
            problem_label: Some(label.into()),
            role: None,
        }
    }
}

/// A chunk produced by the chunker, before it is embedded and persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub content: String,
    pub source: String,
    pub chunk_index: u64,
    pub metadata: ChunkMetadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingRecord {
    pub id: String,
    pub resource_id: String,
    pub content: String,
    pub source: String,
    pub chunk_index: u64,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub content: String,
    pub similarity: f64,
    pub resource_id: String,
    pub source: Option<String>,
}

/// The set of sources a search is scoped to.
///
/// An empty filter admits nothing; pass `None` where a filter is optional to
/// search every source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFilter {
    sources: BTreeSet<String>,
}

impl SourceFilter {
    pub fn new<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
        }
    }

    pub fn single(source: impl Into<String>) -> Self {
        Self::new([source.into()])
    }

    pub fn admits(&self, source: Option<&str>) -> bool {
        source.is_some_and(|value| self.sources.contains(value))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for SourceFilter {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::new(iter)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NeighborQuery {
    pub vector: Vec<f32>,
    pub k: usize,
    pub candidate_pool: usize,
    pub filter: Option<SourceFilter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexicalQuery {
    pub terms: Vec<String>,
    pub filter: Option<SourceFilter>,
    pub limit: usize,
}

impl LexicalQuery {
    pub fn from_text(text: &str, filter: Option<SourceFilter>, limit: usize) -> Self {
        let terms = text
            .split_whitespace()
            .filter(|token| token.chars().count() > 2)
            .map(str::to_string)
            .collect();

        Self {
            terms,
            filter,
            limit,
        }
    }

    /// Case-insensitive alternation over the escaped query terms.
    pub fn pattern(&self) -> String {
        let alternation = self
            .terms
            .iter()
            .map(|term| regex::escape(term))
            .collect::<Vec<_>>()
            .join("|");
        format!("(?i)(?:{alternation})")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReport {
    pub source: String,
    pub checksum: String,
    pub chunk_count: usize,
    pub dropped_chunks: usize,
    pub replaced_records: usize,
    pub ingested_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_type_serializes_kebab_case() {
        let json = serde_json::to_string(&ChunkType::ProblemFragment).expect("serialize");
        assert_eq!(json, "\"problem-fragment\"");
        assert_eq!(ChunkType::FixedSize.as_str(), "fixed-size");
    }

    #[test]
    fn metadata_omits_missing_label() {
        let json = serde_json::to_value(ChunkMetadata::new(ChunkType::Paragraph)).expect("serialize");
        assert_eq!(json, serde_json::json!({ "chunkType": "paragraph" }));

        let labelled = serde_json::to_value(ChunkMetadata::labelled(ChunkType::Problem, "A1"))
            .expect("serialize");
        assert_eq!(
            labelled,
            serde_json::json!({ "chunkType": "problem", "problemLabel": "A1" })
        );
    }

    #[test]
    fn source_filter_rejects_missing_source() {
        let filter = SourceFilter::single("3_Radicals_Notes");
        assert!(filter.admits(Some("3_Radicals_Notes")));
        assert!(!filter.admits(Some("2_Exponents_Notes")));
        assert!(!filter.admits(None));
    }

    #[test]
    fn lexical_terms_skip_short_tokens() {
        let query = LexicalQuery::from_text("is a radical (x+1)?", None, 5);
        assert_eq!(query.terms, vec!["radical".to_string(), "(x+1)?".to_string()]);
        assert_eq!(query.pattern(), r"(?i)(?:radical|\(x\+1\)\?)");
    }
}
