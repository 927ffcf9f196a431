use crate::traits::{KeywordIndex, VectorIndex};
use crate::{
    EmbeddingRecord, LexicalQuery, NeighborQuery, Resource, SearchHit, SourceFilter, StoreError,
};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

const BACKEND: &str = "qdrant";
const FACET_LIMIT: usize = 1_000;

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, StoreError> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint)?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        })
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.endpoint, self.collection, suffix)
    }

    /// Creates the collection (cosine distance) and its payload indexes when
    /// it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let existing = self.client.get(self.collection_url("")).send().await?;
        if existing.status().is_success() {
            let info: Value = existing.json().await?;
            let size = info
                .pointer("/result/config/params/vectors/size")
                .and_then(Value::as_u64);
            return match size {
                Some(size) if size as usize != self.vector_size => {
                    Err(StoreError::DimensionMismatch {
                        expected: size as usize,
                        actual: self.vector_size,
                    })
                }
                _ => Ok(()),
            };
        }
        if existing.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(existing).await);
        }

        let created = self
            .client
            .put(self.collection_url(""))
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" },
            }))
            .send()
            .await?;
        check_status(created).await?;

        for (field, schema) in [("source", json!("keyword")), ("content", json!("text"))] {
            let response = self
                .client
                .put(self.collection_url("/index?wait=true"))
                .json(&json!({ "field_name": field, "field_schema": schema }))
                .send()
                .await?;
            check_status(response).await?;
        }

        info!(
            collection = %self.collection,
            vector_size = self.vector_size,
            "created qdrant collection"
        );
        Ok(())
    }

    async fn post(&self, suffix: &str, body: Value) -> Result<Value, StoreError> {
        let response = self
            .client
            .post(self.collection_url(suffix))
            .json(&body)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }
}

fn source_condition(filter: &SourceFilter) -> Value {
    json!({
        "key": "source",
        "match": { "any": filter.iter().collect::<Vec<_>>() },
    })
}

fn filter_body(filter: Option<&SourceFilter>) -> Value {
    match filter {
        Some(filter) => json!({ "must": [source_condition(filter)] }),
        None => Value::Null,
    }
}

async fn backend_error(response: Response) -> StoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    StoreError::BackendResponse {
        backend: BACKEND.to_string(),
        details: format!("{status}: {body}"),
    }
}

async fn check_status(response: Response) -> Result<Response, StoreError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(backend_error(response).await)
    }
}

fn hit_from_point(point: &Value, similarity: f64) -> SearchHit {
    let text = |pointer: &str| {
        point
            .pointer(pointer)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    SearchHit {
        content: text("/payload/content").unwrap_or_default(),
        similarity,
        resource_id: text("/payload/resource_id").unwrap_or_default(),
        source: text("/payload/source"),
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
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

        let points = embeddings
            .iter()
            .map(|record| {
                if record.embedding.len() != self.vector_size {
                    return Err(StoreError::DimensionMismatch {
                        expected: self.vector_size,
                        actual: record.embedding.len(),
                    });
                }

                Ok(json!({
                    "id": record.id,
                    "vector": record.embedding,
                    "payload": {
                        "resource_id": record.resource_id,
                        "content": record.content,
                        "source": record.source,
                        "chunk_index": record.chunk_index,
                        "metadata": serde_json::to_value(&record.metadata)?,
                        "created_at": record.created_at.to_rfc3339(),
                    },
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(self.collection_url("/points?wait=true"))
            .json(&json!({ "points": points }))
            .send()
            .await?;
        check_status(response).await?;

        debug!(collection = %self.collection, points = embeddings.len(), "upserted points");
        Ok(())
    }

    async fn delete_source(&self, source: &str) -> Result<usize, StoreError> {
        let filter = SourceFilter::single(source);
        let existing = self.count_embeddings(Some(&filter)).await?;
        if existing == 0 {
            return Ok(0);
        }

        self.post(
            "/points/delete?wait=true",
            json!({ "filter": filter_body(Some(&filter)) }),
        )
        .await?;
        Ok(existing)
    }

    async fn count_embeddings(&self, filter: Option<&SourceFilter>) -> Result<usize, StoreError> {
        let mut body = json!({ "exact": true });
        if filter.is_some() {
            body["filter"] = filter_body(filter);
        }

        let parsed = self.post("/points/count", body).await?;
        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| StoreError::BackendResponse {
                backend: BACKEND.to_string(),
                details: "count response missing result.count".to_string(),
            })
    }

    async fn nearest_neighbors(&self, query: &NeighborQuery) -> Result<Vec<SearchHit>, StoreError> {
        if query.vector.len() != self.vector_size {
            return Err(StoreError::DimensionMismatch {
                expected: self.vector_size,
                actual: query.vector.len(),
            });
        }

        let mut body = json!({
            "vector": query.vector,
            "limit": query.k,
            "with_payload": true,
            "params": { "hnsw_ef": query.candidate_pool.max(query.k) },
        });
        if query.filter.is_some() {
            body["filter"] = filter_body(query.filter.as_ref());
        }

        let parsed = self.post("/points/search", body).await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(hits
            .iter()
            .map(|hit| {
                let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
                hit_from_point(hit, score)
            })
            .collect())
    }

    async fn source_counts(&self) -> Result<BTreeMap<String, usize>, StoreError> {
        let parsed = self
            .post(
                "/facet",
                json!({ "key": "source", "limit": FACET_LIMIT, "exact": true }),
            )
            .await?;

        let mut counts = BTreeMap::new();
        let hits = parsed
            .pointer("/result/hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for hit in hits {
            let value = hit.pointer("/value").and_then(Value::as_str);
            let count = hit.pointer("/count").and_then(Value::as_u64);
            if let (Some(value), Some(count)) = (value, count) {
                counts.insert(value.to_string(), count as usize);
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl KeywordIndex for QdrantStore {
    async fn search_keyword(&self, query: &LexicalQuery) -> Result<Vec<SearchHit>, StoreError> {
        if query.terms.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }

        let should: Vec<Value> = query
            .terms
            .iter()
            .map(|term| json!({ "key": "content", "match": { "text": term } }))
            .collect();
        let mut filter = json!({ "should": should });
        if let Some(sources) = &query.filter {
            filter["must"] = json!([source_condition(sources)]);
        }

        let parsed = self
            .post(
                "/points/scroll",
                json!({
                    "filter": filter,
                    "limit": query.limit,
                    "with_payload": true,
                    "with_vector": false,
                }),
            )
            .await?;

        let points = parsed
            .pointer("/result/points")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(points.iter().map(|point| hit_from_point(point, 0.0)).collect())
    }
}
