//! In-memory implementations of the C2/C3/C4 adapter traits.
//!
//! These exist purely so unit and integration tests can exercise the
//! executor, fuser, and hybrid engine without a SQLite file or a real
//! cache backend (§9 design note: trait/interface boundaries so
//! in-memory fakes can be substituted for tests).

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use crate::embedding::cosine_similarity;
use crate::error::{EngineError, EngineResult};
use crate::models::{
    CacheMetrics, Chunk, ConceptNode, DocumentNode, Edge, EdgeLabel, GraphNodeHit,
    GraphSearchMode, GraphSearchResult, GraphStoreStats, VectorStoreStats,
};
use crate::traits::{CacheProvider, GraphStoreAdapter, VectorStoreAdapter};

/// In-memory [`VectorStoreAdapter`] backed by a plain map.
#[derive(Default)]
pub struct InMemoryVectorStore {
    chunks: RwLock<HashMap<String, Chunk>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStoreAdapter for InMemoryVectorStore {
    async fn upsert_chunks(&self, chunks: &[Chunk]) -> EngineResult<()> {
        let mut guard = self.chunks.write().unwrap();
        for chunk in chunks {
            guard.insert(chunk.id.clone(), chunk.clone());
        }
        Ok(())
    }

    async fn semantic_search(
        &self,
        query_vector: &[f32],
        limit: usize,
        source_filter: Option<&str>,
        quality_threshold: f32,
    ) -> EngineResult<Vec<(Chunk, f32)>> {
        let guard = self.chunks.read().unwrap();
        let mut hits: Vec<(Chunk, f32)> = guard
            .values()
            .filter(|c| source_filter.map(|s| c.source == s).unwrap_or(true))
            .map(|c| (c.clone(), cosine_similarity(query_vector, &c.vector)))
            .filter(|(_, score)| *score >= quality_threshold)
            .collect();

        hits.sort_by(|(ca, sa), (cb, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| cb.quality_score.partial_cmp(&ca.quality_score).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| ca.id.cmp(&cb.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn get_chunks(
        &self,
        source: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> EngineResult<Vec<Chunk>> {
        let guard = self.chunks.read().unwrap();
        let mut all: Vec<Chunk> = guard
            .values()
            .filter(|c| source.map(|s| c.source == s).unwrap_or(true))
            .cloned()
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }

    async fn stats(&self) -> EngineResult<VectorStoreStats> {
        let guard = self.chunks.read().unwrap();
        let total = guard.len() as u64;
        let mut by_source: std::collections::BTreeMap<String, u64> = Default::default();
        let mut quality_sum = 0.0f32;
        let mut range: Option<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)> = None;
        for c in guard.values() {
            *by_source.entry(c.source.clone()).or_default() += 1;
            quality_sum += c.quality_score;
            range = Some(match range {
                None => (c.created_at, c.created_at),
                Some((lo, hi)) => (lo.min(c.created_at), hi.max(c.created_at)),
            });
        }
        Ok(VectorStoreStats {
            total,
            by_source,
            avg_quality: if total == 0 { 0.0 } else { quality_sum / total as f32 },
            date_range: range,
        })
    }
}

/// In-memory [`GraphStoreAdapter`] backed by plain maps and a BFS path search.
#[derive(Default)]
pub struct InMemoryGraphStore {
    documents: RwLock<HashMap<String, DocumentNode>>,
    concepts: RwLock<HashMap<String, ConceptNode>>,
    edges: RwLock<Vec<Edge>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(haystacks: &[String], needle: &str) -> bool {
        let needle = needle.to_lowercase();
        haystacks.iter().any(|h| h.to_lowercase().contains(&needle))
    }
}

#[async_trait]
impl GraphStoreAdapter for InMemoryGraphStore {
    async fn upsert_document(&self, document: &DocumentNode) -> EngineResult<()> {
        self.documents
            .write()
            .unwrap()
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn upsert_concept(&self, concept: &ConceptNode) -> EngineResult<()> {
        self.concepts
            .write()
            .unwrap()
            .insert(concept.name.clone(), concept.clone());
        Ok(())
    }

    async fn upsert_edge(&self, edge: &Edge) -> EngineResult<()> {
        let mut guard = self.edges.write().unwrap();
        if let Some(existing) = guard
            .iter_mut()
            .find(|e| e.from_id == edge.from_id && e.label == edge.label && e.to_id == edge.to_id)
        {
            existing.strength = edge.strength;
            existing.properties = edge.properties.clone();
        } else {
            guard.push(edge.clone());
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        mode: GraphSearchMode,
        max_depth: usize,
        limit: usize,
    ) -> EngineResult<GraphSearchResult> {
        let documents = self.documents.read().unwrap();
        let concepts = self.concepts.read().unwrap();
        let edges = self.edges.read().unwrap();

        let mut nodes: Vec<GraphNodeHit> = Vec::new();

        if matches!(mode, GraphSearchMode::Document | GraphSearchMode::Path) {
            let mut ids: Vec<&String> = documents.keys().collect();
            ids.sort();
            for id in ids {
                let doc = &documents[id];
                let haystacks: Vec<String> = std::iter::once(doc.title.clone().unwrap_or_default())
                    .chain(std::iter::once(doc.source.clone()))
                    .chain(doc.topic_tags.iter().cloned())
                    .collect();
                if query.is_empty() || Self::matches(&haystacks, query) {
                    nodes.push(GraphNodeHit {
                        id: doc.id.clone(),
                        label: "Document".to_string(),
                        name: doc.title.clone().unwrap_or_else(|| doc.id.clone()),
                        snippet: None,
                        topic_tags: doc.topic_tags.clone(),
                        score: 1.0,
                    });
                }
            }
        }

        if matches!(mode, GraphSearchMode::Concept | GraphSearchMode::Path) {
            let mut names: Vec<&String> = concepts.keys().collect();
            names.sort();
            for name in names {
                let concept = &concepts[name];
                let haystacks: Vec<String> = std::iter::once(concept.name.clone())
                    .chain(concept.related_tags.iter().cloned())
                    .collect();
                if query.is_empty() || Self::matches(&haystacks, query) {
                    nodes.push(GraphNodeHit {
                        id: concept.name.clone(),
                        label: "Concept".to_string(),
                        name: concept.name.clone(),
                        snippet: Some(concept.description.clone()),
                        topic_tags: concept.related_tags.clone(),
                        score: concept.confidence,
                    });
                }
            }
        }

        if nodes.len() > limit {
            nodes.truncate(limit);
        }

        let mut paths = Vec::new();
        if mode == GraphSearchMode::Path && nodes.len() >= 2 {
            if let Some(path) = shortest_path(&edges, &nodes[0].id, &nodes[1].id, max_depth) {
                paths.push(path);
            }
        }

        Ok(GraphSearchResult {
            nodes,
            edges: edges.clone(),
            paths,
        })
    }

    async fn stats(&self) -> EngineResult<GraphStoreStats> {
        let documents = self.documents.read().unwrap();
        let concepts = self.concepts.read().unwrap();
        let edges = self.edges.read().unwrap();

        let avg_quality = if documents.is_empty() {
            0.0
        } else {
            documents.values().map(|d| d.quality_score).sum::<f32>() / documents.len() as f32
        };
        let avg_strength = if edges.is_empty() {
            0.0
        } else {
            edges.iter().map(|e| e.strength).sum::<f32>() / edges.len() as f32
        };

        Ok(GraphStoreStats {
            document_count: documents.len() as u64,
            concept_count: concepts.len() as u64,
            edge_count: edges.len() as u64,
            avg_quality,
            avg_strength,
        })
    }
}

/// Breadth-first shortest path search over undirected edges, bounded by `max_depth`.
fn shortest_path(edges: &[Edge], from: &str, to: &str, max_depth: usize) -> Option<Vec<String>> {
    use std::collections::{HashSet, VecDeque};

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for e in edges {
        adjacency.entry(&e.from_id).or_default().push(&e.to_id);
        adjacency.entry(&e.to_id).or_default().push(&e.from_id);
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<Vec<&str>> = VecDeque::new();
    queue.push_back(vec![from]);
    visited.insert(from);

    while let Some(path) = queue.pop_front() {
        let last = *path.last().unwrap();
        if last == to {
            return Some(path.into_iter().map(str::to_string).collect());
        }
        if path.len() > max_depth {
            continue;
        }
        if let Some(neighbors) = adjacency.get(last) {
            let mut sorted_neighbors = neighbors.clone();
            sorted_neighbors.sort();
            for n in sorted_neighbors {
                if visited.insert(n) {
                    let mut next = path.clone();
                    next.push(n);
                    queue.push_back(next);
                }
            }
        }
    }
    None
}

/// In-memory [`CacheProvider`]; a single local tier, no remote, no
/// circuit breaker (there's nothing remote to trip one over).
pub struct InMemoryCache {
    store: RwLock<HashMap<(String, String), (Vec<u8>, Instant, Option<Duration>)>>,
    metrics: Mutex<CacheMetrics>,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
            metrics: Mutex::new(CacheMetrics::default()),
        }
    }
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_expired(entry: &(Vec<u8>, Instant, Option<Duration>)) -> bool {
        match entry.2 {
            Some(ttl) => entry.1.elapsed() >= ttl,
            None => false,
        }
    }
}

#[async_trait]
impl CacheProvider for InMemoryCache {
    async fn get(&self, key: &str, namespace: &str) -> EngineResult<(Option<Vec<u8>>, bool)> {
        let guard = self.store.read().unwrap();
        let k = (namespace.to_string(), key.to_string());
        let mut metrics = self.metrics.lock().unwrap();
        match guard.get(&k) {
            Some(entry) if !Self::is_expired(entry) => {
                metrics.hits += 1;
                Ok((Some(entry.0.clone()), true))
            }
            _ => {
                metrics.misses += 1;
                Ok((None, false))
            }
        }
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        namespace: &str,
        ttl_seconds: Option<u64>,
    ) -> EngineResult<()> {
        if value.len() > 16 * 1024 * 1024 {
            return Err(EngineError::OversizedValue {
                size: value.len(),
                limit: 16 * 1024 * 1024,
            });
        }
        let mut guard = self.store.write().unwrap();
        guard.insert(
            (namespace.to_string(), key.to_string()),
            (
                value.to_vec(),
                Instant::now(),
                ttl_seconds.map(Duration::from_secs),
            ),
        );
        Ok(())
    }

    async fn delete(&self, key: &str, namespace: &str) -> EngineResult<()> {
        self.store
            .write()
            .unwrap()
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }

    async fn exists(&self, key: &str, namespace: &str) -> EngineResult<bool> {
        let guard = self.store.read().unwrap();
        Ok(guard
            .get(&(namespace.to_string(), key.to_string()))
            .is_some_and(|e| !Self::is_expired(e)))
    }

    async fn clear_namespace(&self, namespace: &str) -> EngineResult<u64> {
        let mut guard = self.store.write().unwrap();
        let before = guard.len();
        guard.retain(|(ns, _), _| ns != namespace);
        Ok((before - guard.len()) as u64)
    }

    fn metrics(&self) -> CacheMetrics {
        self.metrics.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConceptCategory;
    use std::collections::BTreeSet;

    fn chunk(id: &str, source: &str, vector: Vec<f32>) -> Chunk {
        let now = Utc::now();
        Chunk {
            id: id.to_string(),
            document_id: format!("doc-{id}"),
            source: source.to_string(),
            source_url: None,
            title: None,
            text: "text".into(),
            chunk_index: 0,
            total_chunks: 1,
            quality_score: 0.5,
            topic_tags: BTreeSet::new(),
            vector,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn vector_store_filters_by_threshold_and_source() {
        let store = InMemoryVectorStore::new();
        store
            .upsert_chunks(&[
                chunk("a", "web", vec![1.0, 0.0]),
                chunk("b", "git", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let hits = store
            .semantic_search(&[1.0, 0.0], 10, Some("web"), 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, "a");
    }

    #[tokio::test]
    async fn cache_oversized_value_is_refused() {
        let cache = InMemoryCache::new();
        let big = vec![0u8; 17 * 1024 * 1024];
        let err = cache.set("k", &big, "ns", None).await.unwrap_err();
        assert!(matches!(err, EngineError::OversizedValue { .. }));
    }

    #[tokio::test]
    async fn cache_clear_namespace_removes_only_that_namespace() {
        let cache = InMemoryCache::new();
        cache.set("a", b"1", "ns1", None).await.unwrap();
        cache.set("b", b"2", "ns2", None).await.unwrap();
        let removed = cache.clear_namespace("ns1").await.unwrap();
        assert_eq!(removed, 1);
        assert!(!cache.exists("a", "ns1").await.unwrap());
        assert!(cache.exists("b", "ns2").await.unwrap());
    }

    #[tokio::test]
    async fn graph_store_path_search_finds_connected_nodes() {
        let store = InMemoryGraphStore::new();
        let now = Utc::now();
        let doc = |id: &str| DocumentNode {
            id: id.to_string(),
            source: "web".into(),
            url: None,
            title: Some(id.to_string()),
            content_hash: "h".into(),
            chunk_count: 1,
            quality_score: 0.9,
            topic_tags: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        };
        store.upsert_document(&doc("alpha")).await.unwrap();
        store.upsert_document(&doc("beta")).await.unwrap();
        store
            .upsert_edge(&Edge {
                from_id: "alpha".into(),
                label: EdgeLabel::RelatedTo,
                to_id: "beta".into(),
                strength: 0.5,
                properties: serde_json::json!({}),
            })
            .await
            .unwrap();

        let result = store.search("", GraphSearchMode::Path, 3, 10).await.unwrap();
        assert_eq!(result.paths.len(), 1);
        assert_eq!(result.paths[0], vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[tokio::test]
    async fn concept_upsert_is_idempotent_on_name() {
        let store = InMemoryGraphStore::new();
        let concept = ConceptNode {
            name: "auth".into(),
            category: ConceptCategory::Topic,
            description: "d".into(),
            frequency: 1,
            confidence: 0.5,
            related_tags: BTreeSet::new(),
        };
        store.upsert_concept(&concept).await.unwrap();
        store.upsert_concept(&concept).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.concept_count, 1);
    }
}
