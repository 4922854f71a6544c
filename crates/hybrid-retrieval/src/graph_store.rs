//! SQLite-backed [`GraphStoreAdapter`] (C3).
//!
//! Substring matching over stored names/titles/tags stands in for a
//! proper full-text index (no FTS5 virtual table is set up here, kept
//! to the plain tables migrate.rs creates); `path` mode loads the full
//! edge set and runs the same breadth-first search as the in-memory
//! fake so both backends agree on which path is "shortest".

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use hybrid_retrieval_core::error::{EngineError, EngineResult};
use hybrid_retrieval_core::models::{
    ConceptCategory, ConceptNode, DocumentNode, Edge, EdgeLabel, GraphNodeHit, GraphSearchMode,
    GraphSearchResult, GraphStoreStats,
};
use hybrid_retrieval_core::traits::GraphStoreAdapter;
use sqlx::{Row, SqlitePool};

pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_edge_label(raw: &str) -> EngineResult<EdgeLabel> {
        match raw {
            "RELATED_TO" => Ok(EdgeLabel::RelatedTo),
            "PART_OF_SAME_SOURCE" => Ok(EdgeLabel::PartOfSameSource),
            "CONTAINS_CONCEPT" => Ok(EdgeLabel::ContainsConcept),
            other => Err(EngineError::SchemaMismatch {
                message: format!("unknown edge label in storage: {other}"),
            }),
        }
    }

    fn row_to_edge(row: &sqlx::sqlite::SqliteRow) -> EngineResult<Edge> {
        let label_raw: String = row.get("label");
        let properties_raw: String = row.get("properties");
        Ok(Edge {
            from_id: row.get("from_id"),
            label: Self::parse_edge_label(&label_raw)?,
            to_id: row.get("to_id"),
            strength: row.get("strength"),
            properties: serde_json::from_str(&properties_raw).unwrap_or(serde_json::json!({})),
        })
    }

    fn matches(haystacks: &[String], needle: &str) -> bool {
        let needle = needle.to_lowercase();
        haystacks.iter().any(|h| h.to_lowercase().contains(&needle))
    }
}

#[async_trait::async_trait]
impl GraphStoreAdapter for SqliteGraphStore {
    async fn upsert_document(&self, document: &DocumentNode) -> EngineResult<()> {
        let tags_json = serde_json::to_string(&document.topic_tags)?;
        sqlx::query(
            r#"
            INSERT INTO documents
                (id, source, url, title, content_hash, chunk_count, quality_score,
                 topic_tags, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source = excluded.source,
                url = excluded.url,
                title = excluded.title,
                content_hash = excluded.content_hash,
                chunk_count = excluded.chunk_count,
                quality_score = excluded.quality_score,
                topic_tags = excluded.topic_tags,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&document.id)
        .bind(&document.source)
        .bind(&document.url)
        .bind(&document.title)
        .bind(&document.content_hash)
        .bind(document.chunk_count as i64)
        .bind(document.quality_score)
        .bind(tags_json)
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::backend("sqlite", e.to_string()))?;
        Ok(())
    }

    async fn upsert_concept(&self, concept: &ConceptNode) -> EngineResult<()> {
        let tags_json = serde_json::to_string(&concept.related_tags)?;
        sqlx::query(
            r#"
            INSERT INTO concepts (name, category, description, frequency, confidence, related_tags)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                category = excluded.category,
                description = excluded.description,
                frequency = excluded.frequency,
                confidence = excluded.confidence,
                related_tags = excluded.related_tags
            "#,
        )
        .bind(&concept.name)
        .bind(category_str(concept.category))
        .bind(&concept.description)
        .bind(concept.frequency as i64)
        .bind(concept.confidence)
        .bind(tags_json)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::backend("sqlite", e.to_string()))?;
        Ok(())
    }

    async fn upsert_edge(&self, edge: &Edge) -> EngineResult<()> {
        let properties_json = serde_json::to_string(&edge.properties)?;
        sqlx::query(
            r#"
            INSERT INTO edges (from_id, label, to_id, strength, properties)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(from_id, label, to_id) DO UPDATE SET
                strength = excluded.strength,
                properties = excluded.properties
            "#,
        )
        .bind(&edge.from_id)
        .bind(edge.label.as_str())
        .bind(&edge.to_id)
        .bind(edge.strength)
        .bind(properties_json)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::backend("sqlite", e.to_string()))?;
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        mode: GraphSearchMode,
        max_depth: usize,
        limit: usize,
    ) -> EngineResult<GraphSearchResult> {
        let mut nodes: Vec<GraphNodeHit> = Vec::new();

        if matches!(mode, GraphSearchMode::Document | GraphSearchMode::Path) {
            let rows = sqlx::query("SELECT * FROM documents ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| EngineError::backend("sqlite", e.to_string()))?;
            for row in &rows {
                let id: String = row.get("id");
                let title: Option<String> = row.get("title");
                let source: String = row.get("source");
                let tags_json: String = row.get("topic_tags");
                let topic_tags: BTreeSet<String> =
                    serde_json::from_str(&tags_json).unwrap_or_default();
                let haystacks: Vec<String> = std::iter::once(title.clone().unwrap_or_default())
                    .chain(std::iter::once(source))
                    .chain(topic_tags.iter().cloned())
                    .collect();
                if query.is_empty() || Self::matches(&haystacks, query) {
                    nodes.push(GraphNodeHit {
                        id: id.clone(),
                        label: "Document".to_string(),
                        name: title.unwrap_or(id),
                        snippet: None,
                        topic_tags,
                        score: 1.0,
                    });
                }
            }
        }

        if matches!(mode, GraphSearchMode::Concept | GraphSearchMode::Path) {
            let rows = sqlx::query("SELECT * FROM concepts ORDER BY name")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| EngineError::backend("sqlite", e.to_string()))?;
            for row in &rows {
                let name: String = row.get("name");
                let description: String = row.get("description");
                let confidence: f32 = row.get("confidence");
                let tags_json: String = row.get("related_tags");
                let related_tags: BTreeSet<String> =
                    serde_json::from_str(&tags_json).unwrap_or_default();
                let haystacks: Vec<String> = std::iter::once(name.clone())
                    .chain(related_tags.iter().cloned())
                    .collect();
                if query.is_empty() || Self::matches(&haystacks, query) {
                    nodes.push(GraphNodeHit {
                        id: name.clone(),
                        label: "Concept".to_string(),
                        name,
                        snippet: Some(description),
                        topic_tags: related_tags,
                        score: confidence,
                    });
                }
            }
        }

        if nodes.len() > limit {
            nodes.truncate(limit);
        }

        let edge_rows = sqlx::query("SELECT * FROM edges")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::backend("sqlite", e.to_string()))?;
        let edges: Vec<Edge> = edge_rows
            .iter()
            .map(Self::row_to_edge)
            .collect::<EngineResult<Vec<_>>>()?;

        let mut paths = Vec::new();
        if mode == GraphSearchMode::Path && nodes.len() >= 2 {
            if let Some(path) = shortest_path(&edges, &nodes[0].id, &nodes[1].id, max_depth) {
                paths.push(path);
            }
        }

        Ok(GraphSearchResult { nodes, edges, paths })
    }

    async fn stats(&self) -> EngineResult<GraphStoreStats> {
        let document_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EngineError::backend("sqlite", e.to_string()))?;
        let concept_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM concepts")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EngineError::backend("sqlite", e.to_string()))?;
        let edge_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM edges")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EngineError::backend("sqlite", e.to_string()))?;
        let avg_quality: Option<f64> = sqlx::query_scalar("SELECT AVG(quality_score) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EngineError::backend("sqlite", e.to_string()))?;
        let avg_strength: Option<f64> = sqlx::query_scalar("SELECT AVG(strength) FROM edges")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EngineError::backend("sqlite", e.to_string()))?;

        Ok(GraphStoreStats {
            document_count: document_count as u64,
            concept_count: concept_count as u64,
            edge_count: edge_count as u64,
            avg_quality: avg_quality.unwrap_or(0.0) as f32,
            avg_strength: avg_strength.unwrap_or(0.0) as f32,
        })
    }
}

fn category_str(category: ConceptCategory) -> &'static str {
    match category {
        ConceptCategory::Technical => "technical",
        ConceptCategory::Framework => "framework",
        ConceptCategory::Topic => "topic",
    }
}

fn shortest_path(edges: &[Edge], from: &str, to: &str, max_depth: usize) -> Option<Vec<String>> {
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
