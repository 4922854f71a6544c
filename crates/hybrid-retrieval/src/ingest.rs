//! Ingestion pipeline (C6): chunk → embed → persist chunks → persist the
//! document node → extract concepts → derive cross-document edges.
//!
//! A whole batch of [`PageRecord`]s is ingested together so
//! `PART_OF_SAME_SOURCE` and `RELATED_TO` edges can be derived across the
//! batch (§4.6 steps 6–7); a single page ingested alone only gets its own
//! `CONTAINS_CONCEPT` edges. Per-document failures are logged and
//! skipped rather than aborting the whole batch (§4.6 edge case).

use std::sync::Arc;

use hybrid_retrieval_core::chunk::{chunk_text, content_hash, document_id};
use hybrid_retrieval_core::concept::extract_concepts;
use hybrid_retrieval_core::models::{DocumentNode, Edge, EdgeLabel, PageRecord};
use hybrid_retrieval_core::traits::{GraphStoreAdapter, VectorStoreAdapter};
use tracing::{error, info};

use crate::config::{ChunkingConfig, GraphStoreConfig};
use crate::embed_gateway::EmbeddingGateway;

#[derive(Debug, Default)]
pub struct IngestReport {
    pub documents_ingested: u64,
    pub chunks_written: u64,
    pub concepts_extracted: u64,
    pub edges_written: u64,
    pub failures: Vec<String>,
}

pub struct IngestionPipeline {
    vector_store: Arc<dyn VectorStoreAdapter>,
    graph_store: Arc<dyn GraphStoreAdapter>,
    embedding: Option<Arc<EmbeddingGateway>>,
    chunking: ChunkingConfig,
    graph: GraphStoreConfig,
}

impl IngestionPipeline {
    pub fn new(
        vector_store: Arc<dyn VectorStoreAdapter>,
        graph_store: Arc<dyn GraphStoreAdapter>,
        embedding: Option<Arc<EmbeddingGateway>>,
        chunking: ChunkingConfig,
        graph: GraphStoreConfig,
    ) -> Self {
        Self {
            vector_store,
            graph_store,
            embedding,
            chunking,
            graph,
        }
    }

    pub async fn ingest(&self, pages: &[PageRecord]) -> IngestReport {
        let mut report = IngestReport::default();
        let mut ingested_docs: Vec<DocumentNode> = Vec::new();

        for page in pages {
            match self.ingest_one(page).await {
                Ok((doc, chunk_count, concept_count)) => {
                    report.documents_ingested += 1;
                    report.chunks_written += chunk_count;
                    report.concepts_extracted += concept_count;
                    ingested_docs.push(doc);
                }
                Err(e) => {
                    error!(source = %page.source, url = ?page.url, error = %e, "failed to ingest page, skipping");
                    report.failures.push(format!("{}: {e}", page.source));
                }
            }
        }

        report.edges_written += self.derive_cross_document_edges(&ingested_docs).await;

        info!(
            documents = report.documents_ingested,
            chunks = report.chunks_written,
            concepts = report.concepts_extracted,
            edges = report.edges_written,
            failures = report.failures.len(),
            "ingestion batch complete"
        );
        report
    }

    async fn ingest_one(
        &self,
        page: &PageRecord,
    ) -> Result<(DocumentNode, u64, u64), hybrid_retrieval_core::error::EngineError> {
        let doc_id = document_id(&page.source, page.url.as_deref());
        let now = chrono::Utc::now();

        let mut chunks = chunk_text(
            &doc_id,
            &page.source,
            page.url.as_deref(),
            page.title.as_deref(),
            &page.text,
            page.quality_score,
            &page.topic_tags,
            self.chunking.max_tokens,
        );

        if let Some(gateway) = &self.embedding {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let embedded = gateway.embed(&texts).await?;
            for (chunk, vector) in chunks.iter_mut().zip(embedded.vectors.into_iter()) {
                chunk.vector = vector;
            }
        }

        let document = DocumentNode {
            id: doc_id.clone(),
            source: page.source.clone(),
            url: page.url.clone(),
            title: page.title.clone(),
            content_hash: content_hash(&page.text),
            chunk_count: chunks.len(),
            quality_score: page.quality_score,
            topic_tags: page.topic_tags.clone(),
            created_at: now,
            updated_at: now,
        };

        // Chunks are written before the document node: a failure upserting
        // chunks must not leave a document node with no chunks behind it.
        // A failure after this point (writing the document node) instead
        // leaves chunks whose document_id does not yet resolve, which a
        // retry of this same page heals by re-upserting both idempotently.
        self.vector_store.upsert_chunks(&chunks).await?;
        self.graph_store.upsert_document(&document).await?;

        let chunk_texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let extraction = extract_concepts(&document, &chunk_texts);
        for concept in &extraction.concepts {
            self.graph_store.upsert_concept(concept).await?;
        }
        for edge in &extraction.edges {
            self.graph_store.upsert_edge(edge).await?;
        }

        Ok((document, chunks.len() as u64, extraction.concepts.len() as u64))
    }

    /// Derives `PART_OF_SAME_SOURCE` (same `source` field) and
    /// `RELATED_TO` edges between every pair of documents ingested in
    /// this batch. `RELATED_TO` strength is `topic_overlap ×
    /// average_quality(d1, d2)`, where `topic_overlap` is the shared-tag
    /// count divided by the larger of the two tag sets; an edge is
    /// written when that strength clears `related_to_threshold`.
    ///
    /// `PART_OF_SAME_SOURCE` is conceptually undirected; it is stored as
    /// two directed rows (`a -> b` and `b -> a`) since the graph store's
    /// schema has no separate undirected-edge table.
    async fn derive_cross_document_edges(&self, docs: &[DocumentNode]) -> u64 {
        let mut written = 0u64;
        for i in 0..docs.len() {
            for j in (i + 1)..docs.len() {
                let a = &docs[i];
                let b = &docs[j];

                if a.source == b.source {
                    written += self.write_symmetric_edge(
                        a,
                        b,
                        EdgeLabel::PartOfSameSource,
                        self.graph.part_of_same_source_strength,
                        serde_json::json!({ "shared_source": a.source }),
                    )
                    .await;
                }

                let overlap = a.topic_tags.intersection(&b.topic_tags).count();
                if overlap == 0 {
                    continue;
                }
                let largest = a.topic_tags.len().max(b.topic_tags.len()).max(1);
                let topic_overlap = overlap as f32 / largest as f32;
                let avg_quality = (a.quality_score + b.quality_score) / 2.0;
                let strength = topic_overlap * avg_quality;
                if strength >= self.graph.related_to_threshold {
                    written += self.write_symmetric_edge(
                        a,
                        b,
                        EdgeLabel::RelatedTo,
                        strength,
                        serde_json::json!({ "shared_topics": overlap, "topic_overlap": topic_overlap }),
                    )
                    .await;
                }
            }
        }
        written
    }

    async fn write_symmetric_edge(
        &self,
        a: &DocumentNode,
        b: &DocumentNode,
        label: EdgeLabel,
        strength: f32,
        properties: serde_json::Value,
    ) -> u64 {
        let forward = Edge {
            from_id: a.id.clone(),
            label,
            to_id: b.id.clone(),
            strength,
            properties: properties.clone(),
        };
        let backward = Edge {
            from_id: b.id.clone(),
            label,
            to_id: a.id.clone(),
            strength,
            properties,
        };
        let mut written = 0u64;
        if self.graph_store.upsert_edge(&forward).await.is_ok() {
            written += 1;
        }
        if self.graph_store.upsert_edge(&backward).await.is_ok() {
            written += 1;
        }
        written
    }
}
