//! Result Fuser (C9): merges semantic and graph hits into one ranked,
//! deduplicated list of [`HybridSearchResult`]s.
//!
//! Pure function of its inputs; never suspends, never mutates shared
//! state. Unified results live in a single `Vec` built in one pass
//! (§9 design note: "arena + indices", not a pointer graph between the
//! two hit buckets).

use std::collections::BTreeMap;

use crate::models::{GraphNodeHit, HybridSearchResult, RankingStrategy, SemanticHit};

/// Output of a fusion pass: the ranked results plus the overlap metric.
pub struct FusionOutcome {
    pub results: Vec<HybridSearchResult>,
    /// How many unified results were produced by more than one source.
    pub overlap_count: usize,
}

/// A unified, not-yet-scored record while fusion accumulates hits.
struct Unified {
    id: String,
    title: Option<String>,
    source: String,
    snippet: String,
    semantic_score: f32,
    graph_score: f32,
    found_via: std::collections::BTreeSet<String>,
}

/// Fuses `semantic_hits` and `graph_hits` into a ranked result list.
///
/// Semantic hits are unified by the chunk's own `id` — one record per
/// surfaced chunk, not per document — while graph hits are unified by the
/// node's own `id`. A hit from both buckets sharing that same underlying
/// id is merged into a single record: semantic attributes (title, source,
/// snippet) win for content fields, the graph score is added, and
/// `found_via` becomes the union of both sources.
pub fn fuse(
    semantic_hits: &[SemanticHit],
    graph_hits: &[GraphNodeHit],
    semantic_weight: f32,
    graph_weight: f32,
    strategy: RankingStrategy,
    max_results: usize,
) -> FusionOutcome {
    // BTreeMap keyed by underlying id for deterministic iteration order
    // regardless of hit arrival order (§5 ordering guarantee).
    let mut unified: BTreeMap<String, Unified> = BTreeMap::new();

    for hit in semantic_hits {
        let snippet: String = hit.chunk.text.chars().take(240).collect();
        unified
            .entry(hit.chunk.id.clone())
            .and_modify(|u| {
                u.semantic_score = u.semantic_score.max(hit.score);
                u.found_via.insert("semantic".to_string());
            })
            .or_insert_with(|| Unified {
                id: hit.chunk.id.clone(),
                title: hit.chunk.title.clone(),
                source: hit.chunk.source.clone(),
                snippet,
                semantic_score: hit.score,
                graph_score: 0.0,
                found_via: ["semantic".to_string()].into_iter().collect(),
            });
    }

    for hit in graph_hits {
        unified
            .entry(hit.id.clone())
            .and_modify(|u| {
                u.graph_score = u.graph_score.max(hit.score);
                u.found_via.insert("graph".to_string());
            })
            .or_insert_with(|| Unified {
                id: hit.id.clone(),
                title: Some(hit.name.clone()),
                source: hit.label.clone(),
                snippet: hit.snippet.clone().unwrap_or_default(),
                semantic_score: 0.0,
                graph_score: hit.score,
                found_via: ["graph".to_string()].into_iter().collect(),
            });
    }

    let overlap_count = unified.values().filter(|u| u.found_via.len() > 1).count();

    let semantic_rank = rank_by(unified.values(), |u| u.semantic_score);
    let graph_rank = rank_by(unified.values(), |u| u.graph_score);
    let n = unified.len().max(1);

    let mut scored: Vec<(f32, Unified)> = unified
        .into_iter()
        .map(|(id, u)| {
            let combined = combined_score(
                &u,
                &id,
                strategy,
                semantic_weight,
                graph_weight,
                &semantic_rank,
                &graph_rank,
                n,
            );
            (combined, u)
        })
        .collect();

    // Deterministic tie-break: higher semantic score first, then
    // ascending id (§4.9).
    scored.sort_by(|(score_a, a), (score_b, b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.semantic_score.partial_cmp(&a.semantic_score).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.id.cmp(&b.id))
    });

    scored.truncate(max_results);

    let results = scored
        .into_iter()
        .enumerate()
        .map(|(i, (combined, u))| HybridSearchResult {
            id: u.id,
            title: u.title,
            source: u.source,
            snippet: u.snippet,
            semantic_score: u.semantic_score,
            graph_score: u.graph_score,
            combined_score: combined,
            rank: i + 1,
            found_via: u.found_via,
        })
        .collect();

    FusionOutcome {
        results,
        overlap_count,
    }
}

/// Builds `id -> descending rank (0-based)` for borda/reciprocal-rank scoring.
fn rank_by<'a>(
    items: impl Iterator<Item = &'a Unified>,
    score_of: impl Fn(&Unified) -> f32,
) -> BTreeMap<String, usize> {
    let mut with_scores: Vec<(&str, f32)> = items.map(|u| (u.id.as_str(), score_of(u))).collect();
    with_scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    with_scores
        .into_iter()
        .enumerate()
        .map(|(rank, (id, _))| (id.to_string(), rank))
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn combined_score(
    u: &Unified,
    id: &str,
    strategy: RankingStrategy,
    semantic_weight: f32,
    graph_weight: f32,
    semantic_rank: &BTreeMap<String, usize>,
    graph_rank: &BTreeMap<String, usize>,
    n: usize,
) -> f32 {
    let s = u.semantic_score;
    let g = u.graph_score;
    match strategy {
        RankingStrategy::WeightedAverage => s * semantic_weight + g * graph_weight,
        RankingStrategy::MaxScore => s.max(g),
        RankingStrategy::HarmonicMean => {
            if s > 0.0 && g > 0.0 {
                2.0 * s * g / (s + g)
            } else {
                s.max(g)
            }
        }
        RankingStrategy::BordaCount => {
            let sr = semantic_rank.get(id).copied().unwrap_or(n.saturating_sub(1));
            let gr = graph_rank.get(id).copied().unwrap_or(n.saturating_sub(1));
            let points_s = (n.saturating_sub(sr)) as f32;
            let points_g = (n.saturating_sub(gr)) as f32;
            (points_s + points_g) / (2.0 * n as f32)
        }
        RankingStrategy::ReciprocalRank => {
            const K: f32 = 60.0;
            let sr = semantic_rank.get(id).copied().unwrap_or(n);
            let gr = graph_rank.get(id).copied().unwrap_or(n);
            1.0 / (K + sr as f32 + 1.0) + 1.0 / (K + gr as f32 + 1.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn chunk(document_id: &str, title: &str) -> Chunk {
        let now = Utc::now();
        Chunk {
            id: document_id.to_string(),
            document_id: document_id.to_string(),
            source: "web".into(),
            source_url: None,
            title: Some(title.to_string()),
            text: "some snippet text".into(),
            chunk_index: 0,
            total_chunks: 1,
            quality_score: 1.0,
            topic_tags: BTreeSet::new(),
            vector: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    fn graph_hit(id: &str, score: f32) -> GraphNodeHit {
        GraphNodeHit {
            id: id.to_string(),
            label: "Document".into(),
            name: id.to_string(),
            snippet: None,
            topic_tags: BTreeSet::new(),
            score,
        }
    }

    #[test]
    fn weighted_average_s2_scenario() {
        // S2: chunk A semantic 0.9 graph 0.0, chunk B semantic 0.2 graph 0.8.
        let semantic = vec![
            SemanticHit { chunk: chunk("A", "A"), score: 0.9 },
            SemanticHit { chunk: chunk("B", "B"), score: 0.2 },
        ];
        let graph = vec![graph_hit("A", 0.0), graph_hit("B", 0.8)];

        let out = fuse(&semantic, &graph, 0.6, 0.4, RankingStrategy::WeightedAverage, 10);
        let a = out.results.iter().find(|r| r.id == "A").unwrap();
        let b = out.results.iter().find(|r| r.id == "B").unwrap();
        assert!((a.combined_score - 0.54).abs() < 1e-5);
        assert!((b.combined_score - 0.44).abs() < 1e-5);
        assert_eq!(out.results[0].id, "A");

        let out2 = fuse(&semantic, &graph, 0.3, 0.7, RankingStrategy::WeightedAverage, 10);
        let a2 = out2.results.iter().find(|r| r.id == "A").unwrap();
        let b2 = out2.results.iter().find(|r| r.id == "B").unwrap();
        assert!((a2.combined_score - 0.27).abs() < 1e-5);
        assert!((b2.combined_score - 0.62).abs() < 1e-5);
        assert_eq!(out2.results[0].id, "B");
    }

    #[test]
    fn fusion_monotonicity_under_weighted_average() {
        let semantic = vec![SemanticHit { chunk: chunk("A", "A"), score: 0.5 }];
        let graph = vec![graph_hit("A", 0.3)];
        let out1 = fuse(&semantic, &graph, 0.6, 0.4, RankingStrategy::WeightedAverage, 10);

        let semantic2 = vec![SemanticHit { chunk: chunk("A", "A"), score: 0.7 }];
        let out2 = fuse(&semantic2, &graph, 0.6, 0.4, RankingStrategy::WeightedAverage, 10);

        assert!(out2.results[0].combined_score >= out1.results[0].combined_score);
    }

    #[test]
    fn harmonic_mean_never_exceeds_max_component() {
        let semantic = vec![SemanticHit { chunk: chunk("A", "A"), score: 0.8 }];
        let graph = vec![graph_hit("A", 0.3)];
        let out = fuse(&semantic, &graph, 0.6, 0.4, RankingStrategy::HarmonicMean, 10);
        assert!(out.results[0].combined_score <= 0.8 + 1e-6);
    }

    #[test]
    fn overlap_count_reflects_multi_source_hits() {
        let semantic = vec![
            SemanticHit { chunk: chunk("A", "A"), score: 0.9 },
            SemanticHit { chunk: chunk("C", "C"), score: 0.1 },
        ];
        let graph = vec![graph_hit("A", 0.5)];
        let out = fuse(&semantic, &graph, 0.6, 0.4, RankingStrategy::WeightedAverage, 10);
        assert_eq!(out.overlap_count, 1);
    }

    #[test]
    fn results_are_truncated_to_max_results() {
        let semantic: Vec<_> = (0..5)
            .map(|i| SemanticHit { chunk: chunk(&format!("doc{i}"), "t"), score: 0.5 })
            .collect();
        let out = fuse(&semantic, &[], 0.6, 0.4, RankingStrategy::WeightedAverage, 2);
        assert_eq!(out.results.len(), 2);
    }

    #[test]
    fn ties_break_by_ascending_id() {
        let semantic = vec![
            SemanticHit { chunk: chunk("z", "z"), score: 0.5 },
            SemanticHit { chunk: chunk("a", "a"), score: 0.5 },
        ];
        let out = fuse(&semantic, &[], 0.6, 0.4, RankingStrategy::WeightedAverage, 10);
        assert_eq!(out.results[0].id, "a");
    }

    #[test]
    fn rank_is_assigned_after_sorting() {
        let semantic = vec![
            SemanticHit { chunk: chunk("A", "A"), score: 0.9 },
            SemanticHit { chunk: chunk("B", "B"), score: 0.1 },
        ];
        let out = fuse(&semantic, &[], 0.6, 0.4, RankingStrategy::WeightedAverage, 10);
        assert_eq!(out.results[0].rank, 1);
        assert_eq!(out.results[1].rank, 2);
    }
}
