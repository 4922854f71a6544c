//! Concept extraction (C5): derives concept nodes and `CONTAINS_CONCEPT`
//! edges from a document's chunk text.
//!
//! Pure function of its inputs — no I/O, no mutation of global state —
//! so it can run inline inside the ingestion pipeline without its own
//! suspension point.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;

use crate::models::{ConceptCategory, ConceptNode, DocumentNode, Edge, EdgeLabel};

/// `(canonical name, human description)` for the built-in technical-term
/// lexicon. Emitted once at least `TECHNICAL_MIN_OCCURRENCES` hits are
/// found across the document's concatenated text.
const TECHNICAL_TERMS: &[(&str, &str)] = &[
    ("api", "Application programming interface"),
    ("database", "Persistent structured data store"),
    ("authentication", "Verifying the identity of a caller"),
    ("authorization", "Granting access to a verified caller"),
    ("cache", "Fast, transient storage for repeated reads"),
    ("embedding", "Dense vector representation of text"),
    ("vector", "Fixed-dimension numeric representation"),
    ("graph", "Nodes and typed edges representing relationships"),
    ("token", "Unit of text or of an auth credential"),
    ("middleware", "Request/response processing layer"),
    ("async", "Non-blocking, cooperatively scheduled execution"),
    ("concurrency", "Multiple units of work making progress together"),
    ("schema", "Structural definition of stored data"),
    ("index", "Structure that accelerates lookups"),
    ("webhook", "HTTP callback triggered by an event"),
];

/// `(canonical name, human description)` for the built-in framework
/// lexicon. Emitted on a single occurrence, since framework names are
/// high-signal and rarely appear incidentally.
const FRAMEWORK_KEYWORDS: &[(&str, &str)] = &[
    ("fastapi", "Python web framework for building APIs"),
    ("neo4j", "Native graph database"),
    ("django", "Python web framework"),
    ("flask", "Lightweight Python web framework"),
    ("react", "JavaScript UI library"),
    ("postgres", "Relational database system"),
    ("redis", "In-memory key-value store"),
    ("kubernetes", "Container orchestration platform"),
    ("docker", "Container runtime and image format"),
    ("tokio", "Asynchronous Rust runtime"),
];

const TECHNICAL_MIN_OCCURRENCES: u64 = 2;
const FRAMEWORK_MIN_OCCURRENCES: u64 = 1;
const TECHNICAL_CAP: f32 = 0.85;
const TECHNICAL_DIVISOR: f32 = 10.0;
const FRAMEWORK_CAP: f32 = 0.95;
const FRAMEWORK_DIVISOR: f32 = 3.0;

/// Fixed frequency weight given to a document's own topic tags when
/// seeded as concepts (§4.5 step 1).
const SEED_TAG_FREQUENCY: u64 = 10;

pub struct ConceptExtractionResult {
    pub concepts: Vec<ConceptNode>,
    pub edges: Vec<Edge>,
}

/// Runs concept extraction over a document and its ordered chunk texts.
pub fn extract_concepts(document: &DocumentNode, chunk_texts: &[&str]) -> ConceptExtractionResult {
    let joined = chunk_texts.join(" ");
    let lowered = joined.to_lowercase();

    // BTreeMap keyed by canonical (case-folded) name for deterministic
    // iteration order, matching the determinism property in §8.
    let mut concepts: BTreeMap<String, ConceptNode> = BTreeMap::new();

    for tag in &document.topic_tags {
        let canonical = tag.to_lowercase();
        let confidence = (SEED_TAG_FREQUENCY as f32 / TECHNICAL_DIVISOR).min(TECHNICAL_CAP);
        upsert_concept(
            &mut concepts,
            &canonical,
            ConceptCategory::Topic,
            format!("Topic tag: {tag}"),
            SEED_TAG_FREQUENCY,
            confidence,
            &document.topic_tags,
        );
    }

    scan_lexicon(
        &mut concepts,
        &lowered,
        TECHNICAL_TERMS,
        ConceptCategory::Technical,
        TECHNICAL_MIN_OCCURRENCES,
        TECHNICAL_CAP,
        TECHNICAL_DIVISOR,
        &document.topic_tags,
    );
    scan_lexicon(
        &mut concepts,
        &lowered,
        FRAMEWORK_KEYWORDS,
        ConceptCategory::Framework,
        FRAMEWORK_MIN_OCCURRENCES,
        FRAMEWORK_CAP,
        FRAMEWORK_DIVISOR,
        &document.topic_tags,
    );

    let edges = concepts
        .values()
        .map(|c| Edge {
            from_id: document.id.clone(),
            label: EdgeLabel::ContainsConcept,
            to_id: c.name.clone(),
            strength: c.confidence,
            properties: json!({ "occurrences": c.frequency }),
        })
        .collect();

    ConceptExtractionResult {
        concepts: concepts.into_values().collect(),
        edges,
    }
}

#[allow(clippy::too_many_arguments)]
fn scan_lexicon(
    concepts: &mut BTreeMap<String, ConceptNode>,
    haystack: &str,
    lexicon: &[(&str, &str)],
    category: ConceptCategory,
    min_occurrences: u64,
    cap: f32,
    divisor: f32,
    related_tags: &BTreeSet<String>,
) {
    for (term, description) in lexicon {
        let occurrences = count_occurrences(haystack, term);
        if occurrences < min_occurrences {
            continue;
        }
        let confidence = (occurrences as f32 / divisor).min(cap);
        upsert_concept(
            concepts,
            term,
            category,
            description.to_string(),
            occurrences,
            confidence,
            related_tags,
        );
    }
}

fn count_occurrences(haystack: &str, needle: &str) -> u64 {
    if needle.is_empty() {
        return 0;
    }
    let mut count = 0u64;
    let mut start = 0usize;
    while let Some(pos) = haystack[start..].find(needle) {
        count += 1;
        start += pos + needle.len();
    }
    count
}

#[allow(clippy::too_many_arguments)]
fn upsert_concept(
    concepts: &mut BTreeMap<String, ConceptNode>,
    canonical: &str,
    category: ConceptCategory,
    description: String,
    frequency: u64,
    confidence: f32,
    related_tags: &BTreeSet<String>,
) {
    concepts
        .entry(canonical.to_string())
        .and_modify(|existing| {
            // Merge duplicates by canonical name: frequency accumulates,
            // confidence takes the higher of the two (§3 invariant:
            // frequency is monotonic non-decreasing).
            existing.frequency += frequency;
            existing.confidence = existing.confidence.max(confidence);
            existing.related_tags.extend(related_tags.iter().cloned());
        })
        .or_insert_with(|| ConceptNode {
            name: canonical.to_string(),
            category,
            description,
            frequency,
            confidence,
            related_tags: related_tags.clone(),
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn doc(tags: &[&str]) -> DocumentNode {
        let now = Utc::now();
        DocumentNode {
            id: "doc1".into(),
            source: "web".into(),
            url: None,
            title: None,
            content_hash: "hash".into(),
            chunk_count: 1,
            quality_score: 0.9,
            topic_tags: tags.iter().map(|s| s.to_string()).collect(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn technical_term_needs_two_occurrences() {
        let d = doc(&[]);
        let r = extract_concepts(&d, &["an api call to the api endpoint"]);
        assert!(r.concepts.iter().any(|c| c.name == "api"));
    }

    #[test]
    fn technical_term_below_threshold_is_absent() {
        let d = doc(&[]);
        let r = extract_concepts(&d, &["a single api call"]);
        assert!(!r.concepts.iter().any(|c| c.name == "api"));
    }

    #[test]
    fn framework_keyword_needs_one_occurrence() {
        let d = doc(&[]);
        let r = extract_concepts(&d, &["built with fastapi"]);
        assert!(r.concepts.iter().any(|c| c.name == "fastapi"));
    }

    #[test]
    fn concept_names_are_case_folded_and_merged() {
        let d = doc(&[]);
        let r1 = extract_concepts(&d, &["FastAPI and also fastapi"]);
        let count = r1.concepts.iter().filter(|c| c.name == "fastapi").count();
        assert_eq!(count, 1);
    }

    #[test]
    fn seed_tags_are_emitted_as_concepts() {
        let d = doc(&["auth", "jwt"]);
        let r = extract_concepts(&d, &["nothing special here"]);
        assert!(r.concepts.iter().any(|c| c.name == "auth"));
        assert!(r.concepts.iter().any(|c| c.name == "jwt"));
    }

    #[test]
    fn each_concept_yields_a_contains_concept_edge() {
        let d = doc(&["auth"]);
        let r = extract_concepts(&d, &["an api call to the api endpoint"]);
        assert_eq!(r.edges.len(), r.concepts.len());
        for e in &r.edges {
            assert_eq!(e.label, EdgeLabel::ContainsConcept);
            assert_eq!(e.from_id, "doc1");
        }
    }

    #[test]
    fn confidence_is_bounded() {
        let d = doc(&[]);
        let text = "api ".repeat(1000);
        let r = extract_concepts(&d, &[&text]);
        let api = r.concepts.iter().find(|c| c.name == "api").unwrap();
        assert!(api.confidence <= TECHNICAL_CAP);
    }
}
