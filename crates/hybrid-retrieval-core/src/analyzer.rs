//! Query Analyzer (C7): a pure `analyze(query) -> QueryAnalysis`.
//!
//! Memoization by exact query string is the Hybrid Engine's
//! responsibility (§3 ownership note, §4.7); this module never caches
//! internally so it stays a pure function callers can unit-test in
//! isolation.

use crate::models::{QueryAnalysis, QueryType};

const RELATIONAL_TERMS: &[&str] = &[
    "relate", "related", "relation", "connection", "connected", "link", "linked", "between",
];
const SEMANTIC_TERMS: &[&str] = &["similar", "similarity", "meaning", "like", "resembl"];
const EXACT_TERMS: &[&str] = &["exact", "precisely", "exactly", "verbatim", "literal"];

/// `(concept name, synonyms)` — a concept is detected when its name or
/// any synonym occurs as a case-insensitive substring of the query.
const CONCEPT_SYNONYMS: &[(&str, &[&str])] = &[
    ("authentication", &["auth", "login", "sign in", "signin"]),
    ("authorization", &["authz", "permissions", "access control"]),
    ("api", &["endpoint", "rest api"]),
    ("database", &["db", "datastore", "data store"]),
    ("cache", &["caching", "memoization"]),
    ("embedding", &["embeddings", "vector representation"]),
    ("graph", &["knowledge graph", "graph database"]),
    ("fastapi", &["fast api"]),
    ("neo4j", &["neo 4j"]),
    ("kubernetes", &["k8s"]),
];

/// `(framework keyword, expansion tokens)` injected into suggested
/// expansions when the keyword is present in the query.
const FRAMEWORK_EXPANSIONS: &[(&str, &[&str])] = &[
    ("fastapi", &["python", "web framework", "api", "async"]),
    ("neo4j", &["graph database", "cypher", "nodes", "relationships"]),
    ("django", &["python", "web framework", "orm"]),
    ("react", &["javascript", "components", "frontend"]),
    ("kubernetes", &["containers", "orchestration", "pods"]),
    ("redis", &["cache", "key-value", "in-memory"]),
];

const DEFAULT_SEMANTIC_WEIGHT: f32 = 0.6;
const DEFAULT_GRAPH_WEIGHT: f32 = 0.4;

/// Runs the full analysis pipeline over a single query string.
pub fn analyze(query: &str) -> QueryAnalysis {
    let lowered = query.to_lowercase();

    let query_type = classify(&lowered);
    let detected_concepts = detect_concepts(&lowered);
    let suggested_expansions = suggest_expansions(&lowered);
    let word_count = query.split_whitespace().count();
    let relational_bonus = if query_type == QueryType::Relational {
        0.2
    } else {
        0.0
    };
    let complexity = (word_count as f32 / 10.0
        + detected_concepts.len() as f32 / 5.0
        + relational_bonus)
        .min(1.0);

    let (semantic_weight, graph_weight) = weights_for(query_type, detected_concepts.len());

    QueryAnalysis {
        query: query.to_string(),
        query_type,
        detected_concepts,
        suggested_expansions,
        complexity,
        semantic_weight,
        graph_weight,
    }
}

fn classify(lowered: &str) -> QueryType {
    if RELATIONAL_TERMS.iter().any(|t| lowered.contains(t)) {
        QueryType::Relational
    } else if SEMANTIC_TERMS.iter().any(|t| lowered.contains(t)) {
        QueryType::Semantic
    } else if EXACT_TERMS.iter().any(|t| lowered.contains(t)) {
        QueryType::Exact
    } else {
        QueryType::General
    }
}

fn detect_concepts(lowered: &str) -> Vec<String> {
    let mut found = Vec::new();
    for (name, synonyms) in CONCEPT_SYNONYMS {
        let hit = lowered.contains(name) || synonyms.iter().any(|s| lowered.contains(s));
        if hit {
            found.push(name.to_string());
        }
    }
    found
}

fn suggest_expansions(lowered: &str) -> Vec<String> {
    let mut expansions = Vec::new();
    for (keyword, tokens) in FRAMEWORK_EXPANSIONS {
        if lowered.contains(keyword) {
            for t in *tokens {
                if !expansions.contains(&t.to_string()) {
                    expansions.push(t.to_string());
                }
            }
        }
    }
    expansions
}

fn weights_for(query_type: QueryType, detected_concept_count: usize) -> (f32, f32) {
    let (semantic, graph) = match query_type {
        QueryType::Semantic => (0.8, 0.2),
        QueryType::Relational => (0.3, 0.7),
        QueryType::Exact | QueryType::General => {
            if detected_concept_count > 2 {
                (0.4, 0.6)
            } else {
                (DEFAULT_SEMANTIC_WEIGHT, DEFAULT_GRAPH_WEIGHT)
            }
        }
    };
    debug_assert!((semantic + graph - 1.0).abs() < 1e-6);
    (semantic, graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_always_sum_to_one() {
        for q in [
            "what connects these concepts",
            "find something similar to jwt",
            "exact match for the token field",
            "general query about nothing in particular",
            "auth and api and database and cache",
        ] {
            let a = analyze(q);
            assert!((a.semantic_weight + a.graph_weight - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn relational_terms_classify_as_relational() {
        assert_eq!(analyze("how is auth related to api").query_type, QueryType::Relational);
    }

    #[test]
    fn semantic_terms_classify_as_semantic() {
        assert_eq!(analyze("find chunks similar to this one").query_type, QueryType::Semantic);
    }

    #[test]
    fn exact_terms_classify_as_exact() {
        assert_eq!(analyze("match exactly this phrase").query_type, QueryType::Exact);
    }

    #[test]
    fn plain_query_classifies_as_general() {
        assert_eq!(analyze("tell me about databases").query_type, QueryType::General);
    }

    #[test]
    fn concept_detected_via_synonym() {
        let a = analyze("how do I sign in to the app");
        assert!(a.detected_concepts.contains(&"authentication".to_string()));
    }

    #[test]
    fn framework_expansion_is_injected() {
        let a = analyze("fastapi");
        assert!(a.suggested_expansions.contains(&"async".to_string()));
    }

    #[test]
    fn semantic_weight_dominates_for_semantic_queries() {
        let a = analyze("find something similar to this");
        assert_eq!((a.semantic_weight, a.graph_weight), (0.8, 0.2));
    }

    #[test]
    fn graph_weight_dominates_for_relational_queries() {
        let a = analyze("how does auth relate to api");
        assert_eq!((a.semantic_weight, a.graph_weight), (0.3, 0.7));
    }

    #[test]
    fn many_detected_concepts_shift_weight_toward_graph() {
        let a = analyze("auth api database cache embedding");
        assert_eq!((a.semantic_weight, a.graph_weight), (0.4, 0.6));
    }

    #[test]
    fn complexity_is_bounded() {
        let long_query = "auth api database cache embedding graph fastapi neo4j kubernetes ".repeat(5);
        assert!(analyze(&long_query).complexity <= 1.0);
    }

    #[test]
    fn analysis_is_deterministic() {
        let a1 = analyze("how does auth relate to api");
        let a2 = analyze("how does auth relate to api");
        assert_eq!(a1.detected_concepts, a2.detected_concepts);
        assert_eq!(a1.query_type, a2.query_type);
    }
}
