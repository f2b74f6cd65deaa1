//! Adaptive Retriever - sizes and runs the similarity query
//!
//! Provides:
//! - top_k scaling by comprehensiveness, clamped to configured bounds
//! - Deeper base_k when a single document is targeted
//! - One supplementary query when results cluster on one document

use super::chunk::{Chunk, ChunkOrigin, RetrievedChunk};
use super::filter::QueryFilter;
use super::with_timeout;
use crate::config::RetrievalConfig;
use crate::embeddings::Embedder;
use crate::errors::Result;
use crate::index::{IndexMatch, VectorIndex};
use crate::metrics;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of one retrieval
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    /// Primary chunks in score order, then new supplementary chunks
    pub chunks: Vec<RetrievedChunk>,

    /// Result count requested from the primary query
    pub top_k: usize,

    /// Document the supplementary query was scoped to, if one was issued
    pub supplementary_doc: Option<String>,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Compute the primary result count: `clamp(round(base_k * c), min, max)`.
///
/// Rounds half away from zero. Non-finite products clamp to `min`.
pub fn compute_top_k(base_k: usize, comprehensiveness: f64, min: usize, max: usize) -> usize {
    let scaled = (base_k as f64 * comprehensiveness).round();
    if !scaled.is_finite() || scaled <= min as f64 {
        return min;
    }
    if scaled >= max as f64 {
        return max.max(min);
    }
    scaled as usize
}

/// Embeds the question and queries the index
pub struct AdaptiveRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    config: RetrievalConfig,
    embed_timeout: Duration,
    index_timeout: Duration,
}

impl AdaptiveRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        config: RetrievalConfig,
        embed_timeout: Duration,
        index_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            index,
            config,
            embed_timeout,
            index_timeout,
        }
    }

    /// Run the primary query and, when warranted, one supplementary query.
    ///
    /// A document id carried by `filter` takes precedence over
    /// `target_doc_id`; either one scopes the primary query to that
    /// document. Embedding and index failures propagate.
    pub async fn retrieve(
        &self,
        query: &str,
        filter: &QueryFilter,
        comprehensiveness: f64,
        target_doc_id: Option<&str>,
    ) -> Result<Retrieval> {
        let start = Instant::now();

        let vector = with_timeout("embedding", self.embed_timeout, self.embedder.embed(query)).await?;

        let target = filter.doc_id().or(target_doc_id).map(str::to_string);
        let base_k = if target.is_some() {
            self.config.focused_base_k
        } else {
            self.config.general_base_k
        };
        let top_k = compute_top_k(
            base_k,
            comprehensiveness,
            self.config.min_top_k,
            self.config.max_top_k,
        );
        let primary_filter = match &target {
            Some(doc_id) => filter.scoped_to_document(doc_id),
            None => filter.clone(),
        };

        debug!(
            query_len = query.len(),
            base_k,
            top_k,
            filter_keys = primary_filter.len(),
            target = target.as_deref().unwrap_or(""),
            "Running primary query"
        );

        let primary = with_timeout(
            "index query",
            self.index_timeout,
            self.index.query(&vector, top_k, &primary_filter, true),
        )
        .await?;

        if primary.is_empty() {
            info!(top_k, "Primary query returned no matches");
            metrics::record_retrieval(start.elapsed().as_secs_f64(), top_k, 0, false);
            return Ok(Retrieval {
                chunks: Vec::new(),
                top_k,
                supplementary_doc: None,
            });
        }

        let mut seen: HashSet<String> = primary.iter().map(|m| m.id.clone()).collect();
        let mut chunks = to_chunks(primary, ChunkOrigin::Primary);

        let supplementary_doc = target.or_else(|| {
            dominant_document(&chunks, top_k, self.config.dominance_ratio)
        });

        if let Some(doc_id) = &supplementary_doc {
            let scoped = filter.scoped_to_document(doc_id);
            let extra = with_timeout(
                "supplementary index query",
                self.index_timeout,
                self.index
                    .query(&vector, self.config.supplementary_top_k, &scoped, true),
            )
            .await?;

            let returned = extra.len();
            let fresh: Vec<IndexMatch> = extra
                .into_iter()
                .filter(|m| seen.insert(m.id.clone()))
                .collect();

            debug!(
                doc_id = %doc_id,
                returned,
                new = fresh.len(),
                "Supplementary query merged"
            );
            chunks.extend(to_chunks(fresh, ChunkOrigin::Supplementary));
        }

        let elapsed = start.elapsed();
        metrics::record_retrieval(
            elapsed.as_secs_f64(),
            top_k,
            chunks.len(),
            supplementary_doc.is_some(),
        );

        info!(
            top_k,
            chunks = chunks.len(),
            supplementary_doc = supplementary_doc.as_deref().unwrap_or(""),
            latency_ms = elapsed.as_millis() as u64,
            "Retrieval complete"
        );

        Ok(Retrieval {
            chunks,
            top_k,
            supplementary_doc,
        })
    }
}

/// Convert matches, dropping those that cannot be cited
fn to_chunks(matches: Vec<IndexMatch>, origin: ChunkOrigin) -> Vec<RetrievedChunk> {
    matches
        .iter()
        .filter_map(|m| match Chunk::from_match(m) {
            Ok(chunk) => Some(RetrievedChunk { chunk, origin }),
            Err(e) => {
                warn!(chunk_id = %m.id, error = %e, "Dropping match with incomplete metadata");
                None
            }
        })
        .collect()
}

/// Document holding more than `ratio * top_k` of the chunks. Ties go to
/// the document encountered first.
fn dominant_document(chunks: &[RetrievedChunk], top_k: usize, ratio: f64) -> Option<String> {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();

    for retrieved in chunks {
        let doc_id = retrieved.chunk.doc_id.as_str();
        let count = counts.entry(doc_id).or_insert(0);
        if *count == 0 {
            order.push(doc_id);
        }
        *count += 1;
    }

    let (doc_id, count) = order
        .iter()
        .map(|doc_id| (*doc_id, counts[doc_id]))
        .fold(None, |best: Option<(&str, usize)>, candidate| match best {
            Some((_, best_count)) if best_count >= candidate.1 => best,
            _ => Some(candidate),
        })?;

    (count as f64 > top_k as f64 * ratio).then(|| doc_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbedder;
    use crate::errors::AppError;
    use crate::index::testing::{chunk_match, ScriptedIndex};
    use serde_json::json;

    fn retriever(index: Arc<ScriptedIndex>) -> AdaptiveRetriever {
        AdaptiveRetriever::new(
            Arc::new(MockEmbedder::new(8)),
            index,
            RetrievalConfig::default(),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
    }

    fn matches(doc_ids: &[(&str, &str)]) -> Vec<IndexMatch> {
        doc_ids
            .iter()
            .map(|(id, doc)| chunk_match(id, doc, &format!("Title {}", doc), "", ""))
            .collect()
    }

    #[test]
    fn test_top_k_scaling() {
        assert_eq!(compute_top_k(8, 0.5, 5, 30), 5);
        assert_eq!(compute_top_k(8, 4.0, 5, 30), 30);
        assert_eq!(compute_top_k(15, 1.0, 5, 30), 15);
        assert_eq!(compute_top_k(8, 1.0, 5, 30), 8);
        assert_eq!(compute_top_k(8, 1.5, 5, 30), 12);
        // 8 * 0.8125 = 6.5 rounds up
        assert_eq!(compute_top_k(8, 0.8125, 5, 30), 7);
    }

    #[test]
    fn test_top_k_degenerate_inputs() {
        assert_eq!(compute_top_k(8, f64::NAN, 5, 30), 5);
        assert_eq!(compute_top_k(8, f64::INFINITY, 5, 30), 5);
        assert_eq!(compute_top_k(8, -2.0, 5, 30), 5);
        assert_eq!(compute_top_k(8, 0.0, 5, 30), 5);
    }

    #[test]
    fn test_dominant_document() {
        let chunks = to_chunks(
            matches(&[("a1", "A"), ("a2", "A"), ("b1", "B"), ("a3", "A"), ("a4", "A"), ("a5", "A")]),
            ChunkOrigin::Primary,
        );
        // 5 of top_k 8 is 62.5%
        assert_eq!(dominant_document(&chunks, 8, 0.6), Some("A".to_string()));
        // 5 of top_k 10 is exactly 50%
        assert_eq!(dominant_document(&chunks, 10, 0.6), None);
        assert_eq!(dominant_document(&[], 8, 0.6), None);
    }

    #[tokio::test]
    async fn test_dominance_triggers_one_supplementary_query() {
        let primary = matches(&[
            ("a1", "A"), ("a2", "A"), ("a3", "A"), ("a4", "A"),
            ("a5", "A"), ("b1", "B"), ("c1", "C"), ("d1", "D"),
        ]);
        let supplementary = matches(&[("a2", "A"), ("a6", "A"), ("a7", "A")]);
        let index = Arc::new(ScriptedIndex::new().respond(primary).respond(supplementary));

        let retrieval = retriever(index.clone())
            .retrieve("what did A say?", &QueryFilter::new(), 1.0, None)
            .await
            .unwrap();

        let calls = index.query_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].top_k, 8);
        assert_eq!(calls[1].top_k, 5);
        assert_eq!(calls[1].filter.doc_id(), Some("A"));

        let ids: Vec<&str> = retrieval.chunks.iter().map(|c| c.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2", "a3", "a4", "a5", "b1", "c1", "d1", "a6", "a7"]);
        assert_eq!(retrieval.chunks[8].origin, ChunkOrigin::Supplementary);
        assert_eq!(retrieval.supplementary_doc.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn test_spread_results_skip_supplementary_query() {
        let primary = matches(&[
            ("a1", "A"), ("b1", "B"), ("c1", "C"), ("a2", "A"),
            ("d1", "D"), ("e1", "E"), ("a3", "A"), ("f1", "F"),
        ]);
        let index = Arc::new(ScriptedIndex::new().respond(primary));

        let retrieval = retriever(index.clone())
            .retrieve("broad question", &QueryFilter::new(), 1.0, None)
            .await
            .unwrap();

        assert_eq!(index.query_calls().len(), 1);
        assert_eq!(retrieval.chunks.len(), 8);
        assert!(retrieval.supplementary_doc.is_none());
    }

    #[tokio::test]
    async fn test_target_document_deepens_and_supplements() {
        let index = Arc::new(
            ScriptedIndex::new()
                .respond(matches(&[("t1", "T"), ("t2", "T")]))
                .respond(matches(&[("t3", "T")])),
        );

        let retrieval = retriever(index.clone())
            .retrieve("summarise", &QueryFilter::new(), 1.0, Some("T"))
            .await
            .unwrap();

        let calls = index.query_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].top_k, 15);
        assert_eq!(calls[0].filter.doc_id(), Some("T"));
        assert_eq!(calls[1].filter.doc_id(), Some("T"));
        assert_eq!(retrieval.chunks.len(), 3);
    }

    #[tokio::test]
    async fn test_filter_doc_id_wins_over_target() {
        let filter = QueryFilter::from(
            json!({"doc_id": "F", "file_created_at_unix": {"$gte": 0}})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let index = Arc::new(ScriptedIndex::new().respond(matches(&[("f1", "F")])));

        retriever(index.clone())
            .retrieve("q", &filter, 1.0, Some("T"))
            .await
            .unwrap();

        let calls = index.query_calls();
        assert_eq!(calls[0].filter.doc_id(), Some("F"));
        assert_eq!(calls[1].filter.doc_id(), Some("F"));
        assert!(calls[1].filter.get("file_created_at_unix").is_some());
    }

    #[tokio::test]
    async fn test_target_keeps_other_filter_keys() {
        let filter = QueryFilter::from(
            json!({"file_created_at_unix": {"$gte": 1_700_000_000}})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let index = Arc::new(ScriptedIndex::new().respond(matches(&[("t1", "T")])));

        retriever(index.clone())
            .retrieve("q", &filter, 1.0, Some("T"))
            .await
            .unwrap();

        let primary = &index.query_calls()[0].filter;
        assert_eq!(primary.doc_id(), Some("T"));
        assert!(primary.get("file_created_at_unix").is_some());
        // the caller's filter is left untouched
        assert_eq!(filter.doc_id(), None);
    }

    #[tokio::test]
    async fn test_empty_primary_short_circuits() {
        let index = Arc::new(ScriptedIndex::new());

        let retrieval = retriever(index.clone())
            .retrieve("nothing here", &QueryFilter::new(), 1.0, Some("T"))
            .await
            .unwrap();

        assert!(retrieval.is_empty());
        assert_eq!(index.query_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_index_failure_propagates() {
        let index = Arc::new(ScriptedIndex::new().fail_next_query("connection refused"));

        let err = retriever(index)
            .retrieve("q", &QueryFilter::new(), 1.0, None)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::IndexError { .. }));
        assert!(err.is_retrieval_failure());
    }

    #[tokio::test]
    async fn test_incomplete_match_dropped() {
        let mut broken = chunk_match("x1", "X", "Title X", "", "");
        broken.metadata.remove("content");
        let index = Arc::new(
            ScriptedIndex::new().respond(vec![broken, chunk_match("y1", "Y", "Title Y", "", "")]),
        );

        let retrieval = retriever(index)
            .retrieve("q", &QueryFilter::new(), 1.0, None)
            .await
            .unwrap();

        assert_eq!(retrieval.chunks.len(), 1);
        assert_eq!(retrieval.chunks[0].chunk.id, "y1");
    }
}
