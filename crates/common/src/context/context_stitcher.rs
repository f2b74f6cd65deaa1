//! Context Stitcher - Expands retrieved chunks with their neighbors
//!
//! Provides:
//! - One batched neighbor fetch per primary chunk
//! - Character windows over previous/next chunk content
//! - Citation-tagged context blocks

use super::chunk::{record_content, Chunk, ChunkOrigin, RetrievedChunk};
use super::sources::SourceRegistry;
use super::with_timeout;
use crate::errors::Result;
use crate::index::VectorIndex;
use crate::metrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Builds `[id] title` context blocks from retrieved chunks
pub struct ContextStitcher {
    index: Arc<dyn VectorIndex>,
    window_chars: usize,
    fetch_timeout: Duration,
}

impl ContextStitcher {
    /// Create a new context stitcher
    pub fn new(index: Arc<dyn VectorIndex>, window_chars: usize, fetch_timeout: Duration) -> Self {
        Self {
            index,
            window_chars,
            fetch_timeout,
        }
    }

    /// Format every chunk as a context block, registering its document in
    /// `sources` in chunk order.
    ///
    /// Primary chunks are framed by the last `window_chars` characters of
    /// the previous chunk and the first `window_chars` of the next one.
    /// Neighbors missing from the index contribute empty text. Supplementary
    /// chunks are included bare.
    pub async fn stitch(
        &self,
        chunks: &[RetrievedChunk],
        sources: &mut SourceRegistry,
    ) -> Result<Vec<String>> {
        let mut blocks = Vec::with_capacity(chunks.len());

        for retrieved in chunks {
            let chunk = &retrieved.chunk;
            let block = match retrieved.origin {
                ChunkOrigin::Primary => {
                    let (previous, next) = self.neighbors(chunk).await?;
                    let source_id =
                        sources.register(&chunk.document_title, &chunk.web_url, &chunk.created_at);
                    format!(
                        "[{}] {}\n\n{}\n{}\n{}",
                        source_id,
                        chunk.document_title,
                        tail_chars(&previous, self.window_chars),
                        chunk.content,
                        head_chars(&next, self.window_chars)
                    )
                }
                ChunkOrigin::Supplementary => {
                    let source_id =
                        sources.register(&chunk.document_title, &chunk.web_url, &chunk.created_at);
                    format!("[{}] {}\n\n{}", source_id, chunk.document_title, chunk.content)
                }
            };
            blocks.push(block);
        }

        debug!(blocks = blocks.len(), sources = sources.len(), "Context stitched");
        Ok(blocks)
    }

    /// Content of the previous and next chunk, empty where absent
    async fn neighbors(&self, chunk: &Chunk) -> Result<(String, String)> {
        let ids = chunk.neighbor_ids();
        if ids.is_empty() {
            return Ok((String::new(), String::new()));
        }

        let records = with_timeout("neighbor fetch", self.fetch_timeout, self.index.fetch(&ids)).await?;
        metrics::record_neighbor_fetch(records.len(), ids.len());

        let content_of = |id: &Option<String>| {
            id.as_ref()
                .and_then(|id| records.get(id))
                .map(|record| record_content(&record.metadata).to_string())
                .unwrap_or_default()
        };

        Ok((content_of(&chunk.prechunk_id), content_of(&chunk.postchunk_id)))
    }
}

/// Last `n` characters of `text`
fn tail_chars(text: &str, n: usize) -> &str {
    let count = text.chars().count();
    if count <= n {
        return text;
    }
    text.char_indices()
        .nth(count - n)
        .map(|(at, _)| &text[at..])
        .unwrap_or(text)
}

/// First `n` characters of `text`
fn head_chars(text: &str, n: usize) -> &str {
    text.char_indices()
        .nth(n)
        .map(|(at, _)| &text[..at])
        .unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::index::testing::{chunk_match, ScriptedIndex};

    fn stitcher(index: Arc<ScriptedIndex>) -> ContextStitcher {
        ContextStitcher::new(index, 400, Duration::from_secs(5))
    }

    fn retrieved(id: &str, doc: &str, title: &str, pre: &str, post: &str, origin: ChunkOrigin) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk::from_match(&chunk_match(id, doc, title, pre, post)).unwrap(),
            origin,
        }
    }

    #[test]
    fn test_char_windows() {
        let long: String = "a".repeat(600) + &"b".repeat(400);
        assert_eq!(tail_chars(&long, 400), "b".repeat(400));
        assert_eq!(head_chars(&long, 400), "a".repeat(400));
        assert_eq!(tail_chars("short", 400), "short");
        assert_eq!(head_chars("short", 400), "short");
        assert_eq!(tail_chars("", 400), "");
        // multi-byte characters count once
        assert_eq!(tail_chars("héllo wörld", 5), "wörld");
        assert_eq!(head_chars("héllo wörld", 2), "hé");
    }

    #[tokio::test]
    async fn test_neighbors_truncated_exactly() {
        let previous = format!("{}{}", "p".repeat(600), "q".repeat(400));
        let next = "n".repeat(100);
        let index = Arc::new(
            ScriptedIndex::new()
                .with_record("c#0", &previous)
                .with_record("c#2", &next),
        );
        let chunks = vec![retrieved("c#1", "C", "Credit Outlook", "c#0", "c#2", ChunkOrigin::Primary)];

        let mut sources = SourceRegistry::new();
        let blocks = stitcher(index.clone()).stitch(&chunks, &mut sources).await.unwrap();

        assert_eq!(
            blocks[0],
            format!("[1] Credit Outlook\n\n{}\ncontent of c#1\n{}", "q".repeat(400), next)
        );
        assert_eq!(index.fetch_calls(), vec![vec!["c#0".to_string(), "c#2".to_string()]]);
    }

    #[tokio::test]
    async fn test_missing_neighbors_yield_empty_text() {
        let index = Arc::new(ScriptedIndex::new());
        let chunks = vec![retrieved("c#1", "C", "Credit Outlook", "c#0", "c#2", ChunkOrigin::Primary)];

        let mut sources = SourceRegistry::new();
        let blocks = stitcher(index).stitch(&chunks, &mut sources).await.unwrap();

        assert_eq!(blocks[0], "[1] Credit Outlook\n\n\ncontent of c#1\n");
    }

    #[tokio::test]
    async fn test_no_fetch_without_neighbors() {
        let index = Arc::new(ScriptedIndex::new());
        let chunks = vec![
            retrieved("solo", "S", "One Pager", "", "", ChunkOrigin::Primary),
            retrieved("extra", "S", "One Pager", "x", "y", ChunkOrigin::Supplementary),
        ];

        let mut sources = SourceRegistry::new();
        let blocks = stitcher(index.clone()).stitch(&chunks, &mut sources).await.unwrap();

        assert!(index.fetch_calls().is_empty());
        assert_eq!(blocks[1], "[1] One Pager\n\ncontent of extra");
    }

    #[tokio::test]
    async fn test_citations_follow_first_appearance() {
        let index = Arc::new(ScriptedIndex::new());
        let chunks = vec![
            retrieved("x1", "X", "Doc X", "", "", ChunkOrigin::Primary),
            retrieved("y1", "Y", "Doc Y", "", "", ChunkOrigin::Primary),
            retrieved("x2", "X", "Doc X", "", "", ChunkOrigin::Primary),
            retrieved("z1", "Z", "Doc Z", "", "", ChunkOrigin::Supplementary),
        ];

        let mut sources = SourceRegistry::new();
        let blocks = stitcher(index).stitch(&chunks, &mut sources).await.unwrap();

        let tags: Vec<&str> = blocks.iter().map(|b| b.split(' ').next().unwrap()).collect();
        assert_eq!(tags, vec!["[1]", "[2]", "[1]", "[3]"]);
        let titles: Vec<String> = sources.into_sources().into_iter().map(|s| s.title).collect();
        assert_eq!(titles, vec!["Doc X", "Doc Y", "Doc Z"]);
    }

    #[tokio::test]
    async fn test_fetch_failure_propagates() {
        let index = Arc::new(ScriptedIndex::new().fail_fetches());
        let chunks = vec![retrieved("c#1", "C", "Credit Outlook", "c#0", "", ChunkOrigin::Primary)];

        let mut sources = SourceRegistry::new();
        let err = stitcher(index).stitch(&chunks, &mut sources).await.unwrap_err();
        assert!(matches!(err, AppError::IndexError { .. }));
    }
}
