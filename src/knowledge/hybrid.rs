//! 하이브리드 검색 - 벡터 + 렉시컬 RRF 통합
//!
//! 두 레그를 동시에 실행하고 RRF (Reciprocal Rank Fusion)로 합칩니다.
//!
//! score = w / (k + vector_rank) + (1 - w) / (k + lexical_rank)
//!
//! 한쪽 레그에 없는 청크는 그 항이 0입니다 (최하위 순위 패널티 없음).
//! ref: https://www.elastic.co/blog/hybrid-search-rrf

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use super::chunk_store::ChunkStore;
use super::types::{ChunkHit, SearchScope};
use crate::config::{EmbeddingConfig, SearchOptions};
use crate::embedding::TextEmbedder;
use crate::error::{RagError, Result};

// ============================================================================
// Types
// ============================================================================

/// 결과를 찾은 검색 방법
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    /// 벡터 검색만
    Vector,
    /// 렉시컬 검색만
    Lexical,
    /// 두 레그 모두
    Hybrid,
}

/// 융합된 검색 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub token_count: usize,
    /// 문서 범위 검색에서는 생략
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// 여러 지식베이스 검색에서만 설정
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kb_id: Option<String>,
    /// 코사인 유사도 (벡터 레그에 있을 때)
    pub similarity: Option<f32>,
    pub lexical_score: Option<f32>,
    /// 1-based
    pub vector_rank: Option<usize>,
    /// 1-based
    pub lexical_rank: Option<usize>,
    pub combined_score: f32,
    pub search_type: SearchMethod,
}

impl RankedChunk {
    fn best_rank(&self) -> usize {
        self.vector_rank
            .into_iter()
            .chain(self.lexical_rank)
            .min()
            .unwrap_or(usize::MAX)
    }
}

/// 문서별로 묶은 결과 (표시용)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentGroup {
    pub document_id: String,
    pub document_title: Option<String>,
    pub source_url: Option<String>,
    pub max_similarity: f32,
    pub chunks: Vec<RankedChunk>,
}

// ============================================================================
// Fusion
// ============================================================================

/// RRF 통합
///
/// 입력은 각 레그의 정렬된 결과이고, 순위는 위치 + 1입니다.
/// 결과는 combined_score 내림차순, 동점이면 더 좋은 개별 순위, 그다음 chunk_id 순입니다.
pub fn fuse_rankings(
    vector_hits: Vec<ChunkHit>,
    lexical_hits: Vec<ChunkHit>,
    vector_weight: f32,
    rrf_k: f32,
) -> Vec<RankedChunk> {
    let lexical_weight = 1.0 - vector_weight;
    let mut fused: HashMap<String, RankedChunk> = HashMap::new();

    for (i, hit) in vector_hits.into_iter().enumerate() {
        let rank = i + 1;
        let entry = fused
            .entry(hit.chunk_id.clone())
            .or_insert_with(|| unranked(hit.clone()));
        if entry.vector_rank.is_none() {
            entry.vector_rank = Some(rank);
            entry.similarity = Some(hit.score);
            entry.combined_score += vector_weight / (rrf_k + rank as f32);
        }
    }

    for (i, hit) in lexical_hits.into_iter().enumerate() {
        let rank = i + 1;
        let entry = fused
            .entry(hit.chunk_id.clone())
            .or_insert_with(|| unranked(hit.clone()));
        if entry.lexical_rank.is_none() {
            entry.lexical_rank = Some(rank);
            entry.lexical_score = Some(hit.score);
            entry.combined_score += lexical_weight / (rrf_k + rank as f32);
        }
    }

    let mut results: Vec<RankedChunk> = fused
        .into_values()
        .map(|mut r| {
            r.search_type = match (r.vector_rank, r.lexical_rank) {
                (Some(_), Some(_)) => SearchMethod::Hybrid,
                (Some(_), None) => SearchMethod::Vector,
                _ => SearchMethod::Lexical,
            };
            r
        })
        .collect();

    results.sort_by(compare_ranked);
    results
}

fn compare_ranked(a: &RankedChunk, b: &RankedChunk) -> Ordering {
    b.combined_score
        .total_cmp(&a.combined_score)
        .then_with(|| a.best_rank().cmp(&b.best_rank()))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

fn unranked(hit: ChunkHit) -> RankedChunk {
    RankedChunk {
        chunk_id: hit.chunk_id,
        document_id: hit.document_id,
        chunk_index: hit.chunk_index,
        content: hit.content,
        token_count: hit.token_count,
        document_title: hit.document_title,
        source_url: hit.source_url,
        kb_id: Some(hit.kb_id),
        similarity: None,
        lexical_score: None,
        vector_rank: None,
        lexical_rank: None,
        combined_score: 0.0,
        search_type: SearchMethod::Lexical,
    }
}

/// 문서별 그룹화
///
/// 그룹 안의 청크는 원래 순서를 유지하고, 그룹은 최대 유사도 내림차순입니다.
/// 유사도가 없는 (렉시컬 전용) 청크는 0으로 계산합니다.
pub fn group_by_document(results: &[RankedChunk]) -> Vec<DocumentGroup> {
    let mut groups: Vec<DocumentGroup> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for result in results {
        let similarity = result.similarity.unwrap_or(0.0);
        let slot = *index.entry(result.document_id.as_str()).or_insert_with(|| {
            groups.push(DocumentGroup {
                document_id: result.document_id.clone(),
                document_title: result.document_title.clone(),
                source_url: result.source_url.clone(),
                max_similarity: 0.0,
                chunks: Vec::new(),
            });
            groups.len() - 1
        });

        let group = &mut groups[slot];
        group.max_similarity = group.max_similarity.max(similarity);
        group.chunks.push(result.clone());
    }

    groups.sort_by(|a, b| b.max_similarity.total_cmp(&a.max_similarity));
    groups
}

// ============================================================================
// HybridSearchEngine
// ============================================================================

/// 하이브리드 검색 엔진
pub struct HybridSearchEngine {
    store: Arc<dyn ChunkStore>,
}

impl HybridSearchEngine {
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self { store }
    }

    /// 하이브리드 검색 (RRF 통합)
    ///
    /// # Arguments
    /// * `query_text` - 렉시컬 레그 쿼리
    /// * `query_vector` - 벡터 레그 쿼리 임베딩
    /// * `scope` - 지식베이스 하나, 문서 하나, 또는 여러 지식베이스
    ///
    /// # Returns
    /// combined_score 기준 정렬된 결과 (최대 match_count개)
    pub async fn search(
        &self,
        query_text: &str,
        query_vector: &[f32],
        scope: &SearchScope,
        options: &SearchOptions,
    ) -> Result<Vec<RankedChunk>> {
        options.validate()?;
        let query_text = query_text.trim();
        if query_text.is_empty() {
            return Err(RagError::Validation("query is empty".into()));
        }
        if query_vector.is_empty() {
            return Err(RagError::Validation("query vector is empty".into()));
        }

        let candidates = options.candidates();
        let (vector_hits, lexical_hits) = futures::try_join!(
            self.store
                .vector_search(scope, query_vector, options.match_threshold, candidates),
            self.store.lexical_search(scope, query_text, candidates),
        )?;

        let vector_hits: Vec<ChunkHit> = vector_hits
            .into_iter()
            .filter(|h| h.score >= options.match_threshold)
            .take(candidates)
            .collect();
        let lexical_hits: Vec<ChunkHit> = lexical_hits.into_iter().take(candidates).collect();

        tracing::debug!(
            "Hybrid search: {} vector, {} lexical candidates",
            vector_hits.len(),
            lexical_hits.len()
        );

        let mut results = fuse_rankings(
            vector_hits,
            lexical_hits,
            options.vector_weight,
            options.rrf_k,
        );
        results.truncate(options.match_count);

        for result in &mut results {
            match scope {
                SearchScope::Document(_) => {
                    result.document_title = None;
                    result.source_url = None;
                    result.kb_id = None;
                }
                SearchScope::KnowledgeBase(_) => result.kb_id = None,
                SearchScope::KnowledgeBases(_) => {}
            }
        }

        Ok(results)
    }

    /// 쿼리를 임베딩한 뒤 검색
    pub async fn search_text(
        &self,
        embedder: &dyn TextEmbedder,
        config: &EmbeddingConfig,
        query: &str,
        scope: &SearchScope,
        options: &SearchOptions,
    ) -> Result<Vec<RankedChunk>> {
        options.validate()?;
        if query.trim().is_empty() {
            return Err(RagError::Validation("query is empty".into()));
        }

        let query_vector = embedder.embed_one(query, config).await?;
        self.search(query, &query_vector, scope, options).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunk_store::tests::MemoryChunkStore;
    use crate::knowledge::types::{EmbeddingStatus, NewChunk, PendingDocument};
    use async_trait::async_trait;

    fn hit(id: &str, doc: &str, kb: &str, score: f32) -> ChunkHit {
        ChunkHit {
            chunk_id: id.to_string(),
            document_id: doc.to_string(),
            kb_id: kb.to_string(),
            chunk_index: 0,
            content: format!("content {}", id),
            token_count: 2,
            document_title: Some(format!("title {}", doc)),
            source_url: Some(format!("https://example.com/{}", doc)),
            score,
        }
    }

    /// 레그별 결과를 미리 정해 둔 저장소
    struct CannedStore {
        vector: Vec<ChunkHit>,
        lexical: Vec<ChunkHit>,
    }

    #[async_trait]
    impl ChunkStore for CannedStore {
        async fn delete_document_chunks(&self, _document_id: &str) -> Result<usize> {
            Ok(0)
        }

        async fn insert_chunks(&self, chunks: &[NewChunk]) -> Result<usize> {
            Ok(chunks.len())
        }

        async fn vector_search(
            &self,
            _scope: &SearchScope,
            _query_embedding: &[f32],
            _threshold: f32,
            limit: usize,
        ) -> Result<Vec<ChunkHit>> {
            Ok(self.vector.iter().take(limit).cloned().collect())
        }

        async fn lexical_search(
            &self,
            _scope: &SearchScope,
            _query: &str,
            limit: usize,
        ) -> Result<Vec<ChunkHit>> {
            Ok(self.lexical.iter().take(limit).cloned().collect())
        }

        async fn update_document_status(
            &self,
            _document_id: &str,
            _status: EmbeddingStatus,
        ) -> Result<()> {
            Ok(())
        }

        async fn documents_to_embed(&self, _kb_id: &str) -> Result<Vec<PendingDocument>> {
            Ok(vec![])
        }

        async fn knowledge_base_document_ids(&self, _kb_id: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }
    }

    fn engine(vector: Vec<ChunkHit>, lexical: Vec<ChunkHit>) -> HybridSearchEngine {
        HybridSearchEngine::new(Arc::new(CannedStore { vector, lexical }))
    }

    fn ids(results: &[RankedChunk]) -> Vec<&str> {
        results.iter().map(|r| r.chunk_id.as_str()).collect()
    }

    #[test]
    fn test_search_method_serialization() {
        assert_eq!(serde_json::to_string(&SearchMethod::Hybrid).unwrap(), "\"hybrid\"");
        assert_eq!(serde_json::to_string(&SearchMethod::Lexical).unwrap(), "\"lexical\"");
    }

    #[test]
    fn test_rrf_fusion_hand_computed() {
        // vector: A(1), B(2) / lexical: B(1), C(2)
        let results = fuse_rankings(
            vec![hit("A", "d1", "kb", 0.9), hit("B", "d1", "kb", 0.8)],
            vec![hit("B", "d1", "kb", 3.0), hit("C", "d2", "kb", 2.0)],
            0.5,
            60.0,
        );

        assert_eq!(ids(&results), vec!["B", "A", "C"]);

        let b = &results[0];
        assert!((b.combined_score - (0.5 / 62.0 + 0.5 / 61.0)).abs() < 1e-7);
        assert_eq!(b.search_type, SearchMethod::Hybrid);
        assert_eq!((b.vector_rank, b.lexical_rank), (Some(2), Some(1)));

        let a = &results[1];
        assert!((a.combined_score - 0.5 / 61.0).abs() < 1e-7);
        assert_eq!(a.search_type, SearchMethod::Vector);
        assert_eq!(a.lexical_score, None);

        let c = &results[2];
        assert!((c.combined_score - 0.5 / 62.0).abs() < 1e-7);
        assert_eq!(c.search_type, SearchMethod::Lexical);
        assert_eq!(c.similarity, None);
    }

    #[test]
    fn test_rrf_weight_extremes() {
        let vector = vec![hit("A", "d1", "kb", 0.9)];
        let lexical = vec![hit("C", "d1", "kb", 1.0)];

        let all_vector = fuse_rankings(vector.clone(), lexical.clone(), 1.0, 60.0);
        assert_eq!(ids(&all_vector), vec!["A", "C"]);
        assert_eq!(all_vector[1].combined_score, 0.0);

        let all_lexical = fuse_rankings(vector, lexical, 0.0, 60.0);
        assert_eq!(ids(&all_lexical), vec!["C", "A"]);
    }

    #[test]
    fn test_rrf_tie_breaks_by_rank_then_id() {
        // 같은 점수: 벡터 1위 X, 렉시컬 1위 Y
        let results = fuse_rankings(
            vec![hit("Y2", "d", "kb", 0.9), hit("X2", "d", "kb", 0.8)],
            vec![hit("X1", "d", "kb", 1.0)],
            0.5,
            60.0,
        );
        assert_eq!(ids(&results), vec!["X1", "Y2", "X2"]);
    }

    #[tokio::test]
    async fn test_search_truncates_and_strips_kb() {
        let engine = engine(
            vec![hit("A", "d1", "kb", 0.9), hit("B", "d1", "kb", 0.8)],
            vec![hit("B", "d1", "kb", 3.0), hit("C", "d2", "kb", 2.0)],
        );
        let options = SearchOptions::default().with_match_count(2);

        let results = engine
            .search("query", &[1.0], &SearchScope::KnowledgeBase("kb".into()), &options)
            .await
            .unwrap();
        assert_eq!(ids(&results), vec!["B", "A"]);
        assert!(results.iter().all(|r| r.kb_id.is_none()));
        assert!(results[0].document_title.is_some());
    }

    #[tokio::test]
    async fn test_threshold_applies_to_vector_leg_only() {
        let engine = engine(
            vec![hit("A", "d1", "kb", 0.9), hit("LOW", "d1", "kb", 0.2)],
            vec![hit("C", "d2", "kb", 0.01)],
        );
        let options = SearchOptions::default().with_threshold(0.5);

        let results = engine
            .search("query", &[1.0], &SearchScope::KnowledgeBase("kb".into()), &options)
            .await
            .unwrap();

        assert_eq!(ids(&results), vec!["A", "C"]);
        for r in &results {
            if r.search_type == SearchMethod::Vector {
                assert!(r.similarity.unwrap() >= 0.5);
            }
        }
    }

    #[tokio::test]
    async fn test_document_scope_omits_title_and_url() {
        let engine = engine(vec![hit("A", "d1", "kb", 0.9)], vec![]);
        let results = engine
            .search(
                "query",
                &[1.0],
                &SearchScope::Document("d1".into()),
                &SearchOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_title, None);
        assert_eq!(results[0].source_url, None);
    }

    #[tokio::test]
    async fn test_multi_kb_tags_and_pools() {
        let engine = engine(
            vec![hit("A", "d1", "kb1", 0.9), hit("B", "d2", "kb2", 0.85)],
            vec![hit("B", "d2", "kb2", 2.0), hit("A", "d1", "kb1", 1.0)],
        );
        let scope = SearchScope::KnowledgeBases(vec!["kb1".into(), "kb2".into()]);

        let results = engine
            .search("query", &[1.0], &scope, &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        // 두 청크 모두 1위 + 2위 → 같은 점수, 같은 최고 순위
        assert!((results[0].combined_score - results[1].combined_score).abs() < 1e-7);
        assert_eq!(ids(&results), vec!["A", "B"]);
        assert_eq!(results[0].kb_id.as_deref(), Some("kb1"));
        assert_eq!(results[1].kb_id.as_deref(), Some("kb2"));
    }

    #[tokio::test]
    async fn test_empty_legs_yield_empty_results() {
        let engine = engine(vec![], vec![]);
        let results = engine
            .search(
                "nothing",
                &[1.0],
                &SearchScope::KnowledgeBase("kb".into()),
                &SearchOptions::default(),
            )
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_input_rejected() {
        let engine = engine(vec![], vec![]);
        let scope = SearchScope::KnowledgeBase("kb".into());

        let err = engine
            .search("  ", &[1.0], &scope, &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));

        let err = engine
            .search("q", &[], &scope, &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));

        let err = engine
            .search("q", &[1.0], &scope, &SearchOptions::default().with_vector_weight(1.5))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));
    }

    #[tokio::test]
    async fn test_search_text_against_memory_store() {
        use crate::embedding::tests::{fake_vector, FakeEmbedder};

        let store = Arc::new(MemoryChunkStore::default());
        store.add_document("d1", "kb", "");
        store
            .insert_chunks(&[NewChunk {
                document_id: "d1".into(),
                chunk_index: 0,
                content: "tokio runtime".into(),
                content_hash: "h".into(),
                token_count: 4,
                embedding: fake_vector("tokio runtime"),
            }])
            .await
            .unwrap();

        let engine = HybridSearchEngine::new(store);
        let results = engine
            .search_text(
                &FakeEmbedder,
                &EmbeddingConfig::default(),
                "tokio runtime",
                &SearchScope::KnowledgeBase("kb".into()),
                &SearchOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].search_type, SearchMethod::Hybrid);
        assert!((results[0].similarity.unwrap() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_group_by_document() {
        let mut a = unranked(hit("a1", "d1", "kb", 0.0));
        a.similarity = Some(0.6);
        let mut b = unranked(hit("b1", "d2", "kb", 0.0));
        b.similarity = Some(0.9);
        let mut a2 = unranked(hit("a2", "d1", "kb", 0.0));
        a2.similarity = Some(0.7);
        let c = unranked(hit("c1", "d3", "kb", 0.0));

        let groups = group_by_document(&[a, b, a2, c]);
        let docs: Vec<&str> = groups.iter().map(|g| g.document_id.as_str()).collect();
        assert_eq!(docs, vec!["d2", "d1", "d3"]);
        assert!((groups[1].max_similarity - 0.7).abs() < 1e-6);
        assert_eq!(
            groups[1].chunks.iter().map(|c| c.chunk_id.as_str()).collect::<Vec<_>>(),
            vec!["a1", "a2"]
        );
        assert_eq!(groups[2].max_similarity, 0.0);
    }
}
