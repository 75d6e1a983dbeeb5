//! Reranker - 융합 결과 2차 정렬
//!
//! 후보가 top_k 이하이고 자격 증명이 없으면 그대로 반환합니다.
//! 자격 증명이 없거나 `local-bge`면 pass-through (기존 점수 재사용, top_k로 자름).

mod remote;

pub use remote::{RemoteReranker, RerankApi};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{RerankProviderKind, RerankerConfig};
use crate::error::{RagError, Result};
use crate::knowledge::RankedChunk;

// ============================================================================
// Types
// ============================================================================

/// 리랭킹 옵션
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RerankOptions {
    pub top_k: usize,
    /// true면 결과를 원래 후보 순서로 다시 정렬
    pub return_original_order: bool,
}

impl Default for RerankOptions {
    fn default() -> Self {
        Self {
            top_k: 20,
            return_original_order: false,
        }
    }
}

/// 리랭킹 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RerankResult {
    pub chunk: RankedChunk,
    pub relevance_score: f32,
    /// 입력 후보 목록에서의 위치 (0-based)
    pub original_rank: usize,
    /// 리랭킹 후 위치 (0-based)
    pub new_rank: usize,
}

/// 프로바이더가 돌려주는 (입력 위치, 관련도)
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RerankScore {
    pub index: usize,
    pub relevance_score: f32,
}

// ============================================================================
// Backend
// ============================================================================

/// 리랭킹 백엔드 공통 인터페이스
#[async_trait]
pub trait RerankBackend: Send + Sync {
    /// 관련도 내림차순 (index, score) 목록, 최대 top_k개
    async fn score(&self, query: &str, documents: &[String], top_k: usize)
        -> Result<Vec<RerankScore>>;

    fn name(&self) -> &str;
}

/// 설정으로 선택되는 리랭커
pub enum RerankProvider {
    Remote(RemoteReranker),
    /// 기존 융합 점수 재사용
    Passthrough,
}

impl RerankProvider {
    pub fn from_config(config: &RerankerConfig, http: reqwest::Client) -> Self {
        let api = match config.provider {
            RerankProviderKind::Cohere => RerankApi::Cohere,
            RerankProviderKind::Jina => RerankApi::Jina,
            RerankProviderKind::Voyage => RerankApi::Voyage,
            RerankProviderKind::LocalBge => return Self::Passthrough,
        };

        match config.credential() {
            Some(key) => Self::Remote(RemoteReranker::new(
                http,
                api,
                key,
                config.model.as_deref(),
                config.base_url.as_deref(),
            )),
            None => Self::Passthrough,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Remote(r) => r.name(),
            Self::Passthrough => "passthrough",
        }
    }
}

/// 후보 그대로 (점수 재사용), top_k개
fn passthrough(candidates: Vec<RankedChunk>, top_k: usize) -> Vec<RerankResult> {
    candidates
        .into_iter()
        .take(top_k)
        .enumerate()
        .map(|(rank, chunk)| RerankResult {
            relevance_score: chunk.combined_score,
            chunk,
            original_rank: rank,
            new_rank: rank,
        })
        .collect()
}

/// 백엔드 점수를 후보에 매핑
///
/// 범위를 벗어나거나 중복된 index는 프로바이더 에러입니다.
/// `return_original_order`면 관련도 점수를 유지한 채 입력 순서로 돌려줍니다.
pub async fn rerank_with<B: RerankBackend + ?Sized>(
    backend: &B,
    query: &str,
    candidates: Vec<RankedChunk>,
    options: &RerankOptions,
) -> Result<Vec<RerankResult>> {
    let top_k = options.top_k;
    let documents: Vec<String> = candidates.iter().map(|c| c.content.clone()).collect();
    let scores = backend.score(query, &documents, top_k).await?;

    let total = candidates.len();
    let mut slots: Vec<Option<RankedChunk>> = candidates.into_iter().map(Some).collect();
    let mut results = Vec::with_capacity(scores.len().min(top_k));

    for (new_rank, score) in scores.into_iter().take(top_k).enumerate() {
        let chunk = slots
            .get_mut(score.index)
            .and_then(Option::take)
            .ok_or_else(|| {
                RagError::provider(
                    backend.name(),
                    200,
                    format!("invalid result index {} for {} documents", score.index, total),
                )
            })?;

        results.push(RerankResult {
            chunk,
            relevance_score: score.relevance_score,
            original_rank: score.index,
            new_rank,
        });
    }

    if options.return_original_order {
        results.sort_by_key(|r| r.original_rank);
    }
    Ok(results)
}

// ============================================================================
// Reranker
// ============================================================================

/// HTTP 리랭커
#[derive(Clone)]
pub struct Reranker {
    http: reqwest::Client,
}

impl Reranker {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: crate::http::build_client()?,
        })
    }

    pub fn with_http(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// 후보 리랭킹
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<RankedChunk>,
        config: &RerankerConfig,
        options: &RerankOptions,
    ) -> Result<Vec<RerankResult>> {
        if options.top_k == 0 {
            return Err(RagError::Validation("topK must be at least 1".into()));
        }
        if query.trim().is_empty() {
            return Err(RagError::Validation("query is empty".into()));
        }
        if candidates.is_empty() {
            return Ok(vec![]);
        }

        if candidates.len() <= options.top_k && config.credential().is_none() {
            return Ok(passthrough(candidates, options.top_k));
        }

        let provider = RerankProvider::from_config(config, self.http.clone());
        tracing::debug!(
            "Reranking {} candidates with {}",
            candidates.len(),
            provider.name()
        );

        match &provider {
            RerankProvider::Remote(backend) => rerank_with(backend, query, candidates, options).await,
            // 입력 순서 그대로이므로 원래 순서 정렬이 필요 없음
            RerankProvider::Passthrough => Ok(passthrough(candidates, options.top_k)),
        }
    }
}

/// 검색 결과에 리랭킹 적용
///
/// 설정이나 자격 증명이 없으면 top_k개로 자르기만 합니다.
/// 리랭킹하면 combined_score를 관련도 점수로 바꿉니다.
pub async fn apply_reranking(
    reranker: &Reranker,
    results: Vec<RankedChunk>,
    query: &str,
    config: Option<&RerankerConfig>,
    top_k: usize,
) -> Result<Vec<RankedChunk>> {
    let Some(config) = config.filter(|c| c.credential().is_some()) else {
        return Ok(results.into_iter().take(top_k).collect());
    };

    let options = RerankOptions {
        top_k,
        return_original_order: false,
    };
    let reranked = reranker.rerank(query, results, config, &options).await?;

    Ok(reranked
        .into_iter()
        .map(|r| RankedChunk {
            combined_score: r.relevance_score,
            ..r.chunk
        })
        .collect())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::SearchMethod;

    fn chunk(id: &str, score: f32) -> RankedChunk {
        RankedChunk {
            chunk_id: id.to_string(),
            document_id: "d".to_string(),
            chunk_index: 0,
            content: format!("text {}", id),
            token_count: 2,
            document_title: None,
            source_url: None,
            kb_id: None,
            similarity: Some(score),
            lexical_score: None,
            vector_rank: Some(1),
            lexical_rank: None,
            combined_score: score,
            search_type: SearchMethod::Vector,
        }
    }

    fn candidates(n: usize) -> Vec<RankedChunk> {
        (0..n).map(|i| chunk(&format!("c{}", i), 1.0 - i as f32 * 0.1)).collect()
    }

    /// 입력 역순으로 점수를 매기는 백엔드
    struct ReverseBackend;

    #[async_trait]
    impl RerankBackend for ReverseBackend {
        async fn score(
            &self,
            _query: &str,
            documents: &[String],
            top_k: usize,
        ) -> Result<Vec<RerankScore>> {
            Ok((0..documents.len())
                .rev()
                .take(top_k)
                .map(|index| RerankScore {
                    index,
                    relevance_score: index as f32,
                })
                .collect())
        }

        fn name(&self) -> &str {
            "reverse"
        }
    }

    /// 존재하지 않는 index를 돌려주는 백엔드
    struct BadIndexBackend;

    #[async_trait]
    impl RerankBackend for BadIndexBackend {
        async fn score(&self, _q: &str, documents: &[String], _k: usize) -> Result<Vec<RerankScore>> {
            Ok(vec![RerankScore {
                index: documents.len(),
                relevance_score: 1.0,
            }])
        }

        fn name(&self) -> &str {
            "bad"
        }
    }

    fn no_key(provider: RerankProviderKind) -> RerankerConfig {
        RerankerConfig::new(provider, "")
    }

    #[tokio::test]
    async fn test_short_circuit_without_credential() {
        let input = candidates(3);
        let results = Reranker::with_http(reqwest::Client::new())
            .rerank(
                "q",
                input.clone(),
                &no_key(RerankProviderKind::Cohere),
                &RerankOptions { top_k: 3, return_original_order: false },
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.chunk, input[i]);
            assert_eq!(r.relevance_score, input[i].combined_score);
            assert_eq!((r.original_rank, r.new_rank), (i, i));
        }
    }

    #[tokio::test]
    async fn test_passthrough_truncates_when_over_top_k() {
        let results = Reranker::with_http(reqwest::Client::new())
            .rerank(
                "q",
                candidates(5),
                &RerankerConfig::new(RerankProviderKind::Jina, "********"),
                &RerankOptions { top_k: 2, return_original_order: false },
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[1].chunk.chunk_id, "c1");
    }

    #[tokio::test]
    async fn test_local_bge_is_passthrough_even_with_key() {
        let config = RerankerConfig::new(RerankProviderKind::LocalBge, "secret");
        assert!(matches!(
            RerankProvider::from_config(&config, reqwest::Client::new()),
            RerankProvider::Passthrough
        ));

        let results = Reranker::with_http(reqwest::Client::new())
            .rerank("q", candidates(4), &config, &RerankOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 4);
    }

    #[test]
    fn test_provider_selection() {
        let config = RerankerConfig::new(RerankProviderKind::Voyage, "key");
        match RerankProvider::from_config(&config, reqwest::Client::new()) {
            RerankProvider::Remote(r) => assert_eq!(r.api(), RerankApi::Voyage),
            RerankProvider::Passthrough => panic!("expected remote reranker"),
        }
    }

    fn top(top_k: usize, return_original_order: bool) -> RerankOptions {
        RerankOptions {
            top_k,
            return_original_order,
        }
    }

    #[tokio::test]
    async fn test_rerank_with_backend_reorders() {
        let results = rerank_with(&ReverseBackend, "q", candidates(4), &top(3, false))
            .await
            .unwrap();

        assert_eq!(
            results.iter().map(|r| r.chunk.chunk_id.as_str()).collect::<Vec<_>>(),
            vec!["c3", "c2", "c1"]
        );
        assert_eq!(results[0].original_rank, 3);
        assert_eq!(results[0].new_rank, 0);
        assert_eq!(results[0].relevance_score, 3.0);
    }

    #[tokio::test]
    async fn test_return_original_order_keeps_scores() {
        let results = rerank_with(&ReverseBackend, "q", candidates(4), &top(3, true))
            .await
            .unwrap();

        assert_eq!(
            results.iter().map(|r| r.chunk.chunk_id.as_str()).collect::<Vec<_>>(),
            vec!["c1", "c2", "c3"]
        );
        assert_eq!(
            results.iter().map(|r| r.original_rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        // 관련도와 리랭킹 순위는 그대로
        assert_eq!(
            results.iter().map(|r| r.relevance_score).collect::<Vec<_>>(),
            vec![1.0, 2.0, 3.0]
        );
        assert_eq!(
            results.iter().map(|r| r.new_rank).collect::<Vec<_>>(),
            vec![2, 1, 0]
        );
    }

    #[tokio::test]
    async fn test_invalid_index_is_provider_error() {
        let err = rerank_with(&BadIndexBackend, "q", candidates(2), &top(2, false))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Provider { .. }));
    }

    #[tokio::test]
    async fn test_validation() {
        let reranker = Reranker::with_http(reqwest::Client::new());
        let config = no_key(RerankProviderKind::Cohere);

        let err = reranker
            .rerank("q", candidates(1), &config, &RerankOptions { top_k: 0, return_original_order: false })
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));

        assert!(reranker
            .rerank("q", vec![], &config, &RerankOptions::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_apply_reranking_without_config_truncates() {
        let reranker = Reranker::with_http(reqwest::Client::new());
        let input = candidates(5);

        let out = apply_reranking(&reranker, input.clone(), "q", None, 3).await.unwrap();
        assert_eq!(out, input[..3].to_vec());

        let keyless = no_key(RerankProviderKind::Cohere);
        let out = apply_reranking(&reranker, input.clone(), "q", Some(&keyless), 2)
            .await
            .unwrap();
        assert_eq!(out, input[..2].to_vec());
    }
}
