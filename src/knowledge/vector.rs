//! Vector Store - 벡터 인덱스 트레이트
//!
//! 구현은 LanceDB(`lance.rs`)입니다. 테스트용 메모리 구현은 `tests` 모듈에 있습니다.

use anyhow::Result;
use async_trait::async_trait;

use super::types::SearchScope;

// ============================================================================
// Types
// ============================================================================

/// 벡터 엔트리 (저장용)
#[derive(Debug, Clone)]
pub struct VectorEntry {
    /// 청크 ID (document_chunks.id)
    pub chunk_id: String,
    pub document_id: String,
    /// 범위 필터용 지식베이스 ID
    pub kb_id: String,
    /// 청크 인덱스 (0-based)
    pub chunk_index: i32,
    pub embedding: Vec<f32>,
}

/// 벡터 검색 결과
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub chunk_id: String,
    pub document_id: String,
    /// 코사인 유사도 (-1.0 ~ 1.0)
    pub similarity: f32,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 벡터 배치 삽입
    async fn insert_batch(&self, entries: &[VectorEntry]) -> Result<usize>;

    /// 범위 내 코사인 유사도 상위 `limit`개 (유사도 내림차순)
    async fn search(
        &self,
        query_embedding: &[f32],
        scope: &SearchScope,
        limit: usize,
    ) -> Result<Vec<VectorHit>>;

    /// 문서의 벡터 삭제
    async fn delete_by_document(&self, document_id: &str) -> Result<usize>;

    /// 여러 문서의 벡터 삭제
    async fn delete_by_documents(&self, document_ids: &[String]) -> Result<usize> {
        let mut deleted = 0;
        for id in document_ids {
            deleted += self.delete_by_document(id).await?;
        }
        Ok(deleted)
    }

    /// 벡터 개수 조회
    async fn count(&self) -> Result<usize>;
}

// ============================================================================
// Tests
// ============================================================================
