//! Chunk Store - 검색 엔진/오케스트레이터가 사용하는 저장소 경계
//!
//! `LocalChunkStore`는 청크 텍스트와 문서 상태를 SQLite(`store.rs`)에,
//! 벡터를 `VectorStore`(기본 LanceDB)에 저장합니다.
//! 저장소 내부 에러(anyhow)는 이 경계에서 `RagError::Persistence`로 바뀝니다.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;

use super::lance::LanceVectorStore;
use super::store::{KnowledgeStore, StoredChunk};
use super::types::{ChunkHit, EmbeddingStatus, NewChunk, PendingDocument, SearchScope};
use super::vector::{VectorEntry, VectorStore};
use crate::error::{RagError, Result};

// ============================================================================
// ChunkStore Trait
// ============================================================================

/// 청크 저장소 인터페이스
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// 문서의 청크와 벡터 삭제 (청크가 없어도 성공)
    async fn delete_document_chunks(&self, document_id: &str) -> Result<usize>;

    /// 청크 + 벡터 일괄 저장
    async fn insert_chunks(&self, chunks: &[NewChunk]) -> Result<usize>;

    /// 유사도가 `threshold` 이상인 청크, 유사도 내림차순
    async fn vector_search(
        &self,
        scope: &SearchScope,
        query_embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ChunkHit>>;

    /// 렉시컬 관련도 내림차순
    async fn lexical_search(
        &self,
        scope: &SearchScope,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ChunkHit>>;

    async fn update_document_status(&self, document_id: &str, status: EmbeddingStatus)
        -> Result<()>;

    /// pending / outdated / failed 상태 문서 (생성 순)
    async fn documents_to_embed(&self, kb_id: &str) -> Result<Vec<PendingDocument>>;

    async fn knowledge_base_document_ids(&self, kb_id: &str) -> Result<Vec<String>>;

    async fn delete_chunks_for_documents(&self, document_ids: &[String]) -> Result<usize> {
        let mut deleted = 0;
        for id in document_ids {
            deleted += self.delete_document_chunks(id).await?;
        }
        Ok(deleted)
    }

    async fn update_status_for_documents(
        &self,
        document_ids: &[String],
        status: EmbeddingStatus,
    ) -> Result<()> {
        for id in document_ids {
            self.update_document_status(id, status).await?;
        }
        Ok(())
    }
}

// ============================================================================
// LocalChunkStore
// ============================================================================

/// SQLite + 벡터 인덱스 조합 저장소
pub struct LocalChunkStore {
    store: Arc<KnowledgeStore>,
    vectors: Arc<dyn VectorStore>,
}

impl LocalChunkStore {
    pub fn new(store: Arc<KnowledgeStore>, vectors: Arc<dyn VectorStore>) -> Self {
        Self { store, vectors }
    }

    /// 데이터 디렉토리에서 열기 (knowledge.db + vectors.lance)
    pub async fn open(data_dir: &Path) -> anyhow::Result<Self> {
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir).context("Failed to create data directory")?;
        }

        let store = KnowledgeStore::open(&data_dir.join("knowledge.db"))
            .context("Failed to open knowledge store")?;
        let vectors = LanceVectorStore::open(&data_dir.join("vectors.lance"))
            .await
            .context("Failed to open vector store")?;

        Ok(Self::new(Arc::new(store), Arc::new(vectors)))
    }

    /// 문서 저장소 (수집/통계용)
    pub fn knowledge(&self) -> &KnowledgeStore {
        &self.store
    }

    /// 벡터 인덱스에 저장된 전체 벡터 수
    pub async fn vector_count(&self) -> Result<usize> {
        self.vectors.count().await.map_err(RagError::persistence)
    }

    /// SQLite에 들어간 청크를 되돌림 (벡터 저장 실패 시)
    fn rollback_chunks(&self, document_ids: &[String]) {
        for id in document_ids {
            if let Err(e) = self.store.delete_chunks(id) {
                tracing::warn!("Failed to roll back chunks of document {}: {:#}", id, e);
            }
        }
    }
}

fn distinct_documents(chunks: &[NewChunk]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for chunk in chunks {
        if !ids.contains(&chunk.document_id) {
            ids.push(chunk.document_id.clone());
        }
    }
    ids
}

#[async_trait]
impl ChunkStore for LocalChunkStore {
    /// SQLite 청크를 먼저 지움 (남은 벡터는 검색 시 고아로 건너뜀)
    async fn delete_document_chunks(&self, document_id: &str) -> Result<usize> {
        let deleted = self
            .store
            .delete_chunks(document_id)
            .map_err(RagError::persistence)?;
        self.vectors
            .delete_by_document(document_id)
            .await
            .map_err(RagError::persistence)?;
        Ok(deleted)
    }

    async fn insert_chunks(&self, chunks: &[NewChunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let document_ids = distinct_documents(chunks);
        let kb_ids = self
            .store
            .kb_ids_for_documents(&document_ids)
            .map_err(RagError::persistence)?;

        let mut rows = Vec::with_capacity(chunks.len());
        let mut entries = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let kb_id = kb_ids.get(&chunk.document_id).ok_or_else(|| {
                RagError::Persistence(format!("unknown document: {}", chunk.document_id))
            })?;
            let chunk_index = i32::try_from(chunk.chunk_index).map_err(|_| {
                RagError::Persistence(format!("chunk index too large: {}", chunk.chunk_index))
            })?;
            let id = uuid::Uuid::new_v4().to_string();

            rows.push(StoredChunk {
                id: id.clone(),
                document_id: chunk.document_id.clone(),
                chunk_index: chunk.chunk_index,
                content: chunk.content.clone(),
                content_hash: chunk.content_hash.clone(),
                token_count: chunk.token_count,
            });
            entries.push(VectorEntry {
                chunk_id: id,
                document_id: chunk.document_id.clone(),
                kb_id: kb_id.clone(),
                chunk_index,
                embedding: chunk.embedding.clone(),
            });
        }

        let inserted = self
            .store
            .insert_chunks(&rows)
            .map_err(RagError::persistence)?;

        if let Err(e) = self.vectors.insert_batch(&entries).await {
            self.rollback_chunks(&document_ids);
            return Err(RagError::persistence(e.context("Failed to store chunk vectors")));
        }

        tracing::debug!("Stored {} chunks for {} documents", inserted, document_ids.len());
        Ok(inserted)
    }

    async fn vector_search(
        &self,
        scope: &SearchScope,
        query_embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        let hits = self
            .vectors
            .search(query_embedding, scope, limit)
            .await
            .map_err(RagError::persistence)?;

        let hits: Vec<_> = hits
            .into_iter()
            .filter(|h| h.similarity >= threshold)
            .collect();
        if hits.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<String> = hits.iter().map(|h| h.chunk_id.clone()).collect();
        let mut rows = self
            .store
            .chunks_by_ids(&ids)
            .map_err(RagError::persistence)?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            match rows.remove(&hit.chunk_id) {
                Some(mut row) => {
                    row.score = hit.similarity;
                    results.push(row);
                }
                None => tracing::debug!("Skipping orphan vector {}", hit.chunk_id),
            }
        }
        Ok(results)
    }

    async fn lexical_search(
        &self,
        scope: &SearchScope,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        self.store
            .search_lexical(scope, query, limit)
            .map_err(RagError::persistence)
    }

    async fn update_document_status(
        &self,
        document_id: &str,
        status: EmbeddingStatus,
    ) -> Result<()> {
        let updated = self
            .store
            .set_status(document_id, status)
            .map_err(RagError::persistence)?;
        if !updated {
            return Err(RagError::Persistence(format!("unknown document: {}", document_id)));
        }
        Ok(())
    }

    async fn documents_to_embed(&self, kb_id: &str) -> Result<Vec<PendingDocument>> {
        let docs = self
            .store
            .documents_with_status(kb_id, &EmbeddingStatus::NEEDS_EMBEDDING)
            .map_err(RagError::persistence)?;

        Ok(docs
            .into_iter()
            .map(|d| PendingDocument {
                id: d.id,
                content: d.content,
            })
            .collect())
    }

    async fn knowledge_base_document_ids(&self, kb_id: &str) -> Result<Vec<String>> {
        self.store.document_ids(kb_id).map_err(RagError::persistence)
    }

    async fn delete_chunks_for_documents(&self, document_ids: &[String]) -> Result<usize> {
        let mut deleted = 0;
        for id in document_ids {
            deleted += self.store.delete_chunks(id).map_err(RagError::persistence)?;
        }

        self.vectors
            .delete_by_documents(document_ids)
            .await
            .map_err(RagError::persistence)?;
        Ok(deleted)
    }

    async fn update_status_for_documents(
        &self,
        document_ids: &[String],
        status: EmbeddingStatus,
    ) -> Result<()> {
        self.store
            .set_status_for_documents(document_ids, status)
            .map_err(RagError::persistence)?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
