//! Embedding Orchestrator - 청킹 → 임베딩 → 저장 파이프라인
//!
//! 문서별 임베딩 상태를 관리합니다.
//! pending → processing → completed, 오류 시 failed.
//! 재임베딩은 항상 문서 단위로 전부 지우고 다시 만듭니다.

use std::sync::Arc;

use serde::Serialize;

use super::chunk_store::ChunkStore;
use super::chunker::{ChunkConfig, Chunker, SeparatorChunker};
use super::types::{EmbeddingStatus, NewChunk};
use crate::config::EmbeddingConfig;
use crate::embedding::TextEmbedder;
use crate::error::{RagError, Result};

/// 지식베이스 배치 임베딩 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    /// 성공한 문서 수
    pub processed: usize,
    pub failed: usize,
    /// (문서 ID, 에러 메시지)
    pub failures: Vec<(String, String)>,
}

/// 임베딩 오케스트레이터
pub struct EmbeddingOrchestrator {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn TextEmbedder>,
}

impl EmbeddingOrchestrator {
    pub fn new(store: Arc<dyn ChunkStore>, embedder: Arc<dyn TextEmbedder>) -> Self {
        Self { store, embedder }
    }

    /// 문서 하나 임베딩
    ///
    /// 실패하면 문서를 failed로 표시하고 (best-effort) 원래 에러를 반환합니다.
    ///
    /// # Returns
    /// 저장된 청크 수 (빈 문서는 0)
    pub async fn embed_document(
        &self,
        document_id: &str,
        content: &str,
        config: &EmbeddingConfig,
    ) -> Result<usize> {
        config.validate()?;

        match self.run_document(document_id, content, config).await {
            Ok(count) => {
                tracing::info!("Embedded document {} ({} chunks)", document_id, count);
                Ok(count)
            }
            Err(err) => {
                if let Err(status_err) = self
                    .store
                    .update_document_status(document_id, EmbeddingStatus::Failed)
                    .await
                {
                    tracing::warn!(
                        "Could not mark document {} as failed: {}",
                        document_id,
                        status_err
                    );
                }
                tracing::warn!("Embedding failed for document {}: {}", document_id, err);
                Err(err)
            }
        }
    }

    async fn run_document(
        &self,
        document_id: &str,
        content: &str,
        config: &EmbeddingConfig,
    ) -> Result<usize> {
        self.store
            .update_document_status(document_id, EmbeddingStatus::Processing)
            .await?;
        self.store.delete_document_chunks(document_id).await?;

        let chunks = SeparatorChunker::new(ChunkConfig::from(config)).chunk(content);
        if chunks.is_empty() {
            self.store
                .update_document_status(document_id, EmbeddingStatus::Completed)
                .await?;
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embedder.embed(&texts, config).await?;
        if embeddings.len() != chunks.len() {
            return Err(RagError::provider(
                "embedding",
                0,
                format!("expected {} embeddings, got {}", chunks.len(), embeddings.len()),
            ));
        }

        let records: Vec<NewChunk> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(chunk_index, (chunk, embedding))| NewChunk {
                document_id: document_id.to_string(),
                chunk_index,
                content: chunk.content,
                content_hash: chunk.content_hash,
                token_count: chunk.token_count,
                embedding,
            })
            .collect();

        let count = self.store.insert_chunks(&records).await?;
        self.store
            .update_document_status(document_id, EmbeddingStatus::Completed)
            .await?;
        Ok(count)
    }

    /// 지식베이스의 pending / outdated / failed 문서를 순차 임베딩
    ///
    /// 문서 하나가 실패해도 나머지는 계속 처리합니다.
    /// `on_progress(완료 수, 전체 수)`는 문서마다 성공/실패와 무관하게 호출됩니다.
    pub async fn embed_knowledge_base<F>(
        &self,
        kb_id: &str,
        config: &EmbeddingConfig,
        mut on_progress: F,
    ) -> Result<BatchReport>
    where
        F: FnMut(usize, usize) + Send,
    {
        config.validate()?;

        let documents = self.store.documents_to_embed(kb_id).await?;
        let mut report = BatchReport {
            total: documents.len(),
            ..BatchReport::default()
        };

        for doc in documents {
            match self.embed_document(&doc.id, &doc.content, config).await {
                Ok(_) => report.processed += 1,
                Err(err) => {
                    report.failed += 1;
                    report.failures.push((doc.id.clone(), err.to_string()));
                }
            }
            on_progress(report.processed + report.failed, report.total);
        }

        tracing::info!(
            "Knowledge base {}: {} embedded, {} failed",
            kb_id,
            report.processed,
            report.failed
        );
        Ok(report)
    }

    /// 문서의 임베딩 삭제 (상태 → pending)
    pub async fn delete_document_embeddings(&self, document_id: &str) -> Result<usize> {
        let deleted = self.store.delete_document_chunks(document_id).await?;
        self.store
            .update_document_status(document_id, EmbeddingStatus::Pending)
            .await?;
        Ok(deleted)
    }

    /// 지식베이스의 모든 임베딩 삭제 (상태 → pending)
    ///
    /// # Returns
    /// 초기화된 문서 수
    pub async fn delete_knowledge_base_embeddings(&self, kb_id: &str) -> Result<usize> {
        let ids = self.store.knowledge_base_document_ids(kb_id).await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let deleted = self.store.delete_chunks_for_documents(&ids).await?;
        self.store
            .update_status_for_documents(&ids, EmbeddingStatus::Pending)
            .await?;

        tracing::info!(
            "Reset embeddings of {} documents in {} ({} chunks removed)",
            ids.len(),
            kb_id,
            deleted
        );
        Ok(ids.len())
    }
}

// ============================================================================
// Tests
// ============================================================================
