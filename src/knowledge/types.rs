//! 지식 저장소 공통 타입

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Embedding Status
// ============================================================================

/// 문서 임베딩 상태
///
/// pending → processing → completed, processing → failed,
/// completed/failed → pending (콘텐츠 변경 또는 임베딩 삭제),
/// completed → outdated (임베딩 모델 변경)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Outdated,
}

impl EmbeddingStatus {
    /// 배치 임베딩 대상 상태
    pub const NEEDS_EMBEDDING: [EmbeddingStatus; 3] = [
        EmbeddingStatus::Pending,
        EmbeddingStatus::Outdated,
        EmbeddingStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Outdated => "outdated",
        }
    }
}

impl fmt::Display for EmbeddingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbeddingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "outdated" => Ok(Self::Outdated),
            other => anyhow::bail!("Unknown embedding status: {}", other),
        }
    }
}

// ============================================================================
// Search Scope
// ============================================================================

/// 검색 범위
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchScope {
    /// 지식베이스 하나
    KnowledgeBase(String),
    /// 문서 하나
    Document(String),
    /// 여러 지식베이스 (후보를 합쳐서 융합)
    KnowledgeBases(Vec<String>),
}

// ============================================================================
// Chunk Records
// ============================================================================

/// 저장할 청크 (벡터 포함)
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub document_id: String,
    /// 문서 내 0-based 순서
    pub chunk_index: usize,
    pub content: String,
    pub content_hash: String,
    pub token_count: usize,
    pub embedding: Vec<f32>,
}

/// 검색 레그 하나의 결과 행
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHit {
    pub chunk_id: String,
    pub document_id: String,
    pub kb_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub token_count: usize,
    pub document_title: Option<String>,
    pub source_url: Option<String>,
    /// 벡터 레그: 코사인 유사도, 렉시컬 레그: BM25 관련도 (높을수록 좋음)
    pub score: f32,
}

/// 임베딩 대상 문서
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDocument {
    pub id: String,
    pub content: String,
}
