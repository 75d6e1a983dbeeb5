//! Knowledge 모듈 - 청킹, 저장, 하이브리드 검색, 임베딩 파이프라인
//!
//! - SQLite: 문서/청크 텍스트 + 임베딩 상태 + FTS5 렉시컬 검색
//! - LanceDB: 청크 벡터 (코사인 ANN)
//! - Hybrid: RRF로 두 검색 결과 통합
//! - Orchestrator: 청킹 → 임베딩 → 저장

mod chunk_store;
mod chunker;
mod hybrid;
mod lance;
mod orchestrator;
mod store;
mod types;
mod vector;

// Re-exports
pub use chunk_store::{ChunkStore, LocalChunkStore};
pub use chunker::{
    chunk_document, compute_chunk_hash, estimate_token_count, ChunkConfig, Chunker, SeparatorChunker,
    TextChunk,
};
pub use hybrid::{
    fuse_rankings, group_by_document, DocumentGroup, HybridSearchEngine, RankedChunk,
    SearchMethod,
};
pub use lance::LanceVectorStore;
pub use orchestrator::{BatchReport, EmbeddingOrchestrator};
pub use store::{content_sha256, Document, EmbeddingStats, KnowledgeStore, NewDocument, StoredChunk};
pub use types::{ChunkHit, EmbeddingStatus, NewChunk, PendingDocument, SearchScope};
pub use vector::{VectorEntry, VectorHit, VectorStore};
