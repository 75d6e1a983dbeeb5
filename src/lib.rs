//! kbase-rag - 지식베이스 하이브리드 RAG 코어
//!
//! 문서를 청크로 나누고 임베딩해서 LanceDB(벡터)와 SQLite FTS5(키워드)에
//! 저장한 뒤, RRF로 두 검색 결과를 합치고 필요하면 리랭킹합니다.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
mod http;
pub mod knowledge;
pub mod rerank;

// Re-exports
pub use config::{
    get_data_dir, AppConfig, EmbeddingConfig, EmbeddingProviderKind, RerankProviderKind,
    RerankerConfig, SearchOptions,
};
pub use embedding::{probe_provider, EmbeddingClient, EmbeddingProvider, ProbeReport, TextEmbedder};
pub use error::{RagError, Result};
pub use knowledge::{
    chunk_document, group_by_document, ChunkStore, DocumentGroup, EmbeddingOrchestrator,
    EmbeddingStatus, HybridSearchEngine, KnowledgeStore, LocalChunkStore, RankedChunk,
    SearchMethod, SearchScope, TextChunk,
};
pub use rerank::{apply_reranking, RerankOptions, RerankResult, Reranker};
