//! 설정 모듈
//!
//! 임베딩/리랭킹/검색 설정과 설정 파일 로더입니다.
//!
//! 코어 함수들은 항상 완전히 해석된 설정을 인자로 받습니다.
//! 환경변수나 설정 파일을 읽는 것은 이 모듈의 `AppConfig` 로더뿐입니다.
//!
//! 저장 위치: ~/.kbase-rag/config.json

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::RagError;

/// UI가 저장된 키를 가릴 때 쓰는 마스킹 값
pub const MASKED_API_KEY: &str = "********";

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.kbase-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kbase-rag")
}

/// 실제 자격 증명인지 확인 (빈 값/마스킹 값 제외)
fn real_credential(key: &str) -> Option<&str> {
    let key = key.trim();
    if key.is_empty() || key == MASKED_API_KEY {
        None
    } else {
        Some(key)
    }
}

// ============================================================================
// Embedding Configuration
// ============================================================================

/// 임베딩 프로바이더 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    OpenAi,
    Azure,
    Local,
    Aliyun,
    Gemini,
    /// 알 수 없는 값은 OpenAI 호환 엔드포인트로 취급
    #[serde(other)]
    Custom,
}

/// 임베딩 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    /// 청크 크기 (추정 토큰)
    pub chunk_size: usize,
    /// 청크 오버랩 (추정 토큰)
    pub chunk_overlap: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            batch_size: 100,
            chunk_size: 512,
            chunk_overlap: 100,
        }
    }
}

impl EmbeddingConfig {
    /// 유효한 자격 증명 (없으면 None)
    pub fn credential(&self) -> Option<&str> {
        real_credential(&self.api_key)
    }

    /// 구조 검증 (I/O 전에 호출)
    pub fn validate(&self) -> crate::Result<()> {
        if self.model.trim().is_empty() {
            return Err(RagError::Configuration("embedding model is empty".into()));
        }
        if self.batch_size == 0 {
            return Err(RagError::Configuration("batchSize must be greater than 0".into()));
        }
        if self.chunk_size == 0 {
            return Err(RagError::Configuration("chunkSize must be greater than 0".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Configuration(format!(
                "chunkOverlap ({}) must be smaller than chunkSize ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Reranker Configuration
// ============================================================================

/// 리랭커 프로바이더 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RerankProviderKind {
    Cohere,
    Jina,
    Voyage,
    LocalBge,
}

/// 리랭커 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerankerConfig {
    pub provider: RerankProviderKind,
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl RerankerConfig {
    pub fn new(provider: RerankProviderKind, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            model: None,
            base_url: None,
        }
    }

    /// 유효한 자격 증명 (없으면 None)
    pub fn credential(&self) -> Option<&str> {
        real_credential(&self.api_key)
    }
}

// ============================================================================
// Search Options
// ============================================================================

/// 하이브리드 검색 옵션
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchOptions {
    /// 최종 결과 수
    pub match_count: usize,
    /// 벡터 레그 유사도 임계값 (렉시컬 레그에는 적용하지 않음)
    pub match_threshold: f32,
    /// 벡터 가중치 (0.0 ~ 1.0), 렉시컬 가중치는 1 - vector_weight
    pub vector_weight: f32,
    /// RRF 상수 k
    pub rrf_k: f32,
    /// 레그별 후보 수 (None이면 match_count * 2)
    pub candidate_count: Option<usize>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            match_count: 10,
            match_threshold: 0.5,
            vector_weight: 0.5,
            rrf_k: 60.0,
            candidate_count: None,
        }
    }
}

impl SearchOptions {
    /// 레그별 후보 수
    pub fn candidates(&self) -> usize {
        self.candidate_count
            .unwrap_or(self.match_count.saturating_mul(2))
            .max(self.match_count)
    }

    pub fn with_match_count(mut self, match_count: usize) -> Self {
        self.match_count = match_count;
        self
    }

    pub fn with_threshold(mut self, match_threshold: f32) -> Self {
        self.match_threshold = match_threshold;
        self
    }

    pub fn with_vector_weight(mut self, vector_weight: f32) -> Self {
        self.vector_weight = vector_weight;
        self
    }

    /// 범위 검증
    pub fn validate(&self) -> crate::Result<()> {
        if self.match_count == 0 {
            return Err(RagError::Validation("matchCount must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.vector_weight) {
            return Err(RagError::Validation(format!(
                "vectorWeight must be within [0, 1], got {}",
                self.vector_weight
            )));
        }
        if !(-1.0..=1.0).contains(&self.match_threshold) {
            return Err(RagError::Validation(format!(
                "matchThreshold must be within [-1, 1], got {}",
                self.match_threshold
            )));
        }
        if !(self.rrf_k.is_finite() && self.rrf_k > 0.0) {
            return Err(RagError::Validation(format!(
                "rrfK must be a positive number, got {}",
                self.rrf_k
            )));
        }
        Ok(())
    }
}

// ============================================================================
// AppConfig (persisted)
// ============================================================================

/// 설정 파일 전체
///
/// 누락된 필드는 기본값으로 채워집니다 (저장된 값이 기본값을 덮어씀).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub embedding: EmbeddingConfig,
    pub reranker: Option<RerankerConfig>,
    pub search: SearchOptions,
}

impl AppConfig {
    /// 설정 파일 로드 (없으면 기본값)
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: AppConfig =
            serde_json::from_str(&raw).context("Failed to parse config file")?;
        Ok(config)
    }

    /// 기본 위치에서 로드하고 환경변수 키를 보충
    pub fn load_default() -> Result<Self> {
        let mut config = Self::load(&get_data_dir().join("config.json"))?;
        config.apply_env_fallback();
        Ok(config)
    }

    /// 설정 파일 저장
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create config directory")?;
            }
        }
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }

    /// 설정에 키가 없을 때만 환경변수 사용
    ///
    /// 우선순위: 설정 파일 > OPENAI_API_KEY / RERANKER_API_KEY
    pub fn apply_env_fallback(&mut self) {
        if self.embedding.credential().is_none() {
            if let Some(key) = env_key("OPENAI_API_KEY") {
                tracing::debug!("Using embedding API key from OPENAI_API_KEY");
                self.embedding.api_key = key;
            }
        }

        if let Some(reranker) = self.reranker.as_mut() {
            if reranker.credential().is_none() {
                if let Some(key) = env_key("RERANKER_API_KEY") {
                    tracing::debug!("Using reranker API key from RERANKER_API_KEY");
                    reranker.api_key = key;
                }
            }
        }
    }
}

fn env_key(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|k| !k.trim().is_empty())
}

// ============================================================================
// Tests
// ============================================================================
