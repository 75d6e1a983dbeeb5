//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 텍스트(청크 또는 쿼리)를 고정 차원 벡터로 변환합니다.
//!
//! - `EmbeddingBackend`: 배치 하나를 처리하는 프로바이더 인터페이스
//! - `EmbeddingProvider`: 지원 프로바이더의 닫힌 열거형 (OpenAI 호환, DashScope, Gemini)
//! - `EmbeddingClient`: 설정을 받아 프로바이더를 고르고 배치를 나눠 호출
//!
//! ## 사용법
//! ```rust,ignore
//! let client = EmbeddingClient::new()?;
//! let vectors = client.embed(&texts, &config).await?;
//! ```

mod dashscope;
mod gemini;
mod openai;

use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
use crate::error::{RagError, Result};

pub use dashscope::DashScopeEmbedding;
pub use gemini::GeminiEmbedding;
pub use openai::OpenAiEmbedding;

// ============================================================================
// EmbeddingBackend Trait
// ============================================================================

/// 임베딩 백엔드 트레이트
///
/// 텍스트 목록을 받아 입력 순서대로 벡터 목록을 반환합니다.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// 배치 임베딩 (출력 순서 = 입력 순서)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// EmbeddingProvider
// ============================================================================

/// 지원 임베딩 프로바이더
pub enum EmbeddingProvider {
    OpenAi(OpenAiEmbedding),
    DashScope(DashScopeEmbedding),
    Gemini(GeminiEmbedding),
}

impl EmbeddingProvider {
    /// 설정으로 프로바이더 선택
    ///
    /// 자격 증명이 없으면 네트워크 호출 전에 `Configuration` 에러를 반환합니다.
    pub fn from_config(config: &EmbeddingConfig, http: reqwest::Client) -> Result<Self> {
        let api_key = config.credential().ok_or_else(|| {
            RagError::Configuration(
                "Embedding API key is not configured. Set apiKey in config.json or OPENAI_API_KEY."
                    .into(),
            )
        })?;

        let provider = match config.provider {
            // compatible-mode 엔드포인트는 OpenAI 호환 API 사용
            EmbeddingProviderKind::Aliyun if !config.base_url.contains("compatible-mode") => {
                Self::DashScope(DashScopeEmbedding::new(http, api_key, &config.model))
            }
            EmbeddingProviderKind::Gemini => Self::Gemini(GeminiEmbedding::new(
                http,
                api_key,
                &config.model,
                config.dimensions,
            )),
            _ => Self::OpenAi(OpenAiEmbedding::new(
                http,
                &config.base_url,
                api_key,
                &config.model,
            )),
        };

        Ok(provider)
    }
}

#[async_trait]
impl EmbeddingBackend for EmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match self {
            Self::OpenAi(p) => p.embed_batch(texts).await,
            Self::DashScope(p) => p.embed_batch(texts).await,
            Self::Gemini(p) => p.embed_batch(texts).await,
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::OpenAi(p) => p.name(),
            Self::DashScope(p) => p.name(),
            Self::Gemini(p) => p.name(),
        }
    }
}

/// 배치 크기로 나눠 임베딩
///
/// 배치 경계와 무관하게 i번째 출력은 i번째 입력의 벡터입니다.
pub async fn embed_batched<B>(
    backend: &B,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>>
where
    B: EmbeddingBackend + ?Sized,
{
    if texts.is_empty() {
        return Ok(vec![]);
    }

    let batch_size = batch_size.max(1);
    let total_batches = texts.len().div_ceil(batch_size);
    let mut vectors = Vec::with_capacity(texts.len());

    for (i, batch) in texts.chunks(batch_size).enumerate() {
        tracing::debug!(
            "Embedding batch {}/{} ({} texts) via {}",
            i + 1,
            total_batches,
            batch.len(),
            backend.name()
        );

        let embedded = backend.embed_batch(batch).await?;
        if embedded.len() != batch.len() {
            return Err(RagError::provider(
                backend.name(),
                0,
                format!("returned {} embeddings for {} inputs", embedded.len(), batch.len()),
            ));
        }
        vectors.extend(embedded);
    }

    let dimension = vectors[0].len();
    if dimension == 0 || vectors.iter().any(|v| v.len() != dimension) {
        return Err(RagError::provider(
            backend.name(),
            0,
            "returned embeddings with inconsistent dimensions",
        ));
    }

    Ok(vectors)
}

// ============================================================================
// TextEmbedder
// ============================================================================

/// 설정 기반 텍스트 임베딩 인터페이스
///
/// 오케스트레이터와 검색 엔진은 이 트레이트에만 의존합니다.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// 텍스트 목록 임베딩 (순서 보존)
    async fn embed(&self, texts: &[String], config: &EmbeddingConfig) -> Result<Vec<Vec<f32>>>;

    /// 단일 텍스트 임베딩
    async fn embed_one(&self, text: &str, config: &EmbeddingConfig) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        self.embed(&texts, config)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::provider("embedding", 0, "no embedding returned"))
    }
}

/// HTTP 임베딩 클라이언트
#[derive(Clone)]
pub struct EmbeddingClient {
    http: reqwest::Client,
}

impl EmbeddingClient {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: crate::http::build_client()?,
        })
    }

    /// 기존 HTTP 클라이언트 재사용
    pub fn with_http(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl TextEmbedder for EmbeddingClient {
    async fn embed(&self, texts: &[String], config: &EmbeddingConfig) -> Result<Vec<Vec<f32>>> {
        config.validate()?;
        let provider = EmbeddingProvider::from_config(config, self.http.clone())?;

        let vectors = embed_batched(&provider, texts, config.batch_size).await?;

        if let Some(first) = vectors.first() {
            if first.len() != config.dimensions {
                tracing::warn!(
                    "{} returned {}-dimensional embeddings (configured: {})",
                    provider.name(),
                    first.len(),
                    config.dimensions
                );
            }
        }

        Ok(vectors)
    }
}

// ============================================================================
// Provider Probe
// ============================================================================

/// 프로바이더 연결 확인 결과
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub model: String,
    pub dimension: usize,
    pub latency_ms: u128,
    /// 벡터 앞부분 (최대 5개)
    pub sample: Vec<f32>,
}

/// 샘플 텍스트 하나를 임베딩해서 프로바이더 설정을 확인
pub async fn probe_provider(
    embedder: &dyn TextEmbedder,
    config: &EmbeddingConfig,
    text: &str,
) -> Result<ProbeReport> {
    if text.trim().is_empty() {
        return Err(RagError::Validation("probe text is empty".into()));
    }

    let started = Instant::now();
    let vector = embedder.embed_one(text, config).await?;

    Ok(ProbeReport {
        model: config.model.clone(),
        dimension: vector.len(),
        latency_ms: started.elapsed().as_millis(),
        sample: vector.iter().take(5).copied().collect(),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// 텍스트에서 결정적으로 벡터를 만드는 테스트 백엔드
    pub(crate) fn fake_vector(text: &str) -> Vec<f32> {
        let bytes = text.as_bytes();
        let sum: u32 = bytes.iter().map(|&b| u32::from(b)).sum();
        vec![
            bytes.len() as f32,
            (sum % 97) as f32,
            bytes.first().copied().unwrap_or(0) as f32,
            1.0,
        ]
    }

    #[derive(Default)]
    struct RecordingBackend {
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl EmbeddingBackend for RecordingBackend {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.batches.lock().unwrap().push(texts.len());
            Ok(texts.iter().map(|t| fake_vector(t)).collect())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    struct ShortBackend;

    #[async_trait]
    impl EmbeddingBackend for ShortBackend {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().skip(1).map(|t| fake_vector(t)).collect())
        }

        fn name(&self) -> &str {
            "short"
        }
    }

    /// embed_batched 위에 올린 테스트용 TextEmbedder
    pub(crate) struct FakeEmbedder;

    #[async_trait]
    impl TextEmbedder for FakeEmbedder {
        async fn embed(&self, texts: &[String], config: &EmbeddingConfig) -> Result<Vec<Vec<f32>>> {
            embed_batched(&RecordingBackend::default(), texts, config.batch_size).await
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("chunk number {}", i)).collect()
    }

    #[tokio::test]
    async fn test_batch_boundaries_do_not_change_output() {
        let input = texts(7);
        let reference: Vec<Vec<f32>> = input.iter().map(|t| fake_vector(t)).collect();

        for batch_size in [1, 2, 3, 7, 100] {
            let backend = RecordingBackend::default();
            let out = embed_batched(&backend, &input, batch_size).await.unwrap();
            assert_eq!(out, reference, "batch_size={}", batch_size);
        }
    }

    #[tokio::test]
    async fn test_batches_are_bounded() {
        let backend = RecordingBackend::default();
        embed_batched(&backend, &texts(7), 3).await.unwrap();
        assert_eq!(*backend.batches.lock().unwrap(), vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_calls() {
        let backend = RecordingBackend::default();
        let out = embed_batched(&backend, &[], 10).await.unwrap();
        assert!(out.is_empty());
        assert!(backend.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_misaligned_backend_is_provider_error() {
        let result = embed_batched(&ShortBackend, &texts(3), 10).await;
        assert!(matches!(result, Err(RagError::Provider { .. })));
    }

    #[tokio::test]
    async fn test_embed_one_matches_batch() {
        let config = EmbeddingConfig {
            batch_size: 2,
            ..EmbeddingConfig::default()
        };
        let single = FakeEmbedder.embed_one("hello", &config).await.unwrap();
        let batch = FakeEmbedder.embed(&["hello".to_string()], &config).await.unwrap();
        assert_eq!(vec![single], batch);
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_network() {
        let client = EmbeddingClient::new().unwrap();
        let config = EmbeddingConfig {
            api_key: "  ".to_string(),
            ..EmbeddingConfig::default()
        };
        let result = client.embed(&texts(2), &config).await;
        assert!(matches!(result, Err(RagError::Configuration(_))));
    }

    #[test]
    fn test_provider_selection() {
        let http = reqwest::Client::new();

        let openai = EmbeddingConfig {
            api_key: "sk-test".into(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            EmbeddingProvider::from_config(&openai, http.clone()),
            Ok(EmbeddingProvider::OpenAi(_))
        ));

        let aliyun_native = EmbeddingConfig {
            provider: EmbeddingProviderKind::Aliyun,
            base_url: "https://dashscope.aliyuncs.com/api/v1".into(),
            ..openai.clone()
        };
        assert!(matches!(
            EmbeddingProvider::from_config(&aliyun_native, http.clone()),
            Ok(EmbeddingProvider::DashScope(_))
        ));

        let aliyun_compatible = EmbeddingConfig {
            base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".into(),
            ..aliyun_native
        };
        assert!(matches!(
            EmbeddingProvider::from_config(&aliyun_compatible, http.clone()),
            Ok(EmbeddingProvider::OpenAi(_))
        ));

        let gemini = EmbeddingConfig {
            provider: EmbeddingProviderKind::Gemini,
            model: "gemini-embedding-001".into(),
            dimensions: 768,
            ..openai
        };
        let provider = EmbeddingProvider::from_config(&gemini, http).unwrap();
        assert_eq!(provider.name(), "gemini");
    }

    #[tokio::test]
    async fn test_probe_rejects_empty_text() {
        let result = probe_provider(&FakeEmbedder, &EmbeddingConfig::default(), " ").await;
        assert!(matches!(result, Err(RagError::Validation(_))));
    }

    #[tokio::test]
    async fn test_probe_reports_dimension() {
        let report = probe_provider(&FakeEmbedder, &EmbeddingConfig::default(), "ping")
            .await
            .unwrap();
        assert_eq!(report.dimension, 4);
        assert_eq!(report.sample.len(), 4);
    }
}
