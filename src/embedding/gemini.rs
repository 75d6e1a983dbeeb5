//! Google Gemini 임베딩
//!
//! source: https://ai.google.dev/gemini-api/docs/embeddings
//!
//! `batchEmbedContents`로 배치 하나를 한 번에 요청합니다.
//! API 키는 URL이 아닌 `x-goog-api-key` 헤더로 전송합니다.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::EmbeddingBackend;
use crate::error::{RagError, Result};

const PROVIDER: &str = "gemini";

/// Gemini API 베이스 URL
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// MRL 지원 출력 차원
const SUPPORTED_DIMENSIONS: [usize; 3] = [768, 1536, 3072];

/// Google Gemini 임베딩 구현체
pub struct GeminiEmbedding {
    http: reqwest::Client,
    api_key: String,
    model: String,
    dimension: Option<usize>,
}

impl GeminiEmbedding {
    /// 지원하지 않는 차원이면 모델 기본 차원 사용
    pub fn new(http: reqwest::Client, api_key: &str, model: &str, dimension: usize) -> Self {
        let dimension = if SUPPORTED_DIMENSIONS.contains(&dimension) {
            Some(dimension)
        } else {
            tracing::warn!(
                "Gemini does not support {} dimensions, using model default",
                dimension
            );
            None
        };

        Self {
            http,
            api_key: api_key.to_string(),
            model: model.trim_start_matches("models/").to_string(),
            dimension,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:batchEmbedContents", GEMINI_API_BASE, self.model)
    }
}

/// Gemini API 요청 본문
#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedRequest>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    #[serde(rename = "taskType")]
    task_type: &'static str,
    #[serde(rename = "outputDimensionality", skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

/// Gemini API 응답
#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

/// Gemini API 에러 응답
#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

impl GeminiEmbedding {
    fn build_request(&self, texts: &[String]) -> BatchEmbedRequest {
        let model = format!("models/{}", self.model);
        BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedRequest {
                    model: model.clone(),
                    content: EmbedContent {
                        parts: vec![EmbedPart { text: text.clone() }],
                    },
                    task_type: "RETRIEVAL_DOCUMENT",
                    output_dimensionality: self.dimension,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl EmbeddingBackend for GeminiEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = self.build_request(texts);

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::transport(PROVIDER, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RagError::transport(PROVIDER, e))?;

        if !status.is_success() {
            let message = match serde_json::from_str::<GeminiError>(&body) {
                Ok(error) => format!("{}: {}", error.error.status, error.error.message),
                Err(_) => body,
            };
            return Err(RagError::provider(PROVIDER, status.as_u16(), message));
        }

        let parsed: BatchEmbedResponse = serde_json::from_str(&body).map_err(|e| {
            RagError::provider(PROVIDER, status.as_u16(), format!("invalid response body: {}", e))
        })?;

        Ok(parsed.embeddings.into_iter().map(|e| e.values).collect())
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
