//! OpenAI 호환 임베딩 (`POST {base_url}/embeddings`)
//!
//! OpenAI, Azure, 로컬 서버, Aliyun compatible-mode가 모두 이 형식을 씁니다.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::EmbeddingBackend;
use crate::error::Result;
use crate::http::post_bearer;

const PROVIDER: &str = "openai";

/// OpenAI 호환 임베딩 구현체
pub struct OpenAiEmbedding {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiEmbedding {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            http,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    /// index 순으로 정렬한 벡터
    fn into_ordered(mut self) -> Vec<Vec<f32>> {
        self.data.sort_by_key(|d| d.index);
        self.data.into_iter().map(|d| d.embedding).collect()
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            encoding_format: "float",
        };

        let response: EmbeddingResponse =
            post_bearer(&self.http, PROVIDER, &self.endpoint, &self.api_key, &request).await?;

        Ok(response.into_ordered())
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
