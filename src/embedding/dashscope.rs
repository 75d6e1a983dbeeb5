//! Aliyun DashScope 네이티브 임베딩
//!
//! source: https://help.aliyun.com/zh/model-studio/text-embedding-synchronous-api
//!
//! 요청은 `input.texts`, 응답은 `output.embeddings[].text_index`로 정렬합니다.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::EmbeddingBackend;
use crate::error::{RagError, Result};
use crate::http::post_bearer;

const PROVIDER: &str = "dashscope";

const DASHSCOPE_EMBED_URL: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/embeddings/text-embedding/text-embedding";

/// DashScope 임베딩 구현체
pub struct DashScopeEmbedding {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl DashScopeEmbedding {
    pub fn new(http: reqwest::Client, api_key: &str, model: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DashScopeRequest<'a> {
    model: &'a str,
    input: DashScopeInput<'a>,
}

#[derive(Debug, Serialize)]
struct DashScopeInput<'a> {
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct DashScopeResponse {
    output: Option<DashScopeOutput>,
}

#[derive(Debug, Deserialize)]
struct DashScopeOutput {
    embeddings: Vec<DashScopeEmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct DashScopeEmbeddingItem {
    text_index: usize,
    embedding: Vec<f32>,
}

impl DashScopeResponse {
    fn into_ordered(self) -> Result<Vec<Vec<f32>>> {
        let mut items = self
            .output
            .ok_or_else(|| RagError::provider(PROVIDER, 200, "response has no output"))?
            .embeddings;
        items.sort_by_key(|e| e.text_index);
        Ok(items.into_iter().map(|e| e.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingBackend for DashScopeEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = DashScopeRequest {
            model: &self.model,
            input: DashScopeInput { texts },
        };

        let response: DashScopeResponse = post_bearer(
            &self.http,
            PROVIDER,
            DASHSCOPE_EMBED_URL,
            &self.api_key,
            &request,
        )
        .await?;

        response.into_ordered()
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
