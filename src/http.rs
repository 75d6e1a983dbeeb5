//! 프로바이더 HTTP 공통 헬퍼
//!
//! 임베딩/리랭킹 API 호출에서 공통으로 쓰는 클라이언트 생성과 응답 디코딩입니다.
//! 재시도는 하지 않습니다 (재시도 정책은 호출자 책임).

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{RagError, Result};

/// 요청 타임아웃
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP 클라이언트 생성
pub fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| RagError::Configuration(format!("Failed to create HTTP client: {}", e)))
}

/// Bearer 인증 JSON POST 후 응답 디코딩
pub(crate) async fn post_bearer<B, T>(
    http: &reqwest::Client,
    provider: &str,
    url: &str,
    api_key: &str,
    body: &B,
) -> Result<T>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let response = http
        .post(url)
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await
        .map_err(|e| RagError::transport(provider, e))?;

    decode_json(provider, response).await
}

/// 상태 코드 확인 후 JSON 디코딩
///
/// 실패 응답은 본문을 메시지로 담은 `RagError::Provider`가 됩니다.
pub(crate) async fn decode_json<T: DeserializeOwned>(
    provider: &str,
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| RagError::transport(provider, e))?;

    if !status.is_success() {
        return Err(RagError::provider(provider, status.as_u16(), body));
    }

    serde_json::from_str(&body).map_err(|e| {
        RagError::provider(
            provider,
            status.as_u16(),
            format!("invalid response body: {}", e),
        )
    })
}
