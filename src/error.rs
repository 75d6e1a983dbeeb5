//! 에러 타입
//!
//! RAG 코어의 에러 분류입니다.
//! - `Configuration`: 자격 증명 누락/잘못된 설정 (재시도 없음, 네트워크 호출 전에 반환)
//! - `Provider`: 임베딩/리랭킹 API 거부 (상태 코드 + 메시지 포함)
//! - `Persistence`: 청크 저장소 실패
//! - `Validation`: 입력 계약 위반 (I/O 전에 동기적으로 거부)

use thiserror::Error;

/// RAG 코어 에러
#[derive(Debug, Error)]
pub enum RagError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{provider} request failed ({status}): {message}")]
    Provider {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("invalid input: {0}")]
    Validation(String),
}

/// 코어 결과 타입
pub type Result<T> = std::result::Result<T, RagError>;

impl RagError {
    /// 프로바이더 에러 생성
    pub fn provider(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }

    /// 저장소 에러를 컨텍스트 체인과 함께 변환
    pub fn persistence(err: anyhow::Error) -> Self {
        Self::Persistence(format!("{:#}", err))
    }

    /// 전송 계층 실패 (응답 없음)는 status 0으로 기록
    pub(crate) fn transport(provider: &str, err: reqwest::Error) -> Self {
        Self::provider(provider, err.status().map(|s| s.as_u16()).unwrap_or(0), err.to_string())
    }
}
