//! 코어 도메인 에러 타입.

use thiserror::Error;

/// 코어 도메인 에러.
#[derive(Debug, Error)]
pub enum CoreError {
    /// 알 수 없는 봉 해상도
    #[error("잘못된 해상도: {0}")]
    InvalidResolution(String),

    /// 타임스탬프 파싱 실패
    #[error("잘못된 타임스탬프: {0}")]
    InvalidTimestamp(String),

    /// 알 수 없는 가격 소스
    #[error("잘못된 가격 소스: {0}")]
    InvalidPriceSource(String),

    /// 페이로드 파싱 실패
    #[error("파싱 에러: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Parse(err.to_string())
    }
}

/// 코어 작업 결과 타입.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
