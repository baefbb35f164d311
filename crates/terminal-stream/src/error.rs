//! 스트리밍 서비스 에러 타입.

use terminal_core::CoreError;
use terminal_data::DataError;
use thiserror::Error;

/// 스트리밍 서비스 에러.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Hub 이벤트 루프가 종료됨
    #[error("Hub is not running")]
    HubClosed,

    /// 설정 에러
    #[error("Configuration error: {0}")]
    Config(String),

    /// 잘못된 제어 프레임
    #[error("Invalid control frame: {0}")]
    InvalidFrame(String),

    /// WebSocket I/O 에러
    #[error("WebSocket error: {0}")]
    Socket(String),

    /// 메트릭 레코더 설치 실패
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// 도메인 에러
    #[error(transparent)]
    Core(#[from] CoreError),

    /// 저장소/전송 에러
    #[error(transparent)]
    Data(#[from] DataError),
}

/// 스트리밍 작업 결과 타입.
pub type Result<T> = std::result::Result<T, StreamError>;
