//! 클라이언트 제어 프레임.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamError};

/// 클라이언트에서 서버로 보내는 제어 프레임.
///
/// `{"type": "subscribe" | "unsubscribe", "market_ids": [...]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// 마켓 구독
    Subscribe {
        /// 구독할 마켓 ID 목록
        market_ids: Vec<String>,
    },
    /// 마켓 구독 해제
    Unsubscribe {
        /// 구독 해제할 마켓 ID 목록
        market_ids: Vec<String>,
    },
}

impl ControlFrame {
    /// 바이트 슬라이스(텍스트 또는 바이너리 프레임)에서 파싱.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| StreamError::InvalidFrame(e.to_string()))
    }

    /// 프레임이 가리키는 마켓 ID 목록.
    pub fn market_ids(&self) -> &[String] {
        match self {
            Self::Subscribe { market_ids } | Self::Unsubscribe { market_ids } => market_ids,
        }
    }
}
