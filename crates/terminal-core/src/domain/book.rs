//! 업스트림 호가 메시지 모델.
//!
//! 마켓별 채널로 전달되는 JSON 메시지입니다. 팬아웃 경로는 원본 페이로드를
//! 그대로 전달하고, 집계기는 `market`, 도출 가격, `timestamp`만 사용합니다.
//!
//! ```json
//! {"event_type":"book","asset_id":"123","market":"0xabc",
//!  "bids":[{"price":"0.48","size":"100"}],"asks":[{"price":"0.52","size":"40"}],
//!  "timestamp":"1710497405000","hash":"0x..."}
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};

/// 호가 한 단계.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// 가격
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    /// 수량
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
}

/// 업스트림 호가 메시지.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookMessage {
    /// 이벤트 유형 (예: "book", "price_change")
    #[serde(default)]
    pub event_type: String,
    /// 자산(토큰) ID
    #[serde(default)]
    pub asset_id: String,
    /// 마켓 ID
    pub market: String,
    /// 매수 호가
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    /// 매도 호가
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
    /// epoch 밀리초 (문자열)
    pub timestamp: String,
    /// 호가 해시
    #[serde(default)]
    pub hash: String,
}

impl BookMessage {
    /// JSON 문자열에서 파싱.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        serde_json::from_str(json).map_err(CoreError::from)
    }

    /// 최우선 매수 호가.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.iter().map(|level| level.price).max()
    }

    /// 최우선 매도 호가.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.iter().map(|level| level.price).min()
    }

    /// 관측 시각.
    pub fn observed_at(&self) -> CoreResult<DateTime<Utc>> {
        let millis: i64 = self
            .timestamp
            .trim()
            .parse()
            .map_err(|_| CoreError::InvalidTimestamp(self.timestamp.clone()))?;

        DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| CoreError::InvalidTimestamp(self.timestamp.clone()))
    }

    /// 설정된 소스로 집계용 가격을 도출합니다.
    ///
    /// 호가가 비어 있으면 `None`을 반환합니다.
    pub fn derive_price(&self, source: PriceSource) -> Option<Decimal> {
        match source {
            PriceSource::BestBid => self.best_bid(),
            PriceSource::Mid => match (self.best_bid(), self.best_ask()) {
                (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
                (Some(bid), None) => Some(bid),
                (None, Some(ask)) => Some(ask),
                (None, None) => None,
            },
        }
    }
}

/// 집계 가격 도출 방식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    /// 최우선 매수 호가
    #[default]
    BestBid,
    /// 매수/매도 중간값 (한쪽만 있으면 그 값)
    Mid,
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceSource::BestBid => f.write_str("best_bid"),
            PriceSource::Mid => f.write_str("mid"),
        }
    }
}

impl FromStr for PriceSource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "best_bid" | "bid" => Ok(PriceSource::BestBid),
            "mid" => Ok(PriceSource::Mid),
            other => Err(CoreError::InvalidPriceSource(other.to_string())),
        }
    }
}
