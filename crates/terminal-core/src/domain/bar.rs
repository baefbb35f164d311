//! 영속화 대상 OHLCV 봉.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{MarketId, Resolution};

/// 확정된 OHLCV 봉.
///
/// `(market_id, time, resolution)` 조합이 저장소의 고유 키입니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OhlcvBar {
    /// 마켓 ID
    pub market_id: MarketId,
    /// 버킷 시작 시각
    pub time: DateTime<Utc>,
    /// 해상도
    pub resolution: Resolution,
    /// 시가
    pub open: Decimal,
    /// 고가
    pub high: Decimal,
    /// 저가
    pub low: Decimal,
    /// 종가
    pub close: Decimal,
    /// 거래량 (체결 소스가 없어 항상 0)
    pub volume: Decimal,
}

impl OhlcvBar {
    /// 버킷 종료 시각.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.resolution.bucket_end(self.time)
    }

    /// 고가/저가가 시가/종가를 감싸는지 확인합니다.
    pub fn is_consistent(&self) -> bool {
        self.high >= self.open.max(self.close).max(self.low)
            && self.low <= self.open.min(self.close)
    }
}
