//! OHLCV 봉 영속화.
//!
//! 집계기는 `OhlcvStore` trait만 알고 있으며, 실제 저장소는
//! TimescaleDB(`TimescaleOhlcvStore`) 또는 인메모리(`MemoryOhlcvStore`) 구현을 사용합니다.

pub mod memory;
pub mod timescale;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use terminal_core::{OhlcvBar, Resolution};

use crate::error::Result;

/// 멱등 upsert 기반 OHLCV 저장소.
#[async_trait]
pub trait OhlcvStore: Send + Sync {
    /// `(market_id, time, resolution)` 키로 봉을 upsert합니다.
    ///
    /// 충돌 시 OHLCV 필드를 덮어쓰므로 같은 값으로 반복해도 효과가 없고,
    /// 다른 값이면 마지막 쓰기가 반영됩니다.
    async fn upsert_bar(&self, bar: &OhlcvBar) -> Result<()>;

    /// `[from, to)` 구간의 봉을 시간 오름차순으로 조회합니다.
    async fn query_bars(
        &self,
        market_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        resolution: Resolution,
    ) -> Result<Vec<OhlcvBar>>;

    /// 저장소 연결 상태를 확인합니다.
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
