//! 인메모리 OHLCV 저장소.
//!
//! 데이터베이스 없이 코어를 임베딩하거나 테스트할 때 사용합니다.
//! upsert 의미는 TimescaleDB 구현과 같습니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use terminal_core::{OhlcvBar, Resolution};
use tokio::sync::RwLock;

use super::OhlcvStore;
use crate::error::Result;

type BarKey = (String, Resolution, DateTime<Utc>);

/// `BTreeMap` 기반 OHLCV 저장소.
#[derive(Debug, Default)]
pub struct MemoryOhlcvStore {
    bars: RwLock<BTreeMap<BarKey, OhlcvBar>>,
    writes: AtomicU64,
}

impl MemoryOhlcvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장된 봉 개수 (키 기준).
    pub async fn len(&self) -> usize {
        self.bars.read().await.len()
    }

    /// 비어 있는지 여부.
    pub async fn is_empty(&self) -> bool {
        self.bars.read().await.is_empty()
    }

    /// 지금까지 수행된 upsert 호출 수.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// 단일 봉 조회.
    pub async fn get(
        &self,
        market_id: &str,
        time: DateTime<Utc>,
        resolution: Resolution,
    ) -> Option<OhlcvBar> {
        self.bars
            .read()
            .await
            .get(&(market_id.to_string(), resolution, time))
            .cloned()
    }

    /// 저장된 모든 봉 (키 순서).
    pub async fn all(&self) -> Vec<OhlcvBar> {
        self.bars.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl OhlcvStore for MemoryOhlcvStore {
    async fn upsert_bar(&self, bar: &OhlcvBar) -> Result<()> {
        let key = (bar.market_id.clone(), bar.resolution, bar.time);
        self.bars.write().await.insert(key, bar.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn query_bars(
        &self,
        market_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        resolution: Resolution,
    ) -> Result<Vec<OhlcvBar>> {
        if from >= to {
            return Ok(Vec::new());
        }
        let lower = (market_id.to_string(), resolution, from);
        let upper = (market_id.to_string(), resolution, to);

        Ok(self
            .bars
            .read()
            .await
            .range(lower..upper)
            .map(|(_, bar)| bar.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn bar(minute: u32, close: Decimal) -> OhlcvBar {
        OhlcvBar {
            market_id: "M1".to_string(),
            time: Utc.with_ymd_and_hms(2024, 3, 15, 10, minute, 0).unwrap(),
            resolution: Resolution::M1,
            open: close,
            high: close,
            low: close,
            close,
            volume: Decimal::ZERO,
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_same_key() {
        let store = MemoryOhlcvStore::new();

        store.upsert_bar(&bar(0, dec!(0.40))).await.unwrap();
        store.upsert_bar(&bar(0, dec!(0.40))).await.unwrap();
        store.upsert_bar(&bar(0, dec!(0.55))).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.write_count(), 3);
        let stored = store
            .get("M1", bar(0, dec!(0)).time, Resolution::M1)
            .await
            .unwrap();
        assert_eq!(stored.close, dec!(0.55));
    }

    #[tokio::test]
    async fn test_query_range_is_half_open() {
        let store = MemoryOhlcvStore::new();
        for minute in 0..5 {
            store.upsert_bar(&bar(minute, dec!(0.5))).await.unwrap();
        }

        let from = bar(1, dec!(0)).time;
        let bars = store
            .query_bars("M1", from, from + Duration::minutes(3), Resolution::M1)
            .await
            .unwrap();

        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].time, from);

        let other = store
            .query_bars("M1", from, from + Duration::minutes(3), Resolution::M5)
            .await
            .unwrap();
        assert!(other.is_empty());
    }
}
