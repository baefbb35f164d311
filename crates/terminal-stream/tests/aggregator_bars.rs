//! OHLCV 집계 통합 테스트.
//!
//! 인메모리 저장소로 집계기의 공개 API만 검증합니다:
//! - 버킷 롤오버 시 확정과 새 봉
//! - upsert 멱등성과 확정 후 재개봉
//! - 스윕 루프와 저장 워커에 의한 만료 봉 저장
//! - 봉 불변식과 일봉 UTC 자정 정렬 (proptest)

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use terminal_core::{OhlcvBar, Resolution};
use terminal_data::{MemoryOhlcvStore, OhlcvStore};
use terminal_stream::{AggregatorConfig, OhlcvAggregator};
use tokio_util::sync::CancellationToken;

// ============================================================================
// 테스트 헬퍼 함수
// ============================================================================

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, h, m, s).unwrap()
}

fn aggregator() -> (Arc<MemoryOhlcvStore>, Arc<OhlcvAggregator>) {
    let store = Arc::new(MemoryOhlcvStore::new());
    let aggregator = Arc::new(OhlcvAggregator::new(
        store.clone(),
        AggregatorConfig::default(),
    ));
    (store, aggregator)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// ============================================================================
// 롤오버
// ============================================================================

#[tokio::test]
async fn test_minute_rollover_scenario() {
    let (store, aggregator) = aggregator();

    aggregator.update_price("M1", dec!(0.40), at(10, 0, 5)).await;
    aggregator.update_price("M1", dec!(0.45), at(10, 0, 40)).await;
    let update = aggregator.update_price("M1", dec!(0.30), at(10, 1, 5)).await;

    // 1분봉만 롤오버, 나머지 해상도는 같은 버킷
    assert_eq!(update.finalized, 1);
    assert_eq!(aggregator.persist_pending().await, 1);

    let finalized = store.get("M1", at(10, 0, 0), Resolution::M1).await.unwrap();
    assert_eq!(finalized.open, dec!(0.40));
    assert_eq!(finalized.high, dec!(0.45));
    assert_eq!(finalized.low, dec!(0.40));
    assert_eq!(finalized.close, dec!(0.45));
    assert_eq!(finalized.volume, Decimal::ZERO);

    let open = aggregator.open_bar("M1", Resolution::M1).await.unwrap();
    assert_eq!(open.bucket_start, at(10, 1, 0));
    assert_eq!(open.open, dec!(0.30));
    assert_eq!(open.high, dec!(0.30));
    assert_eq!(open.low, dec!(0.30));
    assert_eq!(open.close, dec!(0.30));
    assert_eq!(open.update_count, 0);

    let m5 = aggregator.open_bar("M1", Resolution::M5).await.unwrap();
    assert_eq!(m5.open, dec!(0.40));
    assert_eq!(m5.low, dec!(0.30));
    assert_eq!(m5.close, dec!(0.30));
    assert_eq!(m5.update_count, 2);
}

#[tokio::test]
async fn test_markets_are_independent() {
    let (store, aggregator) = aggregator();

    aggregator.update_price("M1", dec!(0.40), at(10, 0, 5)).await;
    aggregator.update_price("M2", dec!(0.70), at(10, 0, 6)).await;
    aggregator.update_price("M2", dec!(0.75), at(10, 1, 6)).await;
    aggregator.persist_pending().await;

    assert!(store.get("M1", at(10, 0, 0), Resolution::M1).await.is_none());
    let m2 = store.get("M2", at(10, 0, 0), Resolution::M1).await.unwrap();
    assert_eq!(m2.close, dec!(0.70));
    assert_eq!(
        aggregator.open_bar("M1", Resolution::M1).await.unwrap().bucket_start,
        at(10, 0, 0)
    );
}

#[tokio::test]
async fn test_skipping_buckets_opens_at_new_bucket() {
    let (store, aggregator) = aggregator();

    aggregator.update_price("M1", dec!(0.40), at(10, 0, 5)).await;
    aggregator.update_price("M1", dec!(0.50), at(13, 22, 0)).await;
    aggregator.persist_pending().await;

    let h1 = aggregator.open_bar("M1", Resolution::H1).await.unwrap();
    assert_eq!(h1.bucket_start, at(13, 0, 0));
    let m15 = aggregator.open_bar("M1", Resolution::M15).await.unwrap();
    assert_eq!(m15.bucket_start, at(13, 15, 0));

    // 1, 5, 15, 60분봉이 확정, 일봉은 유지
    assert_eq!(store.len().await, 4);
}

// ============================================================================
// 멱등성
// ============================================================================

#[tokio::test]
async fn test_upsert_same_key_keeps_latest() {
    let store = MemoryOhlcvStore::new();
    let bar = OhlcvBar {
        market_id: "M1".to_string(),
        time: at(10, 0, 0),
        resolution: Resolution::M1,
        open: dec!(0.40),
        high: dec!(0.45),
        low: dec!(0.40),
        close: dec!(0.45),
        volume: Decimal::ZERO,
    };

    store.upsert_bar(&bar).await.unwrap();
    store.upsert_bar(&bar).await.unwrap();
    let revised = OhlcvBar {
        close: dec!(0.42),
        ..bar.clone()
    };
    store.upsert_bar(&revised).await.unwrap();

    let rows = store
        .query_bars("M1", at(10, 0, 0), at(10, 1, 0), Resolution::M1)
        .await
        .unwrap();
    assert_eq!(rows, vec![revised]);
}

#[tokio::test]
async fn test_late_update_after_flush_reopens_and_overwrites_row() {
    let (store, aggregator) = aggregator();

    aggregator.update_price("M1", dec!(0.40), at(10, 0, 5)).await;
    aggregator.flush_all().await;
    let update = aggregator.update_price("M1", dec!(0.60), at(10, 0, 30)).await;
    assert_eq!(update.reopened, 5);
    aggregator.flush_all().await;

    let rows = store
        .query_bars("M1", at(10, 0, 0), at(10, 1, 0), Resolution::M1)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].close, dec!(0.60));
}

// ============================================================================
// 스윕
// ============================================================================

#[tokio::test]
async fn test_sweep_persists_each_resolution_after_its_end() {
    let (store, aggregator) = aggregator();
    aggregator.update_price("M1", dec!(0.40), at(10, 0, 5)).await;

    let tolerance = Duration::seconds(1);
    let expectations = [
        (at(10, 1, 0), 1),
        (at(10, 5, 0), 2),
        (at(10, 15, 0), 3),
        (at(11, 0, 0), 4),
    ];
    for (end, expected_rows) in expectations {
        assert_eq!(aggregator.sweep_expired(end + tolerance).await, 1);
        aggregator.persist_pending().await;
        assert_eq!(store.len().await, expected_rows);
    }

    let day_end = Utc.with_ymd_and_hms(2024, 3, 16, 0, 0, 0).unwrap();
    assert_eq!(aggregator.sweep_expired(day_end).await, 0);
    aggregator.sweep_expired(day_end + tolerance).await;
    aggregator.persist_pending().await;
    assert_eq!(store.len().await, 5);
    assert_eq!(aggregator.open_bar_count().await, 0);
}

#[tokio::test]
async fn test_sweeper_loop_flushes_stale_bars() {
    let store = Arc::new(MemoryOhlcvStore::new());
    let aggregator = Arc::new(OhlcvAggregator::new(
        store.clone(),
        AggregatorConfig {
            sweep_interval: StdDuration::from_millis(20),
            ..Default::default()
        },
    ));
    aggregator.update_price("M1", dec!(0.40), at(10, 0, 5)).await;

    let cancel = CancellationToken::new();
    let sweeper = aggregator.spawn_sweeper(cancel.clone());
    let persister = aggregator.spawn_persister(cancel.clone());

    tokio::time::timeout(StdDuration::from_secs(5), async {
        while store.len().await < 5 {
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
    })
    .await
    .expect("sweeper did not flush stale bars");

    cancel.cancel();
    sweeper.await.unwrap();
    persister.await.unwrap();
    assert_eq!(aggregator.open_bar_count().await, 0);
    assert_eq!(aggregator.pending_count(), 0);
}

// ============================================================================
// 속성 테스트
// ============================================================================

proptest! {
    #[test]
    fn prop_finalized_bar_matches_observations(
        ticks in prop::collection::vec((1i64..100_000, 0u32..60), 1..40)
    ) {
        let rt = runtime();
        let (store, aggregator) = aggregator();

        let stored = rt.block_on(async {
            for (raw, second) in &ticks {
                aggregator
                    .update_price("M1", Decimal::new(*raw, 5), at(10, 0, *second))
                    .await;
            }
            aggregator.update_price("M1", dec!(1), at(10, 1, 0)).await;
            aggregator.persist_pending().await;
            store.get("M1", at(10, 0, 0), Resolution::M1).await
        });

        let bar = stored.expect("bucket should be finalized");
        let prices: Vec<Decimal> = ticks.iter().map(|(raw, _)| Decimal::new(*raw, 5)).collect();

        prop_assert_eq!(bar.open, prices[0]);
        prop_assert_eq!(bar.close, *prices.last().unwrap());
        prop_assert_eq!(bar.high, *prices.iter().max().unwrap());
        prop_assert_eq!(bar.low, *prices.iter().min().unwrap());
        prop_assert!(bar.is_consistent());
    }

    #[test]
    fn prop_daily_bucket_is_utc_midnight(
        secs in 0i64..4_000_000_000,
        offset_hours in -12i32..=14,
    ) {
        let rt = runtime();
        let (_store, aggregator) = aggregator();
        let offset = FixedOffset::east_opt(offset_hours * 3600).unwrap();
        let observed = offset.timestamp_opt(secs, 0).unwrap();

        let bar = rt.block_on(async {
            aggregator.update_price("M1", dec!(0.5), observed).await;
            aggregator.open_bar("M1", Resolution::D1).await
        }).unwrap();

        let utc = observed.with_timezone(&Utc);
        let midnight = utc.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc();
        prop_assert_eq!(bar.bucket_start, midnight);
    }
}
