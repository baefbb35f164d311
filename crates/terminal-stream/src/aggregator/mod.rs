//! OHLCV 집계기.
//!
//! 마켓별 가격 관측을 다섯 해상도(1, 5, 15, 60분, 1일)의 봉으로 동시에 접어 넣습니다.
//!
//! # 상태 전이
//!
//! (마켓, 해상도)마다 `봉 없음 → 열린 봉 → (제자리 갱신)* → 확정` 순서로 진행하며,
//! 확정 직후 같은 키에 새 봉이 열릴 수 있습니다.
//!
//! - 관측 시각의 버킷이 열린 봉보다 뒤면 기존 봉을 확정하고 새 봉을 엽니다.
//! - 그 외에는 열린 봉을 제자리에서 갱신합니다 (늦게 도착한 관측 포함).
//! - 주기적인 스윕이 버킷 종료 시각이 지난 봉을 확정하고 메모리에서 제거합니다.
//! - 이미 확정된 버킷에 관측이 도착하면 봉을 다시 열고 경고와 메트릭을 남깁니다.
//!   다음 확정 때 같은 키의 행을 덮어씁니다.
//!
//! # 저장
//!
//! 확정된 봉은 제한된 크기의 저장 큐에 들어가고, 저장 워커([`OhlcvAggregator::spawn_persister`])가
//! 순서대로 upsert합니다. 재시도 대기는 워커 안에서만 일어나므로 저장소가 느려도
//! 가격 갱신은 맵 변경이 끝나는 즉시 반환합니다. 큐가 가득 차면 갱신이 빈자리를 기다립니다.
//!
//! 맵 전체를 하나의 `RwLock`이 보호하며, 잠금은 맵 변경 동안만 잡습니다.

mod bar;

pub use bar::CurrentBar;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use terminal_core::{MarketId, OhlcvBar, PriceSource, Resolution};
use terminal_data::OhlcvStore;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AggregatorConfig;
use crate::metrics;

type BarKey = (MarketId, Resolution);

/// 가격 관측 하나를 반영한 결과.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriceUpdate {
    /// 버킷 롤오버로 확정되어 저장 큐에 들어간 봉 수
    pub finalized: usize,
    /// 이미 확정된 버킷을 다시 연 해상도 수
    pub reopened: usize,
}

#[derive(Default)]
struct BarBook {
    open: HashMap<BarKey, CurrentBar>,
    /// 키별 마지막 확정 버킷 시작 시각
    last_finalized: HashMap<BarKey, DateTime<Utc>>,
}

impl BarBook {
    fn mark_finalized(&mut self, key: BarKey, bucket_start: DateTime<Utc>) {
        let last = self.last_finalized.entry(key).or_insert(bucket_start);
        if *last < bucket_start {
            *last = bucket_start;
        }
    }
}

/// OHLCV 집계기.
pub struct OhlcvAggregator {
    store: Arc<dyn OhlcvStore>,
    config: AggregatorConfig,
    bars: RwLock<BarBook>,
    pending_tx: mpsc::Sender<OhlcvBar>,
    pending_rx: Mutex<mpsc::Receiver<OhlcvBar>>,
}

impl OhlcvAggregator {
    /// 새로운 집계기 생성.
    ///
    /// # Arguments
    ///
    /// * `store` - 확정된 봉을 upsert할 저장소
    /// * `config` - 스윕 주기, 허용치, 재시도 정책, 저장 큐 크기
    pub fn new(store: Arc<dyn OhlcvStore>, config: AggregatorConfig) -> Self {
        let (pending_tx, pending_rx) = mpsc::channel(config.persist_queue_capacity.max(1));
        Self {
            store,
            config,
            bars: RwLock::new(BarBook::default()),
            pending_tx,
            pending_rx: Mutex::new(pending_rx),
        }
    }

    /// 호가에서 가격을 도출하는 방식.
    pub fn price_source(&self) -> PriceSource {
        self.config.price_source
    }

    /// 가격 관측 하나를 모든 해상도에 반영합니다.
    ///
    /// 관측 시각은 UTC로 정규화한 뒤 버킷을 계산합니다.
    /// 롤오버로 확정된 봉은 저장 큐에 넣기만 하고 upsert를 기다리지 않습니다.
    pub async fn update_price<Tz: TimeZone>(
        &self,
        market_id: &str,
        price: Decimal,
        observed_at: DateTime<Tz>,
    ) -> PriceUpdate {
        let observed_at = observed_at.with_timezone(&Utc);
        let mut finalized = Vec::new();
        let mut update = PriceUpdate::default();

        {
            let mut guard = self.bars.write().await;
            let book = &mut *guard;
            for resolution in Resolution::ALL {
                let bucket_start = resolution.truncate(observed_at);

                match book.open.entry((market_id.to_string(), resolution)) {
                    Entry::Vacant(entry) => {
                        let reopened = book
                            .last_finalized
                            .get(entry.key())
                            .is_some_and(|last| *last >= bucket_start);
                        if reopened {
                            warn!(
                                market_id = %market_id,
                                resolution = %resolution,
                                bucket = %bucket_start,
                                "Observation reopened a finalized bucket"
                            );
                            metrics::record_bar_reopened(resolution);
                            update.reopened += 1;
                        }
                        entry.insert(CurrentBar::open_at(bucket_start, price));
                    }
                    Entry::Occupied(mut entry) => {
                        if entry.get().bucket_start < bucket_start {
                            let closed = std::mem::replace(
                                entry.get_mut(),
                                CurrentBar::open_at(bucket_start, price),
                            );
                            finalized.push(closed.to_ohlcv(market_id, resolution));
                            let key = entry.key().clone();
                            book.mark_finalized(key, closed.bucket_start);
                        } else {
                            entry.get_mut().apply(price);
                        }
                    }
                }
            }
        }

        update.finalized = finalized.len();
        self.enqueue(finalized).await;
        update
    }

    /// 버킷 종료 시각 + 허용치가 지난 봉을 확정하고 메모리에서 제거합니다.
    ///
    /// 저장 큐에 넣은 봉의 수를 반환합니다.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let tolerance = chrono::Duration::from_std(self.config.sweep_tolerance)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let mut expired = Vec::new();

        {
            let mut guard = self.bars.write().await;
            let book = &mut *guard;
            let mut closed = Vec::new();
            book.open.retain(|(market_id, resolution), bar| {
                if bar.is_expired(*resolution, now, tolerance) {
                    expired.push(bar.to_ohlcv(market_id, *resolution));
                    closed.push(((market_id.clone(), *resolution), bar.bucket_start));
                    false
                } else {
                    true
                }
            });
            for (key, bucket_start) in closed {
                book.mark_finalized(key, bucket_start);
            }
        }

        let count = expired.len();
        if count > 0 {
            debug!(count, "Sweeping expired OHLCV bars");
            self.enqueue(expired).await;
        }
        count
    }

    /// 저장 큐에 남은 봉과 열린 봉을 모두 저장합니다. 프로세스 종료 전에 호출해야 합니다.
    ///
    /// 큐는 저장 워커가 쥐고 있으므로 워커가 멈춘 뒤에 호출해야 합니다.
    /// 저장에 성공한 봉의 수를 반환합니다.
    pub async fn flush_all(&self) -> usize {
        let open: Vec<OhlcvBar> = {
            let mut guard = self.bars.write().await;
            let book = &mut *guard;
            let drained: Vec<(BarKey, CurrentBar)> = book.open.drain().collect();
            drained
                .into_iter()
                .map(|((market_id, resolution), bar)| {
                    let record = bar.to_ohlcv(&market_id, resolution);
                    book.mark_finalized((market_id, resolution), bar.bucket_start);
                    record
                })
                .collect()
        };

        let mut rx = self.pending_rx.lock().await;
        let queued = self.persist_queued(&mut rx).await;
        let total = open.len();
        let persisted = self.persist_all(open).await;
        info!(total, persisted, queued, "Flushed open OHLCV bars");
        queued + persisted
    }

    /// 저장 워커 없이 큐에 쌓인 봉을 지금 저장합니다.
    ///
    /// 워커가 실행 중이면 워커가 멈출 때까지 기다립니다.
    pub async fn persist_pending(&self) -> usize {
        let mut rx = self.pending_rx.lock().await;
        self.persist_queued(&mut rx).await
    }

    /// 저장 큐에서 대기 중인 봉 수.
    pub fn pending_count(&self) -> usize {
        self.pending_tx.max_capacity() - self.pending_tx.capacity()
    }

    /// 열린 봉 스냅샷.
    pub async fn open_bar(&self, market_id: &str, resolution: Resolution) -> Option<CurrentBar> {
        self.bars
            .read()
            .await
            .open
            .get(&(market_id.to_string(), resolution))
            .cloned()
    }

    /// 열린 봉 개수.
    pub async fn open_bar_count(&self) -> usize {
        self.bars.read().await.open.len()
    }

    /// 스윕 루프를 백그라운드 태스크로 시작합니다.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let aggregator = Arc::clone(self);
        tokio::spawn(async move { aggregator.run_sweeper(cancel).await })
    }

    /// 취소될 때까지 `sweep_interval`마다 만료 봉을 확정합니다.
    pub async fn run_sweeper(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // 첫 tick은 즉시 완료됨
        ticker.tick().await;

        info!(interval = ?self.config.sweep_interval, "OHLCV sweeper started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep_expired(Utc::now()).await;
                }
            }
        }
        info!("OHLCV sweeper stopped");
    }

    /// 저장 워커를 백그라운드 태스크로 시작합니다.
    pub fn spawn_persister(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let aggregator = Arc::clone(self);
        tokio::spawn(async move { aggregator.run_persister(cancel).await })
    }

    /// 취소될 때까지 저장 큐를 순서대로 upsert합니다.
    ///
    /// 취소되면 이미 큐에 들어온 봉까지 저장한 뒤 종료합니다.
    pub async fn run_persister(&self, cancel: CancellationToken) {
        let mut rx = self.pending_rx.lock().await;
        info!("OHLCV persist worker started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                bar = rx.recv() => match bar {
                    Some(bar) => {
                        self.persist(&bar).await;
                    }
                    None => break,
                },
            }
        }

        let drained = self.persist_queued(&mut rx).await;
        info!(drained, "OHLCV persist worker stopped");
    }

    async fn enqueue(&self, bars: Vec<OhlcvBar>) {
        for bar in bars {
            let bar = match self.pending_tx.try_send(bar) {
                Ok(()) => continue,
                Err(TrySendError::Full(bar)) => {
                    warn!(
                        capacity = self.pending_tx.max_capacity(),
                        "OHLCV persist queue full, waiting for storage"
                    );
                    bar
                }
                // 수신단은 집계기가 소유하므로 닫히지 않음
                Err(TrySendError::Closed(_)) => continue,
            };
            let _ = self.pending_tx.send(bar).await;
        }
    }

    async fn persist_queued(&self, rx: &mut mpsc::Receiver<OhlcvBar>) -> usize {
        let mut persisted = 0;
        while let Ok(bar) = rx.try_recv() {
            if self.persist(&bar).await {
                persisted += 1;
            }
        }
        persisted
    }

    async fn persist_all(&self, bars: Vec<OhlcvBar>) -> usize {
        let mut persisted = 0;
        for bar in &bars {
            if self.persist(bar).await {
                persisted += 1;
            }
        }
        persisted
    }

    /// 재시도를 포함해 봉 하나를 upsert합니다.
    ///
    /// 마지막 시도까지 실패하면 OHLC 값을 에러 로그로 남기고 버립니다.
    async fn persist(&self, bar: &OhlcvBar) -> bool {
        let attempts = self.config.persist_attempts.max(1);
        let mut backoff = self.config.persist_backoff;
        let mut attempt = 1;

        loop {
            match self.store.upsert_bar(bar).await {
                Ok(()) => {
                    metrics::record_bar_persisted(bar.resolution);
                    debug!(
                        market_id = %bar.market_id,
                        resolution = %bar.resolution,
                        bucket = %bar.time,
                        "OHLCV bar finalized"
                    );
                    return true;
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        market_id = %bar.market_id,
                        resolution = %bar.resolution,
                        bucket = %bar.time,
                        attempt,
                        error = %e,
                        "OHLCV upsert failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff);
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        market_id = %bar.market_id,
                        resolution = %bar.resolution,
                        bucket = %bar.time,
                        open = %bar.open,
                        high = %bar.high,
                        low = %bar.low,
                        close = %bar.close,
                        attempts,
                        error = %e,
                        "OHLCV bar dropped after failed upserts"
                    );
                    metrics::record_persist_failure(bar.resolution);
                    return false;
                }
            }
        }
    }
}

/// 다음 재시도 대기 시간 (두 배, 상한은 `Duration::MAX`).
fn next_backoff(current: std::time::Duration) -> std::time::Duration {
    current.saturating_mul(2)
}
