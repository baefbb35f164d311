//! 진행 중인 봉 상태.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use terminal_core::{OhlcvBar, Resolution};

/// (마켓, 해상도)별로 하나씩 유지되는 열린 봉.
///
/// 확정(finalize)된 뒤에는 맵에서 제거되며 다시 변경되지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentBar {
    /// 버킷 시작 시각 (해상도 경계에 정렬)
    pub bucket_start: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    /// 거래량 공급원이 없으므로 항상 0
    pub volume: Decimal,
    /// 봉을 연 뒤 반영된 갱신 횟수
    pub update_count: u64,
}

impl CurrentBar {
    /// 첫 관측 가격으로 새 봉을 엽니다.
    pub fn open_at(bucket_start: DateTime<Utc>, price: Decimal) -> Self {
        Self {
            bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: Decimal::ZERO,
            update_count: 0,
        }
    }

    /// 같은 봉 안의 관측을 반영합니다.
    pub fn apply(&mut self, price: Decimal) {
        self.close = price;
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.update_count += 1;
    }

    /// 버킷 종료 시각 + 허용치가 `now` 이전인지 여부.
    pub fn is_expired(
        &self,
        resolution: Resolution,
        now: DateTime<Utc>,
        tolerance: chrono::Duration,
    ) -> bool {
        resolution.bucket_end(self.bucket_start) + tolerance <= now
    }

    /// 저장용 레코드로 변환합니다.
    pub fn to_ohlcv(&self, market_id: &str, resolution: Resolution) -> OhlcvBar {
        OhlcvBar {
            market_id: market_id.to_string(),
            time: self.bucket_start,
            resolution,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_open_and_apply() {
        let mut bar = CurrentBar::open_at(start(), dec!(0.40));
        assert_eq!(bar.update_count, 0);

        bar.apply(dec!(0.45));
        bar.apply(dec!(0.38));
        bar.apply(dec!(0.41));

        assert_eq!(bar.open, dec!(0.40));
        assert_eq!(bar.high, dec!(0.45));
        assert_eq!(bar.low, dec!(0.38));
        assert_eq!(bar.close, dec!(0.41));
        assert_eq!(bar.update_count, 3);
        assert!(bar.to_ohlcv("M1", Resolution::M1).is_consistent());
    }

    #[test]
    fn test_is_expired_with_tolerance() {
        let bar = CurrentBar::open_at(start(), dec!(0.5));
        let tolerance = Duration::seconds(1);
        let end = start() + Duration::minutes(1);

        assert!(!bar.is_expired(Resolution::M1, end, tolerance));
        assert!(bar.is_expired(Resolution::M1, end + tolerance, tolerance));
        assert!(!bar.is_expired(Resolution::M5, end + tolerance, tolerance));
    }
}
