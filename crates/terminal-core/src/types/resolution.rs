//! OHLCV 봉 해상도 정의.
//!
//! 집계기는 다섯 개의 고정 해상도로 동시에 봉을 만듭니다.
//! 문자열 코드는 차트 클라이언트가 사용하는 형식(`"1"`, `"5"`, `"15"`, `"60"`, `"1D"`)을 따릅니다.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// 봉 해상도.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Resolution {
    /// 1분봉
    #[serde(rename = "1")]
    M1,
    /// 5분봉
    #[serde(rename = "5")]
    M5,
    /// 15분봉
    #[serde(rename = "15")]
    M15,
    /// 1시간봉
    #[serde(rename = "60")]
    H1,
    /// 일봉 (UTC 자정 기준)
    #[serde(rename = "1D")]
    D1,
}

impl Resolution {
    /// 집계 대상 해상도 전체.
    pub const ALL: [Resolution; 5] = [
        Resolution::M1,
        Resolution::M5,
        Resolution::M15,
        Resolution::H1,
        Resolution::D1,
    ];

    /// 버킷 길이(초).
    pub fn as_secs(&self) -> i64 {
        match self {
            Resolution::M1 => 60,
            Resolution::M5 => 5 * 60,
            Resolution::M15 => 15 * 60,
            Resolution::H1 => 60 * 60,
            Resolution::D1 => 24 * 60 * 60,
        }
    }

    /// 버킷 길이.
    pub fn duration(&self) -> Duration {
        Duration::seconds(self.as_secs())
    }

    /// 저장소와 프로토콜에서 사용하는 문자열 코드.
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::M1 => "1",
            Resolution::M5 => "5",
            Resolution::M15 => "15",
            Resolution::H1 => "60",
            Resolution::D1 => "1D",
        }
    }

    /// 관측 시각이 속한 버킷의 시작 시각을 계산합니다.
    ///
    /// 모든 버킷 길이가 하루를 나누어 떨어지므로 epoch 기준 내림이 곧
    /// 분/시 단위 내림이고, 일봉은 UTC 자정이 됩니다.
    pub fn truncate(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let offset_secs = t.timestamp().rem_euclid(self.as_secs());
        t - Duration::seconds(offset_secs)
            - Duration::nanoseconds(i64::from(t.timestamp_subsec_nanos()))
    }

    /// 버킷 종료 시각 (`start + resolution`).
    pub fn bucket_end(&self, bucket_start: DateTime<Utc>) -> DateTime<Utc> {
        bucket_start + self.duration()
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" => Ok(Resolution::M1),
            "5" => Ok(Resolution::M5),
            "15" => Ok(Resolution::M15),
            "60" => Ok(Resolution::H1),
            "1D" | "D" => Ok(Resolution::D1),
            other => Err(CoreError::InvalidResolution(other.to_string())),
        }
    }
}
